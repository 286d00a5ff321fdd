//! Library error type.

use thiserror::Error;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors reported by network construction, configuration and model I/O.
///
/// Shape contracts on the hot compute paths (`forward`/`backward` slice
/// lengths) are programming errors and are enforced with assertions instead.
#[derive(Debug, Error)]
pub enum Error {
    /// A layer appended to a network does not accept the preceding layer's
    /// output size.
    #[error("layer input size {got} does not match preceding output size {expected}")]
    ShapeMismatch { expected: usize, got: usize },

    /// The first layer of a network must declare its own input size; shapeless
    /// layers (activations, dropout) cannot infer one.
    #[error("first layer must declare an explicit input size")]
    UnsizedFirstLayer,

    /// An operation that needs at least one layer was invoked on an empty
    /// network.
    #[error("network has no layers")]
    EmptyNetwork,

    /// Invalid architecture or training configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Corrupt or incompatible model parameter file.
    #[error("invalid model file: {0}")]
    ModelFile(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
