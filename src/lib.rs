//! A small neural-network engine: feed-forward and recurrent layers, batched
//! training with pluggable optimizers and cost functions, and a compact
//! binary format for learned parameters.
//!
//! Networks are ordered layer stacks over flat `f32` sample-major buffers.
//! All batch storage lives in the drivers — [`inference::InferenceDriver`]
//! for evaluation, [`training::TrainingDriver`] for gradient descent — so a
//! [`network::Network`] holds only structure and parameters.
//!
//! # Example
//!
//! ```
//! use annt::costs::CostFunction;
//! use annt::layers::{ActivationLayer, DenseLayer};
//! use annt::network::Network;
//! use annt::optimizers::Nesterov;
//! use annt::training::TrainingDriver;
//! use annt::utils::SimpleRng;
//!
//! let mut rng = SimpleRng::new(42);
//! let mut net = Network::new();
//! net.add(Box::new(DenseLayer::new(2, 4, &mut rng))).unwrap();
//! net.add(Box::new(ActivationLayer::tanh())).unwrap();
//! net.add(Box::new(DenseLayer::new(4, 1, &mut rng))).unwrap();
//! net.add(Box::new(ActivationLayer::sigmoid())).unwrap();
//!
//! let mut driver = TrainingDriver::new(
//!     &net,
//!     Box::new(Nesterov::new(0.1)),
//!     CostFunction::BinaryCrossEntropy,
//! );
//! let cost = driver.train_sample(&mut net, &[1.0, -1.0], &[1.0]);
//! assert!(cost.is_finite());
//! ```

// Link the BLAS backend; `blas-src` must be referenced for the linker to pick it up.
extern crate blas_src as _;

pub mod config;
pub mod context;
pub mod costs;
pub mod error;
pub mod inference;
pub mod layers;
pub mod math;
pub mod network;
pub mod optimizers;
pub mod training;
pub mod utils;

pub use costs::CostFunction;
pub use error::{Error, Result};
pub use inference::InferenceDriver;
pub use network::Network;
pub use training::{SampleSelection, TrainingDriver};
