//! Shared helpers: seedable randomness, label encoding and learning-rate
//! schedules.

pub mod encoding;
pub mod lr_scheduler;
pub mod rng;

pub use encoding::{argmax, one_hot};
pub use lr_scheduler::{CosineAnnealing, ExponentialDecay, LrSchedule, StepDecay};
pub use rng::SimpleRng;
