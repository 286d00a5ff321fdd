//! Neural network layers.
//!
//! Every variant implements the [`Layer`] trait; networks hold them as trait
//! objects. Fixed-shape layers (dense, convolution, pooling, batch norm,
//! recurrent) are constructed with explicit sizes; shapeless layers
//! (activations, dropout) pick up their size when appended to a network.

mod activation;
mod batchnorm;
mod conv2d;
mod dense;
mod dropout;
mod gru;
mod lstm;
mod pooling;
mod recurrent;
mod r#trait;

pub use activation::{ActivationKind, ActivationLayer};
pub use batchnorm::BatchNormLayer;
pub use conv2d::{BorderMode, Conv2DLayer};
pub use dense::DenseLayer;
pub use dropout::DropoutLayer;
pub use gru::GruLayer;
pub use lstm::LstmLayer;
pub use pooling::{AveragePoolingLayer, MaxPoolingLayer, NOT_CONNECTED};
pub use r#trait::{Layer, LayerKind};
pub use recurrent::RecurrentLayer;

use std::io::{Read, Write};

use crate::error::Result;

pub(crate) fn write_f32s(writer: &mut dyn Write, data: &[f32]) -> Result<()> {
    for value in data {
        writer.write_all(&value.to_le_bytes())?;
    }
    Ok(())
}

pub(crate) fn read_f32s(reader: &mut dyn Read, data: &mut [f32]) -> Result<()> {
    let mut bytes = [0u8; 4];
    for value in data.iter_mut() {
        reader.read_exact(&mut bytes)?;
        *value = f32::from_le_bytes(bytes);
    }
    Ok(())
}

/// Uniform limit for the symmetric Xavier-style initialization.
pub(crate) fn init_limit(fan_in: usize) -> f32 {
    (3.0 / fan_in.max(1) as f32).sqrt()
}
