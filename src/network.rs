//! Network container: an ordered sequence of layers.
//!
//! The network owns layer structure and parameters but no batch data; the
//! drivers supply storage and scratch. Appending a layer checks shape
//! compatibility with the preceding layer and connects shapeless layers
//! (activations, dropout) to their predecessor's output size.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use log::debug;

use crate::error::{Error, Result};
use crate::layers::{Layer, LayerKind};
use crate::utils::SimpleRng;

// Model file header: magic plus one byte naming the float width in bytes.
const MODEL_MAGIC: &[u8; 4] = b"ANNT";
const FLOAT_SIZE_TAG: u8 = 4;

/// An ordered, shape-checked sequence of layers.
///
/// # Example
///
/// ```
/// use annt::layers::{ActivationKind, ActivationLayer, DenseLayer};
/// use annt::network::Network;
/// use annt::utils::SimpleRng;
///
/// let mut rng = SimpleRng::new(42);
/// let mut net = Network::new();
/// net.add(Box::new(DenseLayer::new(2, 3, &mut rng))).unwrap();
/// net.add(Box::new(ActivationLayer::new(ActivationKind::Tanh))).unwrap();
/// assert_eq!(net.input_size(), 2);
/// assert_eq!(net.output_size(), 3);
/// ```
#[derive(Debug, Default)]
pub struct Network {
    layers: Vec<Box<dyn Layer>>,
}

impl Network {
    pub fn new() -> Self {
        Self { layers: Vec::new() }
    }

    /// Append a layer, checking that its input size matches the current
    /// output size. A shapeless layer (reporting input size 0) adopts the
    /// preceding layer's output size; as the first layer it is rejected.
    pub fn add(&mut self, mut layer: Box<dyn Layer>) -> Result<()> {
        match self.layers.last() {
            None => {
                if layer.input_size() == 0 {
                    return Err(Error::UnsizedFirstLayer);
                }
            }
            Some(prev) => {
                let expected = prev.output_size();
                if layer.input_size() == 0 {
                    layer.set_input_size(expected);
                } else if layer.input_size() != expected {
                    return Err(Error::ShapeMismatch {
                        expected,
                        got: layer.input_size(),
                    });
                }
            }
        }
        self.layers.push(layer);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Input size of the first layer; 0 for an empty network.
    pub fn input_size(&self) -> usize {
        self.layers.first().map_or(0, |l| l.input_size())
    }

    /// Output size of the last layer; 0 for an empty network.
    pub fn output_size(&self) -> usize {
        self.layers.last().map_or(0, |l| l.output_size())
    }

    pub fn layers(&self) -> &[Box<dyn Layer>] {
        &self.layers
    }

    pub fn layer(&self, index: usize) -> &dyn Layer {
        self.layers[index].as_ref()
    }

    pub fn layer_mut(&mut self, index: usize) -> &mut dyn Layer {
        self.layers[index].as_mut()
    }

    /// Total count of trainable parameters across all layers.
    pub fn parameter_count(&self) -> usize {
        self.layers.iter().map(|l| l.parameter_count()).sum()
    }

    /// Re-initialize every layer's weights from `rng`.
    pub fn randomize(&mut self, rng: &mut SimpleRng) {
        for layer in &mut self.layers {
            layer.randomize(rng);
        }
    }

    /// Write all learned parameters to `writer`: the `ANNT` magic, a
    /// float-size byte, then one type-tagged block per parameterized layer.
    pub fn save_params_to(&self, writer: &mut dyn Write) -> Result<()> {
        writer.write_all(MODEL_MAGIC)?;
        writer.write_all(&[FLOAT_SIZE_TAG])?;
        for layer in &self.layers {
            let count = layer.saved_param_count();
            if count == 0 {
                continue;
            }
            writer.write_all(&(layer.kind() as u32).to_le_bytes())?;
            writer.write_all(&(count as u32).to_le_bytes())?;
            layer.save_params(writer)?;
        }
        Ok(())
    }

    /// Load parameters previously written by [`save_params_to`]
    /// (Self::save_params_to) into an identically structured network.
    pub fn load_params_from(&mut self, reader: &mut dyn Read) -> Result<()> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != MODEL_MAGIC {
            return Err(Error::ModelFile("bad magic".into()));
        }
        let mut tag = [0u8; 1];
        reader.read_exact(&mut tag)?;
        if tag[0] != FLOAT_SIZE_TAG {
            return Err(Error::ModelFile(format!(
                "unsupported float size {}",
                tag[0]
            )));
        }

        for (index, layer) in self.layers.iter_mut().enumerate() {
            let expected = layer.saved_param_count();
            if expected == 0 {
                continue;
            }
            let mut word = [0u8; 4];
            reader.read_exact(&mut word)?;
            let tag = u32::from_le_bytes(word);
            if tag != layer.kind() as u32 {
                let saved = match LayerKind::from_tag(tag) {
                    Some(kind) => format!("{:?}", kind),
                    None => format!("unknown tag {}", tag),
                };
                return Err(Error::ModelFile(format!(
                    "layer {}: file holds a {} block, network has {:?}",
                    index,
                    saved,
                    layer.kind()
                )));
            }
            reader.read_exact(&mut word)?;
            let count = u32::from_le_bytes(word) as usize;
            if count != expected {
                return Err(Error::ModelFile(format!(
                    "layer {}: expected {} parameters, file holds {}",
                    index, expected, count
                )));
            }
            layer.load_params(reader)?;
        }
        Ok(())
    }

    /// Save learned parameters to a file.
    pub fn save_params<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path.as_ref())?);
        self.save_params_to(&mut writer)?;
        writer.flush()?;
        debug!(
            "saved {} parameters across {} layers",
            self.parameter_count(),
            self.layers.len()
        );
        Ok(())
    }

    /// Load learned parameters from a file into this network, which must have
    /// the same structure as the one that saved them.
    pub fn load_params<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let mut reader = BufReader::new(File::open(path.as_ref())?);
        self.load_params_from(&mut reader)?;
        debug!(
            "loaded {} parameters across {} layers",
            self.parameter_count(),
            self.layers.len()
        );
        Ok(())
    }
}
