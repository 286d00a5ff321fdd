//! JSON configuration for network architectures and training settings.
//!
//! An architecture config is a list of layer descriptions, one JSON object
//! per layer with a `type` field and per-type parameters. Building a network
//! from it runs the same shape checks as [`Network::add`]
//! (crate::network::Network::add), so a mismatched config is rejected with
//! [`Error::Config`] rather than producing a broken network.
//!
//! ```json
//! {
//!   "seed": 42,
//!   "layers": [
//!     { "type": "dense", "inputs": 2, "outputs": 4 },
//!     { "type": "activation", "activation": "tanh" },
//!     { "type": "dense", "inputs": 4, "outputs": 1 },
//!     { "type": "activation", "activation": "sigmoid" }
//!   ]
//! }
//! ```

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::costs::CostFunction;
use crate::error::{Error, Result};
use crate::layers::{
    ActivationKind, ActivationLayer, AveragePoolingLayer, BatchNormLayer, BorderMode,
    Conv2DLayer, DenseLayer, DropoutLayer, GruLayer, Layer, LstmLayer, MaxPoolingLayer,
    RecurrentLayer,
};
use crate::network::Network;
use crate::optimizers::{Adagrad, Adam, Momentum, Nesterov, Optimizer, RmsProp, Sgd};
use crate::utils::SimpleRng;

/// One layer description. Only the fields the named `type` uses are read;
/// missing required fields are a configuration error at build time.
#[derive(Debug, Clone, Deserialize)]
pub struct LayerConfig {
    #[serde(rename = "type")]
    pub kind: String,

    // dense / recurrent / gru / lstm
    pub inputs: Option<usize>,
    pub outputs: Option<usize>,

    // activation
    pub activation: Option<String>,
    pub alpha: Option<f32>,

    // dropout
    pub drop_rate: Option<f32>,

    // conv2d / pooling
    pub width: Option<usize>,
    pub height: Option<usize>,
    pub depth: Option<usize>,
    pub kernels: Option<usize>,
    pub kernel_width: Option<usize>,
    pub kernel_height: Option<usize>,
    pub pool_size: Option<usize>,
    pub stride: Option<usize>,
    pub padding: Option<String>,

    // batchnorm
    pub channels: Option<usize>,
    pub spatial_size: Option<usize>,
    pub momentum: Option<f32>,
}

/// A whole-network architecture description.
#[derive(Debug, Clone, Deserialize)]
pub struct ArchitectureConfig {
    /// Seed for weight initialization; wall clock when omitted.
    pub seed: Option<u64>,
    pub layers: Vec<LayerConfig>,
}

impl ArchitectureConfig {
    /// Parse a JSON architecture description. An empty `layers` list is
    /// rejected with [`Error::EmptyNetwork`].
    pub fn from_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;
        if config.layers.is_empty() {
            return Err(Error::EmptyNetwork);
        }
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_str(&fs::read_to_string(path)?)
    }

    /// Build a network with freshly initialized weights. Shape mismatches
    /// between adjacent layers surface as [`Error::Config`] naming the layer.
    pub fn build_network(&self) -> Result<Network> {
        let mut rng = match self.seed {
            Some(seed) => SimpleRng::new(seed),
            None => SimpleRng::from_time(),
        };
        let mut network = Network::new();
        for (index, layer) in self.layers.iter().enumerate() {
            let built = build_layer(layer, &mut rng)
                .map_err(|e| Error::Config(format!("layer {}: {}", index, e)))?;
            network
                .add(built)
                .map_err(|e| Error::Config(format!("layer {}: {}", index, e)))?;
        }
        Ok(network)
    }
}

fn require<T: Copy>(field: Option<T>, name: &str) -> Result<T> {
    field.ok_or_else(|| Error::Config(format!("missing field `{}`", name)))
}

fn parse_border_mode(padding: Option<&str>) -> Result<BorderMode> {
    match padding {
        None | Some("valid") => Ok(BorderMode::Valid),
        Some("same") => Ok(BorderMode::Same),
        Some(other) => Err(Error::Config(format!(
            "unknown padding `{}` (expected `valid` or `same`)",
            other
        ))),
    }
}

fn parse_activation(name: &str, alpha: Option<f32>) -> Result<ActivationKind> {
    Ok(match name {
        "sigmoid" => ActivationKind::Sigmoid,
        "tanh" => ActivationKind::Tanh,
        "relu" => ActivationKind::Relu,
        "leaky_relu" => ActivationKind::LeakyRelu {
            alpha: alpha.unwrap_or(0.01),
        },
        "elu" => ActivationKind::Elu {
            alpha: alpha.unwrap_or(1.0),
        },
        "softmax" => ActivationKind::SoftMax,
        "log_softmax" => ActivationKind::LogSoftMax,
        other => {
            return Err(Error::Config(format!(
                "unknown activation `{}`",
                other
            )))
        }
    })
}

fn build_layer(config: &LayerConfig, rng: &mut SimpleRng) -> Result<Box<dyn Layer>> {
    Ok(match config.kind.as_str() {
        "dense" => Box::new(DenseLayer::new(
            require(config.inputs, "inputs")?,
            require(config.outputs, "outputs")?,
            rng,
        )),
        "activation" => {
            let name = config
                .activation
                .as_deref()
                .ok_or_else(|| Error::Config("missing field `activation`".into()))?;
            Box::new(ActivationLayer::new(parse_activation(name, config.alpha)?))
        }
        "dropout" => {
            let rate = require(config.drop_rate, "drop_rate")?;
            if !(0.0..1.0).contains(&rate) {
                return Err(Error::Config(format!(
                    "drop_rate {} outside [0, 1)",
                    rate
                )));
            }
            Box::new(DropoutLayer::new(rate, rng))
        }
        "conv2d" => {
            let mut layer = Conv2DLayer::new(
                require(config.width, "width")?,
                require(config.height, "height")?,
                require(config.depth, "depth")?,
                require(config.kernels, "kernels")?,
                require(config.kernel_width, "kernel_width")?,
                require(config.kernel_height, "kernel_height")?,
                rng,
            )
            .with_border_mode(parse_border_mode(config.padding.as_deref())?);
            if let Some(stride) = config.stride {
                layer = layer.with_stride(stride);
            }
            Box::new(layer)
        }
        "max_pooling" => {
            let mut layer = MaxPoolingLayer::new(
                require(config.width, "width")?,
                require(config.height, "height")?,
                require(config.depth, "depth")?,
                require(config.pool_size, "pool_size")?,
            )
            .with_border_mode(parse_border_mode(config.padding.as_deref())?);
            if let Some(stride) = config.stride {
                layer = layer.with_stride(stride);
            }
            Box::new(layer)
        }
        "average_pooling" => {
            let mut layer = AveragePoolingLayer::new(
                require(config.width, "width")?,
                require(config.height, "height")?,
                require(config.depth, "depth")?,
                require(config.pool_size, "pool_size")?,
            )
            .with_border_mode(parse_border_mode(config.padding.as_deref())?);
            if let Some(stride) = config.stride {
                layer = layer.with_stride(stride);
            }
            Box::new(layer)
        }
        "batchnorm" => {
            let mut layer = BatchNormLayer::new(
                require(config.channels, "channels")?,
                require(config.spatial_size, "spatial_size")?,
            );
            if let Some(momentum) = config.momentum {
                if !(0.0..1.0).contains(&momentum) {
                    return Err(Error::Config(format!(
                        "momentum {} outside [0, 1)",
                        momentum
                    )));
                }
                layer = layer.with_momentum(momentum);
            }
            Box::new(layer)
        }
        "recurrent" => Box::new(RecurrentLayer::new(
            require(config.inputs, "inputs")?,
            require(config.outputs, "outputs")?,
            rng,
        )),
        "gru" => Box::new(GruLayer::new(
            require(config.inputs, "inputs")?,
            require(config.outputs, "outputs")?,
            rng,
        )),
        "lstm" => Box::new(LstmLayer::new(
            require(config.inputs, "inputs")?,
            require(config.outputs, "outputs")?,
            rng,
        )),
        other => {
            return Err(Error::Config(format!("unknown layer type `{}`", other)))
        }
    })
}

/// Training hyper-parameters parsed from JSON.
#[derive(Debug, Clone, Deserialize)]
pub struct TrainingSettings {
    pub optimizer: String,
    pub cost: String,
    pub learning_rate: f32,
    pub batch_size: usize,
    pub epochs: usize,
    /// Optional momentum/decay knob for the rules that take one.
    pub momentum: Option<f32>,
    /// Group samples into sequences of this length for recurrent layers.
    pub sequence_length: Option<usize>,
}

impl TrainingSettings {
    pub fn from_str(json: &str) -> Result<Self> {
        let settings: Self =
            serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_str(&fs::read_to_string(path)?)
    }

    fn validate(&self) -> Result<()> {
        if !(self.learning_rate > 0.0) {
            return Err(Error::Config(format!(
                "learning_rate {} must be positive",
                self.learning_rate
            )));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be positive".into()));
        }
        if self.epochs == 0 {
            return Err(Error::Config("epochs must be positive".into()));
        }
        if let Some(momentum) = self.momentum {
            if !(0.0..1.0).contains(&momentum) {
                return Err(Error::Config(format!(
                    "momentum {} outside [0, 1)",
                    momentum
                )));
            }
        }
        if self.sequence_length == Some(0) {
            return Err(Error::Config("sequence_length must be positive".into()));
        }
        Ok(())
    }

    /// Instantiate the named optimizer rule with this config's rates.
    pub fn build_optimizer(&self) -> Result<Box<dyn Optimizer>> {
        Ok(match self.optimizer.as_str() {
            "sgd" => Box::new(Sgd::new(self.learning_rate)),
            "momentum" => match self.momentum {
                Some(m) => Box::new(Momentum::with_momentum(self.learning_rate, m)),
                None => Box::new(Momentum::new(self.learning_rate)),
            },
            "nesterov" => match self.momentum {
                Some(m) => Box::new(Nesterov::with_momentum(self.learning_rate, m)),
                None => Box::new(Nesterov::new(self.learning_rate)),
            },
            "adagrad" => Box::new(Adagrad::new(self.learning_rate)),
            "rmsprop" => Box::new(RmsProp::new(self.learning_rate)),
            "adam" => Box::new(Adam::new(self.learning_rate)),
            other => {
                return Err(Error::Config(format!("unknown optimizer `{}`", other)))
            }
        })
    }

    /// Resolve the named cost function.
    pub fn cost_function(&self) -> Result<CostFunction> {
        Ok(match self.cost.as_str() {
            "mse" => CostFunction::Mse,
            "absolute" => CostFunction::Absolute,
            "cross_entropy" => CostFunction::CrossEntropy,
            "binary_cross_entropy" => CostFunction::BinaryCrossEntropy,
            "negative_log_likelihood" => CostFunction::NegativeLogLikelihood,
            other => return Err(Error::Config(format!("unknown cost `{}`", other))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mlp_architecture_builds() {
        let config = ArchitectureConfig::from_str(
            r#"{
                "seed": 42,
                "layers": [
                    { "type": "dense", "inputs": 2, "outputs": 4 },
                    { "type": "activation", "activation": "tanh" },
                    { "type": "dense", "inputs": 4, "outputs": 1 },
                    { "type": "activation", "activation": "sigmoid" }
                ]
            }"#,
        )
        .unwrap();
        let net = config.build_network().unwrap();
        assert_eq!(net.len(), 4);
        assert_eq!(net.input_size(), 2);
        assert_eq!(net.output_size(), 1);
    }

    #[test]
    fn convolutional_architecture_builds() {
        let config = ArchitectureConfig::from_str(
            r#"{
                "layers": [
                    { "type": "conv2d", "width": 8, "height": 8, "depth": 1,
                      "kernels": 2, "kernel_width": 3, "kernel_height": 3,
                      "padding": "same" },
                    { "type": "activation", "activation": "relu" },
                    { "type": "max_pooling", "width": 8, "height": 8,
                      "depth": 2, "pool_size": 2 }
                ]
            }"#,
        )
        .unwrap();
        let net = config.build_network().unwrap();
        assert_eq!(net.output_size(), 2 * 4 * 4);
    }

    #[test]
    fn shape_mismatch_names_the_layer() {
        let config = ArchitectureConfig::from_str(
            r#"{
                "layers": [
                    { "type": "dense", "inputs": 2, "outputs": 4 },
                    { "type": "dense", "inputs": 5, "outputs": 1 }
                ]
            }"#,
        )
        .unwrap();
        let err = config.build_network().unwrap_err();
        match err {
            Error::Config(message) => assert!(message.contains("layer 1"), "{}", message),
            other => panic!("expected Config error, got {:?}", other),
        }
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let config = ArchitectureConfig::from_str(
            r#"{ "layers": [ { "type": "dense", "inputs": 2 } ] }"#,
        )
        .unwrap();
        let err = config.build_network().unwrap_err();
        match err {
            Error::Config(message) => assert!(message.contains("outputs"), "{}", message),
            other => panic!("expected Config error, got {:?}", other),
        }
    }

    #[test]
    fn unknown_layer_type_is_rejected() {
        let config = ArchitectureConfig::from_str(
            r#"{ "layers": [ { "type": "attention", "inputs": 2, "outputs": 2 } ] }"#,
        )
        .unwrap();
        assert!(config.build_network().is_err());
    }

    #[test]
    fn empty_architecture_is_rejected() {
        let err = ArchitectureConfig::from_str(r#"{ "layers": [] }"#).unwrap_err();
        assert!(matches!(err, Error::EmptyNetwork));
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let err = ArchitectureConfig::from_str("{ not json").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn training_settings_parse_and_build() {
        let settings = TrainingSettings::from_str(
            r#"{
                "optimizer": "nesterov",
                "cost": "binary_cross_entropy",
                "learning_rate": 0.1,
                "batch_size": 4,
                "epochs": 100
            }"#,
        )
        .unwrap();
        let optimizer = settings.build_optimizer().unwrap();
        assert_eq!(optimizer.learning_rate(), 0.1);
        assert_eq!(
            settings.cost_function().unwrap(),
            CostFunction::BinaryCrossEntropy
        );
    }

    #[test]
    fn training_settings_ranges_are_validated() {
        for json in [
            r#"{ "optimizer": "sgd", "cost": "mse", "learning_rate": 0.0,
                 "batch_size": 4, "epochs": 10 }"#,
            r#"{ "optimizer": "sgd", "cost": "mse", "learning_rate": 0.1,
                 "batch_size": 0, "epochs": 10 }"#,
            r#"{ "optimizer": "sgd", "cost": "mse", "learning_rate": 0.1,
                 "batch_size": 4, "epochs": 0 }"#,
            r#"{ "optimizer": "sgd", "cost": "mse", "learning_rate": 0.1,
                 "batch_size": 4, "epochs": 10, "momentum": 1.5 }"#,
        ] {
            assert!(TrainingSettings::from_str(json).is_err(), "{}", json);
        }
    }

    #[test]
    fn unknown_optimizer_and_cost_are_rejected() {
        let settings = TrainingSettings::from_str(
            r#"{ "optimizer": "lbfgs", "cost": "hinge", "learning_rate": 0.1,
                 "batch_size": 4, "epochs": 10 }"#,
        )
        .unwrap();
        assert!(settings.build_optimizer().is_err());
        assert!(settings.cost_function().is_err());
    }
}
