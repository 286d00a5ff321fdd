//! Cost functions.
//!
//! A cost function reduces one sample's network output against its target to a
//! scalar loss and produces the initial delta fed into the last layer's
//! backward pass. Cross-entropy pairs with a softmax output, binary
//! cross-entropy with sigmoid, negative-log-likelihood with log-softmax (it
//! expects log-probabilities as input). The logarithmic costs do not guard
//! `ln` against outputs of exactly 0 or 1; feeding them unpaired activations
//! can produce infinities, which matches the saturation the pairing avoids.

/// Loss + initial-gradient pairs selectable at training-driver construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CostFunction {
    /// Mean squared error, `sum((y - t)^2) / 2`.
    Mse,
    /// Mean absolute error, `sum(|y - t|)`.
    Absolute,
    /// Categorical cross-entropy, `-sum(t * ln(y))`; pair with softmax.
    CrossEntropy,
    /// Per-element binary cross-entropy; pair with sigmoid.
    BinaryCrossEntropy,
    /// Negative log-likelihood over log-probabilities; pair with log-softmax.
    NegativeLogLikelihood,
}

impl CostFunction {
    /// Scalar loss of one sample.
    pub fn cost(&self, output: &[f32], target: &[f32]) -> f32 {
        assert_eq!(output.len(), target.len(), "cost: length mismatch");
        match self {
            Self::Mse => {
                let sum: f32 = output
                    .iter()
                    .zip(target)
                    .map(|(y, t)| (y - t) * (y - t))
                    .sum();
                sum / 2.0
            }
            Self::Absolute => output.iter().zip(target).map(|(y, t)| (y - t).abs()).sum(),
            Self::CrossEntropy => -output
                .iter()
                .zip(target)
                .map(|(y, t)| t * y.ln())
                .sum::<f32>(),
            Self::BinaryCrossEntropy => -output
                .iter()
                .zip(target)
                .map(|(y, t)| t * y.ln() + (1.0 - t) * (1.0 - y).ln())
                .sum::<f32>(),
            Self::NegativeLogLikelihood => -output
                .iter()
                .zip(target)
                .map(|(y, t)| t * y)
                .sum::<f32>(),
        }
    }

    /// Gradient of the loss w.r.t. the output, written to `delta`.
    pub fn gradient(&self, output: &[f32], target: &[f32], delta: &mut [f32]) {
        assert_eq!(output.len(), target.len(), "gradient: length mismatch");
        assert_eq!(output.len(), delta.len(), "gradient: bad delta length");
        match self {
            Self::Mse => {
                for ((d, y), t) in delta.iter_mut().zip(output).zip(target) {
                    *d = y - t;
                }
            }
            Self::Absolute => {
                for ((d, y), t) in delta.iter_mut().zip(output).zip(target) {
                    *d = (y - t).signum();
                }
            }
            Self::CrossEntropy => {
                for ((d, y), t) in delta.iter_mut().zip(output).zip(target) {
                    *d = -t / y;
                }
            }
            Self::BinaryCrossEntropy => {
                for ((d, y), t) in delta.iter_mut().zip(output).zip(target) {
                    *d = (y - t) / (y * (1.0 - y));
                }
            }
            Self::NegativeLogLikelihood => {
                for (d, t) in delta.iter_mut().zip(target) {
                    *d = -t;
                }
            }
        }
    }
}
