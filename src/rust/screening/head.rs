use std::fs;
use std::path::Path;

use ndarray::{Array1, Array3, Axis};
use serde::{Deserialize, Serialize};

use super::error::ScreeningError;

/// On-disk form of the classification head, exported next to the backbone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeadWeights {
    pub weights: Vec<f32>,
    pub bias: f32,
}

/// Global average pool → linear(C → 1) → sigmoid.
///
/// Dropout sits between the pool and the linear layer during training and is
/// the identity at inference, so it has no counterpart here.
#[derive(Debug, Clone)]
pub struct ClassifierHead {
    weights: Array1<f32>,
    bias: f32,
}

impl ClassifierHead {
    pub fn new(weights: Vec<f32>, bias: f32) -> Result<Self, ScreeningError> {
        if weights.is_empty() {
            return Err(ScreeningError::BuildError("Classifier head has no weights".into()));
        }
        if weights.iter().any(|w| !w.is_finite()) || !bias.is_finite() {
            return Err(ScreeningError::BuildError("Classifier head contains non-finite values".into()));
        }
        Ok(Self {
            weights: Array1::from(weights),
            bias,
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ScreeningError> {
        let raw = fs::read_to_string(path.as_ref())?;
        let head: HeadWeights = serde_json::from_str(&raw)?;
        Self::new(head.weights, head.bias)
    }

    pub fn channels(&self) -> usize {
        self.weights.len()
    }

    fn check_channels(&self, features: &Array3<f32>) -> Result<(), ScreeningError> {
        let (c, h, w) = features.dim();
        if c != self.channels() || h == 0 || w == 0 {
            return Err(ScreeningError::shape_mismatch(
                "classifier head input",
                &[self.channels(), h.max(1), w.max(1)],
                features.shape(),
            ));
        }
        Ok(())
    }

    /// Probability for one `C × H × W` feature map.
    pub fn forward(&self, features: &Array3<f32>) -> Result<f32, ScreeningError> {
        self.check_channels(features)?;
        let pooled = features
            .mean_axis(Axis(2))
            .and_then(|m| m.mean_axis(Axis(1)))
            .ok_or_else(|| ScreeningError::ModelError("Empty feature map".into()))?;
        let logit = pooled.dot(&self.weights) + self.bias;
        Ok(sigmoid(logit))
    }

    /// Gradient of the output probability with respect to every element of
    /// the feature map: `p (1 - p) w_c / (H W)`.
    pub fn backward(&self, features: &Array3<f32>, probability: f32) -> Result<Array3<f32>, ScreeningError> {
        self.check_channels(features)?;
        let (c, h, w) = features.dim();
        let scale = probability * (1.0 - probability) / (h * w) as f32;
        Ok(Array3::from_shape_fn((c, h, w), |(ch, _, _)| scale * self.weights[ch]))
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}
