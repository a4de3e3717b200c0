use ndarray::{Array3, Array4};

use super::error::ScreeningError;

/// Activations and gradients captured at one named layer during a single
/// forward/backward pass.
#[derive(Debug, Clone)]
pub struct LayerTaps {
    /// Name of the tapped layer
    pub layer: String,
    /// Pass that produced both tensors
    pub pass: u64,
    /// Layer output, `channels × height × width`
    pub activations: Array3<f32>,
    /// Gradient of the model output with respect to the layer output, same shape
    pub gradients: Array3<f32>,
}

/// Result of running the model forward and then backward from its output.
#[derive(Debug, Clone)]
pub struct ForwardPass {
    pub probability: f32,
    pub taps: LayerTaps,
}

/// The capability the screening pipeline needs from a classification network.
///
/// Implementations keep mutable per-pass state (tap slots, gradient buffers),
/// so every method takes `&mut self`; callers serialize access through
/// [`InferenceSession`](super::session::InferenceSession).
///
/// The model tensor is `[1, 3, H, W]` with values in [0, 1].
pub trait ModelAdapter: Send {
    /// Name of the intermediate layer whose activations and gradients are tapped.
    fn target_layer(&self) -> &str;

    /// Square input resolution the network expects.
    fn input_size(&self) -> u32;

    /// Device the network runs on ("cpu" or "cuda").
    fn device(&self) -> &str {
        "cpu"
    }

    /// Runs inference only and returns the positive-class probability.
    fn forward(&mut self, input: &Array4<f32>) -> Result<f32, ScreeningError>;

    /// Runs inference, backpropagates from the output probability and returns
    /// the probability together with the target layer taps of this same pass.
    fn forward_backward(&mut self, input: &Array4<f32>) -> Result<ForwardPass, ScreeningError>;
}

/// Single-slot storage for the taps of the current pass.
///
/// A slot is armed once per pass. Tensors recorded for any other pass are
/// rejected, and reading the slot disarms it, so nothing from an earlier pass
/// can ever be read back.
#[derive(Debug)]
pub struct TapSlot {
    layer: String,
    next_pass: u64,
    armed: Option<u64>,
    activations: Option<Array3<f32>>,
    gradients: Option<Array3<f32>>,
}

impl TapSlot {
    pub fn new(layer: impl Into<String>) -> Self {
        Self {
            layer: layer.into(),
            next_pass: 0,
            armed: None,
            activations: None,
            gradients: None,
        }
    }

    pub fn layer(&self) -> &str {
        &self.layer
    }

    /// Starts a new pass, discarding whatever the previous pass left behind.
    pub fn arm(&mut self) -> u64 {
        self.next_pass += 1;
        self.armed = Some(self.next_pass);
        self.activations = None;
        self.gradients = None;
        self.next_pass
    }

    pub fn record_activations(&mut self, pass: u64, activations: Array3<f32>) -> Result<(), ScreeningError> {
        self.check_pass(pass)?;
        self.activations = Some(activations);
        Ok(())
    }

    pub fn record_gradients(&mut self, pass: u64, gradients: Array3<f32>) -> Result<(), ScreeningError> {
        self.check_pass(pass)?;
        self.gradients = Some(gradients);
        Ok(())
    }

    /// Takes both tensors of `pass` out of the slot.
    ///
    /// # Errors
    /// - `StaleTap` if `pass` is not the armed pass (or the slot was already read)
    /// - `MissingTap` if the forward or backward half never recorded its tensor
    /// - `ShapeMismatch` if activations and gradients disagree in shape
    pub fn take(&mut self, pass: u64) -> Result<LayerTaps, ScreeningError> {
        self.check_pass(pass)?;
        let activations = self.activations.take().ok_or_else(|| ScreeningError::MissingTap {
            layer: self.layer.clone(),
            kind: "activation",
        })?;
        let gradients = self.gradients.take().ok_or_else(|| ScreeningError::MissingTap {
            layer: self.layer.clone(),
            kind: "gradient",
        })?;
        self.armed = None;

        if activations.shape() != gradients.shape() {
            return Err(ScreeningError::shape_mismatch(
                "layer taps",
                activations.shape(),
                gradients.shape(),
            ));
        }

        Ok(LayerTaps {
            layer: self.layer.clone(),
            pass,
            activations,
            gradients,
        })
    }

    fn check_pass(&self, pass: u64) -> Result<(), ScreeningError> {
        if self.armed != Some(pass) {
            return Err(ScreeningError::StaleTap {
                layer: self.layer.clone(),
                requested: pass,
                armed: self.armed,
            });
        }
        Ok(())
    }
}
