use std::collections::HashMap;
use std::path::Path;

use log::{debug, error, info};
use ndarray::{s, Array3, Array4, Ix4};
use ort::session::Session;
use ort::value::Tensor;

use super::adapter::{ForwardPass, ModelAdapter, TapSlot};
use super::error::ScreeningError;
use super::head::ClassifierHead;
use crate::runtime::{create_session_builder, RuntimeConfig};

/// Backbone in ONNX Runtime plus the classification head evaluated in Rust.
///
/// The exported graph ends at the target layer, so its `features` output is
/// exactly the activation tensor Grad-CAM++ needs; the gradient of the head's
/// sigmoid output with respect to that tensor is computed analytically.
///
/// # Model Input Format
/// - First graph input: pixels `[1, 3, H, W]`, f32 in [0, 1]
///
/// # Model Output Format
/// - `feature_output`: `[1, C, H', W']`, C matching the head's weight count
pub struct OnnxModel {
    session: Session,
    head: ClassifierHead,
    input_name: String,
    feature_output: String,
    input_size: u32,
    device: &'static str,
    taps: TapSlot,
}

impl OnnxModel {
    /// Loads the backbone graph and the head sidecar.
    ///
    /// # Errors
    /// - `BuildError` if either file is missing or the head file is malformed
    /// - `ModelError` if the graph fails to load or does not expose `feature_output`
    pub fn load(
        model_path: impl AsRef<Path>,
        head_path: impl AsRef<Path>,
        feature_output: &str,
        target_layer: &str,
        input_size: u32,
        runtime_config: &RuntimeConfig,
    ) -> Result<Self, ScreeningError> {
        let model_path = model_path.as_ref();
        let head_path = head_path.as_ref();
        if !model_path.exists() {
            return Err(ScreeningError::BuildError(format!("Model file not found: {}", model_path.display())));
        }
        if !head_path.exists() {
            return Err(ScreeningError::BuildError(format!("Head file not found: {}", head_path.display())));
        }

        let head = ClassifierHead::from_file(head_path).map_err(|e| {
            error!("Failed to load classifier head: {}", e);
            e
        })?;
        info!("Classifier head loaded ({} channels)", head.channels());

        let session = create_session_builder(runtime_config)?.commit_from_file(model_path)?;
        let input_name = Self::validate_model(&session, feature_output)?;
        info!("Model structure validated successfully");

        Ok(Self {
            session,
            head,
            input_name,
            feature_output: feature_output.to_string(),
            input_size,
            device: runtime_config.effective_device().as_str(),
            taps: TapSlot::new(target_layer),
        })
    }

    /// Checks the graph has an input and the named feature output, returning
    /// the name of the input to feed.
    fn validate_model(session: &Session, feature_output: &str) -> Result<String, ScreeningError> {
        let input = session.inputs.first().ok_or_else(|| {
            ScreeningError::ModelError("Model must have at least 1 input for pixels".to_string())
        })?;

        if !session.outputs.iter().any(|o| o.name == feature_output) {
            let found: Vec<&str> = session.outputs.iter().map(|o| o.name.as_str()).collect();
            return Err(ScreeningError::ModelError(format!(
                "Model has no output named '{}' (found {:?})",
                feature_output, found
            )));
        }

        Ok(input.name.clone())
    }

    fn run_backbone(&self, input: &Array4<f32>) -> Result<Array3<f32>, ScreeningError> {
        let expected = [1, 3, self.input_size as usize, self.input_size as usize];
        if input.shape() != &expected[..] {
            return Err(ScreeningError::shape_mismatch("model input", &expected, input.shape()));
        }

        let input_dyn = input.clone().into_dyn();
        let pixels = input_dyn.as_standard_layout();

        let mut input_tensors = HashMap::new();
        input_tensors.insert(
            self.input_name.as_str(),
            Tensor::from_array(&pixels)
                .map_err(|e| ScreeningError::ModelError(format!("Failed to create input tensor: {}", e)))?,
        );

        let outputs = self
            .session
            .run(input_tensors)
            .map_err(|e| ScreeningError::ModelError(format!("Failed to run model: {}", e)))?;
        let features = outputs[self.feature_output.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(|e| ScreeningError::ModelError(format!("Failed to extract feature tensor: {}", e)))?;
        let features = features
            .into_dimensionality::<Ix4>()
            .map_err(|e| ScreeningError::ModelError(format!("Feature tensor is not 4D: {}", e)))?;
        debug!("Feature map shape: {:?}", features.shape());

        Ok(features.slice(s![0, .., .., ..]).to_owned())
    }
}

impl ModelAdapter for OnnxModel {
    fn target_layer(&self) -> &str {
        self.taps.layer()
    }

    fn input_size(&self) -> u32 {
        self.input_size
    }

    fn device(&self) -> &str {
        self.device
    }

    fn forward(&mut self, input: &Array4<f32>) -> Result<f32, ScreeningError> {
        let features = self.run_backbone(input)?;
        self.head.forward(&features)
    }

    fn forward_backward(&mut self, input: &Array4<f32>) -> Result<ForwardPass, ScreeningError> {
        let pass = self.taps.arm();
        let features = self.run_backbone(input)?;
        let probability = self.head.forward(&features)?;
        let gradients = self.head.backward(&features, probability)?;
        self.taps.record_activations(pass, features)?;
        self.taps.record_gradients(pass, gradients)?;
        let taps = self.taps.take(pass)?;
        Ok(ForwardPass { probability, taps })
    }
}

impl std::fmt::Debug for OnnxModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxModel")
            .field("input_name", &self.input_name)
            .field("feature_output", &self.feature_output)
            .field("input_size", &self.input_size)
            .field("head_channels", &self.head.channels())
            .finish()
    }
}
