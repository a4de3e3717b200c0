use std::path::Path;
use log::info;

use super::adapter::ModelAdapter;
use super::error::ScreeningError;
use super::onnx::OnnxModel;
use super::screener::{Screener, ScreeningConfig};
use super::session::InferenceSession;
use crate::{BuiltinModel, ModelCharacteristics, ModelManager, RuntimeConfig};

/// A builder for constructing a Screener with a fluent interface.
#[derive(Default)]
pub struct ScreenerBuilder {
    adapter: Option<Box<dyn ModelAdapter>>,
    config: ScreeningConfig,
    runtime_config: RuntimeConfig,
}

impl std::fmt::Debug for ScreenerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScreenerBuilder")
            .field("adapter", &self.adapter.as_ref().map(|a| a.target_layer().to_string()))
            .field("config", &self.config)
            .field("runtime_config", &self.runtime_config)
            .finish()
    }
}

impl ScreenerBuilder {
    /// Creates a new empty ScreenerBuilder instance with default configuration
    ///
    /// # Example
    /// ```
    /// use drishti::ScreenerBuilder;
    ///
    /// let builder = ScreenerBuilder::new();
    /// ```
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the runtime configuration for ONNX model execution.
    /// Must be called before the model is loaded to take effect.
    pub fn with_runtime_config(mut self, config: RuntimeConfig) -> Self {
        self.runtime_config = config;
        self
    }

    /// Overrides segmentation and heatmap settings
    pub fn with_config(mut self, config: ScreeningConfig) -> Self {
        self.config = config;
        self
    }

    /// Loads a built-in model from the default model cache
    ///
    /// # Returns
    /// * `Result<Self, ScreeningError>` - The builder instance if successful, or an error if:
    ///   - A model is already set
    ///   - The model is not downloaded
    ///   - The graph or head failed to load
    ///   - The model structure is invalid
    ///
    /// # Example
    /// ```no_run
    /// use drishti::{ScreenerBuilder, BuiltinModel};
    ///
    /// let builder = ScreenerBuilder::new()
    ///     .with_model(BuiltinModel::EfficientNetV2S);
    /// ```
    pub fn with_model(self, model: BuiltinModel) -> Result<Self, ScreeningError> {
        let manager = ModelManager::new_default()
            .map_err(|e| ScreeningError::BuildError(format!("Failed to create model manager: {}", e)))?;
        self.with_model_from(&manager, model)
    }

    /// Loads a built-in model from the given model cache
    pub fn with_model_from(self, manager: &ModelManager, model: BuiltinModel) -> Result<Self, ScreeningError> {
        if self.adapter.is_some() {
            return Err(ScreeningError::BuildError("Model already set".to_string()));
        }
        if !manager.is_model_downloaded(model) {
            return Err(ScreeningError::BuildError(format!(
                "Model '{:?}' is not downloaded. Please download it first using ModelManager::download_model()",
                model
            )));
        }

        let model_path = manager.get_model_path(model);
        let head_path = manager.get_head_path(model);
        self.load_onnx(&model_path, &head_path, model.characteristics())
    }

    /// Sets a custom backbone graph and head sidecar
    ///
    /// # Arguments
    /// * `model_path` - Path to the ONNX backbone, ending at the target layer
    /// * `head_path` - Path to the head JSON (`weights`, `bias`)
    /// * `characteristics` - Input size and feature output of the graph; defaults
    ///   to the EfficientNetV2-S values when `None`
    ///
    /// # Example
    /// ```no_run
    /// use drishti::ScreenerBuilder;
    ///
    /// let builder = ScreenerBuilder::new()
    ///     .with_custom_model("path/to/model.onnx", "path/to/head.json", None);
    /// ```
    pub fn with_custom_model(
        self,
        model_path: &str,
        head_path: &str,
        characteristics: Option<ModelCharacteristics>,
    ) -> Result<Self, ScreeningError> {
        if model_path.is_empty() || head_path.is_empty() {
            return Err(ScreeningError::BuildError("Model and head paths cannot be empty".to_string()));
        }
        if self.adapter.is_some() {
            return Err(ScreeningError::BuildError("Model already set".to_string()));
        }
        self.load_onnx(
            Path::new(model_path),
            Path::new(head_path),
            characteristics.unwrap_or_default(),
        )
    }

    /// Uses an already constructed model, e.g. another runtime or a test double
    pub fn with_adapter(mut self, adapter: Box<dyn ModelAdapter>) -> Result<Self, ScreeningError> {
        if self.adapter.is_some() {
            return Err(ScreeningError::BuildError("Model already set".to_string()));
        }
        if adapter.input_size() == 0 {
            return Err(ScreeningError::BuildError("Model input size must be positive".to_string()));
        }
        self.adapter = Some(adapter);
        Ok(self)
    }

    fn load_onnx(
        mut self,
        model_path: &Path,
        head_path: &Path,
        characteristics: ModelCharacteristics,
    ) -> Result<Self, ScreeningError> {
        let model = OnnxModel::load(
            model_path,
            head_path,
            &characteristics.feature_output,
            &characteristics.target_layer,
            characteristics.input_size,
            &self.runtime_config,
        )?;
        info!(
            "Loaded {} ({}x{} input, target layer '{}')",
            model_path.display(),
            characteristics.input_size,
            characteristics.input_size,
            characteristics.target_layer
        );
        self.adapter = Some(Box::new(model));
        Ok(self)
    }

    /// Builds and returns the final Screener instance
    ///
    /// # Returns
    /// * `Result<Screener, ScreeningError>` - The constructed Screener, or an error if:
    ///   - No model has been set
    ///   - The heatmap settings are out of range
    pub fn build(self) -> Result<Screener, ScreeningError> {
        let adapter = self
            .adapter
            .ok_or_else(|| ScreeningError::BuildError("A model must be set before building".to_string()))?;

        let heatmap = &self.config.heatmap;
        if !(0.0..=1.0).contains(&heatmap.alpha) {
            return Err(ScreeningError::ValidationError(format!(
                "Overlay alpha must be within [0, 1], got {}",
                heatmap.alpha
            )));
        }
        if !(0.0..=1.0).contains(&heatmap.gate) {
            return Err(ScreeningError::ValidationError(format!(
                "Heatmap gate must be within [0, 1], got {}",
                heatmap.gate
            )));
        }

        let session = InferenceSession::new(adapter);
        info!("Screener ready on {} (layer '{}')", session.device(), session.target_layer());
        Ok(Screener::new(session, self.config))
    }
}
