/// Represents the available built-in screening networks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinModel {
    /// EfficientNetV2-S backbone with a single-logit TB head
    ///
    /// Characteristics:
    /// - Input: 512×512 RGB
    /// - Target layer: last feature block, 1280 channels
    /// - Size: ~80MB
    EfficientNetV2S,
}

/// Characteristics of a model including its capabilities and requirements
#[derive(Debug, Clone, PartialEq)]
pub struct ModelCharacteristics {
    /// Square input resolution
    pub input_size: u32,
    /// Channels of the tapped feature map (and weights of the head)
    pub feature_channels: usize,
    /// Layer whose activations and gradients drive attribution
    pub target_layer: String,
    /// Name of the graph output carrying that layer's activations
    pub feature_output: String,
    /// Approximate size of the model in memory
    pub model_size_mb: usize,
}

impl Default for ModelCharacteristics {
    fn default() -> Self {
        BuiltinModel::EfficientNetV2S.characteristics()
    }
}

impl BuiltinModel {
    /// Get the characteristics of the model
    pub fn characteristics(&self) -> ModelCharacteristics {
        match self {
            Self::EfficientNetV2S => ModelCharacteristics {
                input_size: 512,
                feature_channels: 1280,
                target_layer: "backbone.features.7".to_string(),
                feature_output: "features".to_string(),
                model_size_mb: 80,
            },
        }
    }

    /// Directory name under the models cache
    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::EfficientNetV2S => "efficientnetv2-s-tb",
        }
    }
}

/// Where to fetch a model's files from and what they must hash to.
///
/// Weights are not published with the crate, so locations and SHA-256
/// digests are always supplied by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelInfo {
    pub model: BuiltinModel,
    pub model_url: String,
    pub model_hash: String,
    pub head_url: String,
    pub head_hash: String,
}

impl ModelInfo {
    pub fn new(
        model: BuiltinModel,
        model_url: impl Into<String>,
        model_hash: impl Into<String>,
        head_url: impl Into<String>,
        head_hash: impl Into<String>,
    ) -> Self {
        Self {
            model,
            model_url: model_url.into(),
            model_hash: model_hash.into().to_ascii_lowercase(),
            head_url: head_url.into(),
            head_hash: head_hash.into().to_ascii_lowercase(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.model.dir_name()
    }
}
