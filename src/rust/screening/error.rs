use std::io;

/// Represents the different types of errors that can occur while screening an X-ray.
///
/// Numeric degeneracies (zero gradients, uniform saliency) are never reported
/// here; they are resolved by substitution inside the engines.
#[derive(Debug, thiserror::Error)]
pub enum ScreeningError {
    /// Error occurred while loading or running the model
    #[error("Model error: {0}")]
    ModelError(String),
    /// Error occurred while decoding or encoding an image
    #[error("Image error: {0}")]
    ImageError(String),
    /// Error occurred during the build phase
    #[error("Build error: {0}")]
    BuildError(String),
    /// Error occurred due to invalid input parameters
    #[error("Validation error: {0}")]
    ValidationError(String),
    /// Two arrays that must share a resolution do not
    #[error("Shape mismatch in {context}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        context: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    /// A tap was read before the pass that should have filled it recorded anything
    #[error("Missing {kind} tap for layer '{layer}'")]
    MissingTap { layer: String, kind: &'static str },
    /// A tap was read or written for a pass other than the armed one
    #[error("Stale tap for layer '{layer}': requested pass {requested}, armed pass {armed:?}")]
    StaleTap {
        layer: String,
        requested: u64,
        armed: Option<u64>,
    },
    /// A previous request panicked while holding the inference session
    #[error("Inference session poisoned by an earlier failure")]
    SessionPoisoned,
}

impl ScreeningError {
    pub(crate) fn shape_mismatch(context: &'static str, expected: &[usize], actual: &[usize]) -> Self {
        ScreeningError::ShapeMismatch {
            context,
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }
}

impl From<ort::Error> for ScreeningError {
    fn from(err: ort::Error) -> Self {
        ScreeningError::ModelError(err.to_string())
    }
}

impl From<image::ImageError> for ScreeningError {
    fn from(err: image::ImageError) -> Self {
        ScreeningError::ImageError(err.to_string())
    }
}

impl From<serde_json::Error> for ScreeningError {
    fn from(err: serde_json::Error) -> Self {
        ScreeningError::BuildError(format!("Invalid classifier head file: {}", err))
    }
}

impl From<io::Error> for ScreeningError {
    fn from(err: io::Error) -> Self {
        ScreeningError::BuildError(err.to_string())
    }
}
