//! Chest X-ray tuberculosis screening with Grad-CAM++ localization.
//!
//! A [`Screener`] scores an X-ray with an ONNX backbone and a small classification
//! head. When the probability reaches 0.5 it also explains the score: Grad-CAM++
//! over the last feature block, restricted to a lung mask, rendered as a JET
//! heatmap over the image and summarized as named lung zones.
//!
//! # Basic Usage
//!
//! ```no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use drishti::{BuiltinModel, Screener};
//!
//! let screener = Screener::builder()
//!     .with_model(BuiltinModel::EfficientNetV2S)?
//!     .build()?;
//!
//! let bytes = std::fs::read("chest.png")?;
//! let report = screener.screen_bytes(&bytes)?;
//! println!("TB probability: {:.3}", report.probability);
//! println!("Affected regions: {:?}", report.affected_regions);
//! # Ok(())
//! # }
//! ```
//!
//! # Thread Safety
//!
//! The screener is `Send + Sync` and can be shared through `Arc`. Each call
//! runs its forward and backward passes inside one critical section of the
//! underlying [`InferenceSession`], so concurrent requests never see each
//! other's activations or gradients.

mod runtime;
pub mod model_manager;
pub mod models;
pub mod screening;
pub mod server;

pub use runtime::{create_session_builder, ExecutionDevice, RuntimeConfig};
pub use model_manager::{ModelManager, ModelError};
pub use models::{BuiltinModel, ModelCharacteristics, ModelInfo};
pub use screening::{
    InferenceSession, ModelAdapter, RegionLabel, Screener, ScreenerBuilder, ScreeningConfig, ScreeningError,
    ScreeningReport, XrayImage,
};

pub fn init_logger() {
    env_logger::init();
}
