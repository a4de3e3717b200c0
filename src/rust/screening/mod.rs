mod error;
pub mod adapter;
pub mod assessment;
pub mod attribution;
pub mod builder;
pub mod compositor;
mod head;
mod onnx;
pub mod screener;
pub mod segmentation;
mod session;
pub mod utils;
mod xray;

pub use error::ScreeningError;
pub use adapter::{ForwardPass, LayerTaps, ModelAdapter, TapSlot};
pub use assessment::{Assessment, Classification, RiskLevel, UrgencyLevel};
pub use attribution::{GradCamPlusPlus, SaliencyMap};
pub use builder::ScreenerBuilder;
pub use compositor::{Colormap, Composite, HeatmapCompositor, HeatmapConfig, Jet, RegionLabel, Zone, ZONES};
pub use head::{ClassifierHead, HeadWeights};
pub use onnx::OnnxModel;
pub use screener::{HeatmapOutputs, PipelineStage, Screener, ScreenerInfo, ScreeningConfig, ScreeningReport};
pub use segmentation::{LungMask, LungSegmenter, PriorEllipse, SegmentationConfig};
pub use session::InferenceSession;
pub use xray::XrayImage;
