use image::RgbImage;
use log::{debug, info};
use ndarray::Array2;
use serde::Serialize;

use super::adapter::LayerTaps;
use super::assessment::{heatmap_explanation, Assessment, UrgencyLevel};
use super::attribution::{GradCamPlusPlus, SaliencyMap};
use super::compositor::{HeatmapCompositor, HeatmapConfig, RegionLabel};
use super::error::ScreeningError;
use super::segmentation::{LungMask, LungSegmenter, SegmentationConfig};
use super::session::InferenceSession;
use super::xray::XrayImage;

/// Tunables of the attribution-to-overlay chain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScreeningConfig {
    pub segmentation: SegmentationConfig,
    pub heatmap: HeatmapConfig,
}

/// Per-request progress. Requests never share or persist a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Idle,
    Preprocessed,
    Scored,
    HeatmapPending,
    Skipped,
    Attributed,
    Segmented,
    Composited,
    Done,
}

/// Heatmap artifacts; produced together or not at all.
#[derive(Debug, Clone)]
pub struct HeatmapOutputs {
    pub saliency_image: RgbImage,
    pub overlay_image: RgbImage,
    pub saliency: SaliencyMap,
    pub mask: LungMask,
    pub masked_saliency: Array2<f32>,
}

#[derive(Debug, Clone)]
pub struct ScreeningReport {
    pub probability: f32,
    pub assessment: Assessment,
    pub urgency: UrgencyLevel,
    pub affected_regions: Vec<RegionLabel>,
    pub heatmap_explanation: String,
    pub heatmap: Option<HeatmapOutputs>,
    pub device: String,
    pub stages: Vec<PipelineStage>,
}

impl ScreeningReport {
    pub fn recommendations(&self) -> &'static [&'static str; 5] {
        self.urgency.recommendations()
    }
}

/// Information about a screener's model and configuration
#[derive(Debug, Clone)]
pub struct ScreenerInfo {
    pub target_layer: String,
    pub input_size: u32,
    pub device: String,
    pub config: ScreeningConfig,
}

/// Scores chest X-rays and, for positive screens, localizes the evidence.
///
/// Share across threads with `Arc`; the model itself is only ever touched
/// inside the session's critical section.
#[derive(Debug)]
pub struct Screener {
    session: InferenceSession,
    config: ScreeningConfig,
    attribution: GradCamPlusPlus,
    segmenter: LungSegmenter,
    compositor: HeatmapCompositor,
}

// Compile-time verification of thread-safety
const _: () = {
    fn assert_send_sync<T: Send + Sync>() {}
    fn verify_thread_safety() {
        assert_send_sync::<Screener>();
    }
};

struct StageLog(Vec<PipelineStage>);

impl StageLog {
    fn new() -> Self {
        Self(vec![PipelineStage::Idle])
    }

    fn enter(&mut self, stage: PipelineStage) {
        debug!("Pipeline stage: {:?}", stage);
        self.0.push(stage);
    }
}

impl Screener {
    /// Creates a new ScreenerBuilder for fluent construction
    pub fn builder() -> super::builder::ScreenerBuilder {
        super::builder::ScreenerBuilder::new()
    }

    pub fn new(session: InferenceSession, config: ScreeningConfig) -> Self {
        Self {
            session,
            segmenter: LungSegmenter::new(config.segmentation.clone()),
            compositor: HeatmapCompositor::new(config.heatmap.clone()),
            attribution: GradCamPlusPlus,
            config,
        }
    }

    pub fn info(&self) -> ScreenerInfo {
        ScreenerInfo {
            target_layer: self.session.target_layer().to_string(),
            input_size: self.session.input_size(),
            device: self.session.device().to_string(),
            config: self.config.clone(),
        }
    }

    pub fn input_size(&self) -> u32 {
        self.session.input_size()
    }

    pub fn device(&self) -> &str {
        self.session.device()
    }

    /// Decodes an upload and screens it.
    pub fn screen_bytes(&self, bytes: &[u8]) -> Result<ScreeningReport, ScreeningError> {
        let image = XrayImage::from_bytes(bytes, self.session.input_size())?;
        self.screen(&image)
    }

    /// Screens one image at the model's input resolution.
    ///
    /// The probability comes from a plain forward pass. When it reaches the
    /// heatmap gate, a forward/backward pass runs in the same critical section
    /// and its taps drive Grad-CAM++, segmentation and compositing. Below the
    /// gate no heatmap, regions or taps are produced.
    ///
    /// # Errors
    /// Any stage failure aborts the request; there are no retries.
    pub fn screen(&self, image: &XrayImage) -> Result<ScreeningReport, ScreeningError> {
        let size = self.session.input_size() as usize;
        if image.shape() != (size, size) {
            let (h, w) = image.shape();
            return Err(ScreeningError::shape_mismatch("image vs model input", &[size, size], &[h, w]));
        }

        let mut stages = StageLog::new();
        let tensor = image.to_tensor();
        stages.enter(PipelineStage::Preprocessed);

        let gate = &self.config.heatmap;
        let (probability, taps) = self.session.with_exclusive(|model| {
            let probability = model.forward(&tensor)?;
            if !gate.should_render(probability) {
                return Ok((probability, None::<LayerTaps>));
            }
            let pass = model.forward_backward(&tensor)?;
            Ok((probability, Some(pass.taps)))
        })?;
        stages.enter(PipelineStage::Scored);
        info!("TB probability: {:.4}", probability);

        let assessment = Assessment::from_probability(probability);
        let urgency = UrgencyLevel::from_probability(probability);
        info!(
            "Classification: {} (risk {:?}, urgency {})",
            assessment.classification.as_str(),
            assessment.risk_level,
            urgency.as_str()
        );

        let heatmap = match taps {
            Some(taps) => {
                stages.enter(PipelineStage::HeatmapPending);
                Some(self.localize(image, &taps, &mut stages)?)
            }
            None => {
                stages.enter(PipelineStage::Skipped);
                info!("Skipping heatmap (probability below {})", gate.gate);
                None
            }
        };

        let affected_regions = heatmap
            .as_ref()
            .map(|(_, regions)| regions.clone())
            .unwrap_or_default();
        stages.enter(PipelineStage::Done);

        Ok(ScreeningReport {
            probability,
            assessment,
            urgency,
            heatmap_explanation: heatmap_explanation(&affected_regions),
            affected_regions,
            heatmap: heatmap.map(|(outputs, _)| outputs),
            device: self.session.device().to_string(),
            stages: stages.0,
        })
    }

    fn localize(
        &self,
        image: &XrayImage,
        taps: &LayerTaps,
        stages: &mut StageLog,
    ) -> Result<(HeatmapOutputs, Vec<RegionLabel>), ScreeningError> {
        let (h, w) = image.shape();
        let saliency = self.attribution.attribute(taps, h, w)?;
        stages.enter(PipelineStage::Attributed);

        let mask = self.segmenter.segment(image.rgb())?;
        stages.enter(PipelineStage::Segmented);

        let composite = self.compositor.compose(&saliency, &mask, image.rgb())?;
        stages.enter(PipelineStage::Composited);
        info!("Affected regions: {:?}", composite.regions);

        Ok((
            HeatmapOutputs {
                saliency_image: composite.saliency_image,
                overlay_image: composite.overlay_image,
                saliency,
                mask,
                masked_saliency: composite.masked_saliency,
            },
            composite.regions,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::screening::adapter::{ForwardPass, ModelAdapter, TapSlot};
    use image::Rgb;
    use ndarray::{Array3, Array4};

    struct FixedModel {
        probability: f32,
        taps: TapSlot,
    }

    impl FixedModel {
        fn boxed(probability: f32) -> Box<dyn ModelAdapter> {
            Box::new(Self {
                probability,
                taps: TapSlot::new("features"),
            })
        }
    }

    impl ModelAdapter for FixedModel {
        fn target_layer(&self) -> &str {
            self.taps.layer()
        }

        fn input_size(&self) -> u32 {
            64
        }

        fn forward(&mut self, _input: &Array4<f32>) -> Result<f32, ScreeningError> {
            Ok(self.probability)
        }

        fn forward_backward(&mut self, _input: &Array4<f32>) -> Result<ForwardPass, ScreeningError> {
            let pass = self.taps.arm();
            let activations = Array3::from_shape_fn((2, 4, 4), |(c, y, x)| (c + y + x) as f32);
            self.taps.record_activations(pass, activations)?;
            self.taps.record_gradients(pass, Array3::from_elem((2, 4, 4), 0.25))?;
            Ok(ForwardPass {
                probability: self.probability,
                taps: self.taps.take(pass)?,
            })
        }
    }

    fn screener(probability: f32) -> Screener {
        Screener::new(InferenceSession::new(FixedModel::boxed(probability)), ScreeningConfig::default())
    }

    fn xray(size: u32) -> XrayImage {
        XrayImage::from_rgb(RgbImage::from_fn(size, size, |x, _| Rgb([(x * 3) as u8; 3]))).unwrap()
    }

    #[test]
    fn test_positive_screen_runs_every_stage() {
        let report = screener(0.9).screen(&xray(64)).unwrap();
        assert_eq!(
            report.stages,
            vec![
                PipelineStage::Idle,
                PipelineStage::Preprocessed,
                PipelineStage::Scored,
                PipelineStage::HeatmapPending,
                PipelineStage::Attributed,
                PipelineStage::Segmented,
                PipelineStage::Composited,
                PipelineStage::Done,
            ]
        );
        let heatmap = report.heatmap.expect("heatmap for positive screen");
        assert_eq!(heatmap.overlay_image.dimensions(), (64, 64));
        assert_eq!(heatmap.saliency.dim(), (64, 64));
        assert_eq!(report.device, "cpu");
    }

    #[test]
    fn test_negative_screen_skips_heatmap() {
        let report = screener(0.2).screen(&xray(64)).unwrap();
        assert!(report.heatmap.is_none());
        assert!(report.affected_regions.is_empty());
        assert_eq!(report.stages[3], PipelineStage::Skipped);
        assert_eq!(report.urgency, UrgencyLevel::Low);
        assert!(report.heatmap_explanation.starts_with("The AI analysis shows no significant"));
    }

    #[test]
    fn test_wrong_resolution_is_rejected() {
        let result = screener(0.9).screen(&xray(32));
        assert!(matches!(result, Err(ScreeningError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_garbage_bytes_fail() {
        let result = screener(0.9).screen_bytes(b"not an image");
        assert!(matches!(result, Err(ScreeningError::ImageError(_))));
    }
}
