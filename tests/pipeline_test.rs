mod common;

use std::sync::Arc;
use std::thread;

use common::{init, png_bytes, synthetic_xray, StubModel};
use drishti::screening::{PipelineStage, UrgencyLevel};
use drishti::{RegionLabel, Screener, ScreeningConfig, ScreeningError, XrayImage};

fn screener(probability: f32, input_size: u32) -> Screener {
    Screener::builder()
        .with_adapter(StubModel::boxed(probability, input_size))
        .unwrap()
        .build()
        .unwrap()
}

#[test]
fn test_end_to_end_positive_screen() -> Result<(), Box<dyn std::error::Error>> {
    init();
    let screener = screener(0.82, 512);
    let image = XrayImage::from_rgb(synthetic_xray(512))?;

    let report = screener.screen(&image)?;
    assert_eq!(report.urgency, UrgencyLevel::Critical);
    assert_eq!(report.assessment.classification.as_str(), "TB Positive (High Confidence)");
    assert_eq!(*report.stages.last().unwrap(), PipelineStage::Done);

    let heatmap = report.heatmap.as_ref().expect("heatmap above the gate");
    assert_eq!(heatmap.overlay_image.dimensions(), (512, 512));
    assert_eq!(heatmap.saliency_image.dimensions(), (512, 512));
    assert_eq!(heatmap.mask.dim(), (512, 512));
    assert!(heatmap.masked_saliency.iter().all(|&v| (0.0..=1.0).contains(&v)));
    assert!(heatmap.mask.values().iter().all(|&v| (0.0..=1.0).contains(&v)));

    assert!(report.affected_regions.contains(&RegionLabel::LeftUpperLobe));
    assert!(report.heatmap_explanation.contains("left upper lobe"));
    Ok(())
}

#[test]
fn test_gate_boundary_is_inclusive() -> Result<(), Box<dyn std::error::Error>> {
    init();
    let image = XrayImage::from_rgb(synthetic_xray(128))?;

    let at_gate = screener(0.5, 128).screen(&image)?;
    assert!(at_gate.heatmap.is_some());

    let below = screener(0.4999, 128).screen(&image)?;
    assert!(below.heatmap.is_none());
    assert!(below.affected_regions.is_empty());
    assert!(below.stages.contains(&PipelineStage::Skipped));
    assert!(!below.stages.contains(&PipelineStage::Attributed));
    Ok(())
}

#[test]
fn test_upload_bytes_are_resized_to_model_input() -> Result<(), Box<dyn std::error::Error>> {
    init();
    let bytes = png_bytes(&synthetic_xray(200));
    let report = screener(0.9, 128).screen_bytes(&bytes)?;
    let heatmap = report.heatmap.expect("heatmap above the gate");
    assert_eq!(heatmap.overlay_image.dimensions(), (128, 128));
    Ok(())
}

#[test]
fn test_prior_only_segmentation() -> Result<(), Box<dyn std::error::Error>> {
    init();
    let mut config = ScreeningConfig::default();
    config.segmentation.use_precise_mask = false;

    let screener = Screener::builder()
        .with_config(config)
        .with_adapter(StubModel::boxed(0.9, 128))?
        .build()?;

    let bright = XrayImage::from_rgb(synthetic_xray(128))?;
    let dark = XrayImage::from_rgb(image::RgbImage::new(128, 128))?;
    let a = screener.screen(&bright)?.heatmap.expect("heatmap");
    let b = screener.screen(&dark)?.heatmap.expect("heatmap");
    assert_eq!(a.mask, b.mask);
    Ok(())
}

#[test]
fn test_empty_upload_fails() {
    init();
    let result = screener(0.9, 64).screen_bytes(&[]);
    assert!(matches!(result, Err(ScreeningError::ValidationError(_))));
}

#[test]
fn test_concurrent_requests_do_not_interleave() {
    init();
    let screener = Arc::new(screener(0.75, 64));
    let image = Arc::new(XrayImage::from_rgb(synthetic_xray(64)).unwrap());

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let screener = Arc::clone(&screener);
            let image = Arc::clone(&image);
            thread::spawn(move || screener.screen(&image).unwrap())
        })
        .collect();

    let reports: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let first = reports[0].heatmap.as_ref().unwrap();
    for report in &reports[1..] {
        let heatmap = report.heatmap.as_ref().unwrap();
        assert_eq!(heatmap.saliency, first.saliency);
        assert_eq!(report.affected_regions, reports[0].affected_regions);
    }
}
