use image::{Rgb, RgbImage};
use lazy_static::lazy_static;
use log::debug;
use ndarray::{s, Array2, Zip};
use serde::{Serialize, Serializer};

use super::attribution::SaliencyMap;
use super::error::ScreeningError;
use super::segmentation::LungMask;
use super::utils::{gaussian_blur, kernel_sigma, min_max_normalize};

/// Threshold for upper and middle zones.
pub const UPPER_ZONE_THRESHOLD: f32 = 0.45;
/// Stricter threshold for lower zones, which sit next to the diaphragm.
pub const LOWER_ZONE_THRESHOLD: f32 = 0.55;

/// Named lung zone reported when its masked saliency is high enough.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionLabel {
    LeftUpperLobe,
    RightUpperLobe,
    LeftMiddleZone,
    RightMiddleZone,
    LeftLowerLobe,
    RightLowerLobe,
}

impl RegionLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LeftUpperLobe => "left upper lobe",
            Self::RightUpperLobe => "right upper lobe",
            Self::LeftMiddleZone => "left middle zone",
            Self::RightMiddleZone => "right middle zone",
            Self::LeftLowerLobe => "left lower lobe",
            Self::RightLowerLobe => "right lower lobe",
        }
    }
}

impl std::fmt::Display for RegionLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for RegionLabel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Rectangular zone as half-open fractions of image height (rows) and width (cols).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Zone {
    pub label: RegionLabel,
    pub rows: (f64, f64),
    pub cols: (f64, f64),
    pub threshold: f32,
}

impl Zone {
    /// Pixel bounds `(row0, row1, col0, col1)`, truncating like integer casts.
    pub fn bounds(&self, height: usize, width: usize) -> (usize, usize, usize, usize) {
        let at = |frac: f64, size: usize| ((size as f64 * frac) as usize).min(size);
        (
            at(self.rows.0, height),
            at(self.rows.1, height),
            at(self.cols.0, width),
            at(self.cols.1, width),
        )
    }
}

/// Canonical zone order; detected regions are reported in this order.
pub const ZONES: [Zone; 6] = [
    Zone {
        label: RegionLabel::LeftUpperLobe,
        rows: (0.20, 0.45),
        cols: (0.15, 0.45),
        threshold: UPPER_ZONE_THRESHOLD,
    },
    Zone {
        label: RegionLabel::RightUpperLobe,
        rows: (0.20, 0.45),
        cols: (0.55, 0.85),
        threshold: UPPER_ZONE_THRESHOLD,
    },
    Zone {
        label: RegionLabel::LeftMiddleZone,
        rows: (0.45, 0.65),
        cols: (0.15, 0.45),
        threshold: UPPER_ZONE_THRESHOLD,
    },
    Zone {
        label: RegionLabel::RightMiddleZone,
        rows: (0.45, 0.65),
        cols: (0.55, 0.85),
        threshold: UPPER_ZONE_THRESHOLD,
    },
    Zone {
        label: RegionLabel::LeftLowerLobe,
        rows: (0.65, 0.80),
        cols: (0.15, 0.45),
        threshold: LOWER_ZONE_THRESHOLD,
    },
    Zone {
        label: RegionLabel::RightLowerLobe,
        rows: (0.65, 0.80),
        cols: (0.55, 0.85),
        threshold: LOWER_ZONE_THRESHOLD,
    },
];

/// Zones whose maximum masked saliency is strictly above their threshold.
/// An empty zone never counts as affected.
pub fn affected_regions(masked: &Array2<f32>) -> Vec<RegionLabel> {
    let (h, w) = masked.dim();
    ZONES
        .iter()
        .filter(|zone| {
            let (r0, r1, c0, c1) = zone.bounds(h, w);
            if r0 >= r1 || c0 >= c1 {
                return false;
            }
            masked
                .slice(s![r0..r1, c0..c1])
                .iter()
                .any(|&v| v > zone.threshold)
        })
        .map(|zone| zone.label)
        .collect()
}

/// Maps an 8-bit intensity to an RGB triple.
pub trait Colormap: Send + Sync {
    fn color(&self, level: u8) -> [u8; 3];
}

lazy_static! {
    static ref JET_LUT: [[u8; 3]; 256] = {
        let mut lut = [[0u8; 3]; 256];
        for (i, entry) in lut.iter_mut().enumerate() {
            let x = i as f32 / 255.0;
            let channel = |offset: f32| {
                let v = (4.0 * x - offset).min(-4.0 * x + offset + 3.0);
                (v.clamp(0.0, 1.0) * 255.0).round() as u8
            };
            *entry = [channel(1.5), channel(0.5), channel(-0.5)];
        }
        lut
    };
}

/// Blue → cyan → green → yellow → red. Level 0 is RGB (0, 0, 128).
#[derive(Debug, Clone, Copy, Default)]
pub struct Jet;

impl Colormap for Jet {
    fn color(&self, level: u8) -> [u8; 3] {
        JET_LUT[level as usize]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeatmapConfig {
    /// Heatmaps are produced only when the probability is at least this value
    pub gate: f32,
    /// Weight of the false-color image in the overlay
    pub alpha: f32,
    /// Light smoothing of the masked saliency (5×5 kernel)
    pub smoothing_sigma: f32,
}

impl Default for HeatmapConfig {
    fn default() -> Self {
        Self {
            gate: 0.5,
            alpha: 0.5,
            smoothing_sigma: kernel_sigma(5),
        }
    }
}

impl HeatmapConfig {
    pub fn should_render(&self, probability: f32) -> bool {
        probability >= self.gate
    }
}

/// Everything the compositor derives from one saliency/mask pair.
#[derive(Debug, Clone)]
pub struct Composite {
    /// Normalized saliency × mask, smoothed and renormalized to [0, 1]
    pub masked_saliency: Array2<f32>,
    /// False-color rendering of `masked_saliency`
    pub saliency_image: RgbImage,
    /// `saliency_image` alpha-blended over the original
    pub overlay_image: RgbImage,
    /// Affected zones in canonical order
    pub regions: Vec<RegionLabel>,
}

#[derive(Debug, Clone, Default)]
pub struct HeatmapCompositor<C: Colormap = Jet> {
    config: HeatmapConfig,
    colormap: C,
}

impl HeatmapCompositor<Jet> {
    pub fn new(config: HeatmapConfig) -> Self {
        Self { config, colormap: Jet }
    }
}

impl<C: Colormap> HeatmapCompositor<C> {
    pub fn with_colormap(config: HeatmapConfig, colormap: C) -> Self {
        Self { config, colormap }
    }

    pub fn config(&self) -> &HeatmapConfig {
        &self.config
    }

    /// Merges saliency and lung mask over `original`.
    ///
    /// # Errors
    /// - `ShapeMismatch` if saliency, mask and image resolutions differ
    pub fn compose(
        &self,
        saliency: &SaliencyMap,
        mask: &LungMask,
        original: &RgbImage,
    ) -> Result<Composite, ScreeningError> {
        let image_dim = (original.height() as usize, original.width() as usize);
        if saliency.dim() != image_dim {
            return Err(ScreeningError::shape_mismatch(
                "saliency vs image",
                &[image_dim.0, image_dim.1],
                &[saliency.dim().0, saliency.dim().1],
            ));
        }
        if mask.dim() != image_dim {
            return Err(ScreeningError::shape_mismatch(
                "lung mask vs image",
                &[image_dim.0, image_dim.1],
                &[mask.dim().0, mask.dim().1],
            ));
        }

        let normalized = min_max_normalize(saliency.values());
        let mut masked = Array2::<f32>::zeros(image_dim);
        Zip::from(&mut masked)
            .and(&normalized)
            .and(mask.values())
            .for_each(|out, &s, &m| *out = s * m);
        let smoothed = gaussian_blur(&masked, self.config.smoothing_sigma)?;
        let masked_saliency = min_max_normalize(&smoothed);

        let saliency_image = self.colorize(&masked_saliency);
        let overlay_image = blend(original, &saliency_image, self.config.alpha)?;
        let regions = affected_regions(&masked_saliency);
        debug!("Affected regions: {:?}", regions);

        Ok(Composite {
            masked_saliency,
            saliency_image,
            overlay_image,
            regions,
        })
    }

    /// False-color image of a [0, 1] map; levels truncate toward zero.
    pub fn colorize(&self, map: &Array2<f32>) -> RgbImage {
        let (h, w) = map.dim();
        RgbImage::from_fn(w as u32, h as u32, |x, y| {
            let level = (map[[y as usize, x as usize]].clamp(0.0, 1.0) * 255.0) as u8;
            Rgb(self.colormap.color(level))
        })
    }
}

/// `(1 - alpha) × original + alpha × heatmap`, truncated to u8.
pub fn blend(original: &RgbImage, heatmap: &RgbImage, alpha: f32) -> Result<RgbImage, ScreeningError> {
    if original.dimensions() != heatmap.dimensions() {
        let (ow, oh) = original.dimensions();
        let (hw, hh) = heatmap.dimensions();
        return Err(ScreeningError::shape_mismatch(
            "overlay blend",
            &[oh as usize, ow as usize],
            &[hh as usize, hw as usize],
        ));
    }
    let alpha = alpha.clamp(0.0, 1.0);
    let mut out = RgbImage::new(original.width(), original.height());
    for (dst, (o, h)) in out.pixels_mut().zip(original.pixels().zip(heatmap.pixels())) {
        for c in 0..3 {
            let v = (1.0 - alpha) * o[c] as f32 + alpha * h[c] as f32;
            dst[c] = v.clamp(0.0, 255.0) as u8;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Flat([u8; 3]);

    impl Colormap for Flat {
        fn color(&self, _level: u8) -> [u8; 3] {
            self.0
        }
    }

    fn map_with(h: usize, w: usize, row: usize, col: usize, value: f32) -> Array2<f32> {
        let mut map = Array2::zeros((h, w));
        map[[row, col]] = value;
        map
    }

    #[test]
    fn test_jet_endpoints() {
        assert_eq!(Jet.color(0), [0, 0, 128]);
        assert_eq!(Jet.color(255), [128, 0, 0]);
        let mid = Jet.color(128);
        assert!(mid[1] > 200, "middle of the palette is green-ish: {:?}", mid);
    }

    #[test]
    fn test_left_upper_lobe_just_above_threshold() {
        // Row 150 / col 100 of 512 lies only in the left upper lobe zone.
        let map = map_with(512, 512, 150, 100, 0.46);
        assert_eq!(affected_regions(&map), vec![RegionLabel::LeftUpperLobe]);
    }

    #[test]
    fn test_threshold_is_strict() {
        let map = map_with(512, 512, 150, 100, 0.45);
        assert!(affected_regions(&map).is_empty());
    }

    #[test]
    fn test_lower_zone_uses_stricter_threshold() {
        let lower = map_with(512, 512, 360, 100, 0.50);
        assert!(affected_regions(&lower).is_empty());

        let upper = map_with(512, 512, 150, 100, 0.50);
        assert_eq!(affected_regions(&upper), vec![RegionLabel::LeftUpperLobe]);

        let lower_hot = map_with(512, 512, 360, 300, 0.56);
        assert_eq!(affected_regions(&lower_hot), vec![RegionLabel::RightLowerLobe]);
    }

    #[test]
    fn test_regions_follow_canonical_order() {
        let mut map = Array2::zeros((512, 512));
        map[[360, 300]] = 1.0; // right lower lobe
        map[[150, 100]] = 0.5; // left upper lobe
        map[[280, 300]] = 0.9; // right middle zone
        assert_eq!(
            affected_regions(&map),
            vec![
                RegionLabel::LeftUpperLobe,
                RegionLabel::RightMiddleZone,
                RegionLabel::RightLowerLobe
            ]
        );
    }

    #[test]
    fn test_zone_bounds_truncate() {
        assert_eq!(ZONES[0].bounds(512, 512), (102, 230, 76, 230));
        assert_eq!(ZONES[5].bounds(512, 512), (332, 409, 281, 435));
    }

    #[test]
    fn test_tiny_image_has_no_regions() {
        let map = Array2::from_elem((2, 2), 1.0);
        assert!(affected_regions(&map).is_empty());
    }

    #[test]
    fn test_blend_arithmetic() {
        let original = RgbImage::from_fn(4, 4, |x, y| Rgb([(x * 60) as u8, (y * 60) as u8, 201]));
        let heat = RgbImage::from_pixel(4, 4, Rgb([10, 20, 30]));
        let overlay = blend(&original, &heat, 0.5).unwrap();
        for (o, b) in original.pixels().zip(overlay.pixels()) {
            for c in 0..3 {
                let expected = (0.5 * o[c] as f32 + 0.5 * heat.get_pixel(0, 0)[c] as f32) as u8;
                assert_eq!(b[c], expected);
            }
        }
        assert_eq!(overlay.get_pixel(0, 0).0, [5, 10, 115]);
    }

    #[test]
    fn test_zero_alpha_returns_original() {
        let original = RgbImage::from_fn(8, 8, |x, y| Rgb([x as u8 * 30, y as u8 * 30, 77]));
        let heat = RgbImage::from_pixel(8, 8, Rgb([255, 0, 0]));
        assert_eq!(blend(&original, &heat, 0.0).unwrap(), original);
    }

    #[test]
    fn test_zero_saliency_composite() {
        let original = RgbImage::from_pixel(32, 32, Rgb([100, 150, 201]));
        let compositor = HeatmapCompositor::with_colormap(HeatmapConfig::default(), Flat([0, 0, 128]));
        let saliency = SaliencyMap::from_values(Array2::zeros((32, 32)));
        let mask = LungMask::from_values(Array2::ones((32, 32)));
        let composite = compositor.compose(&saliency, &mask, &original).unwrap();

        assert!(composite.masked_saliency.iter().all(|&v| v == 0.0));
        assert!(composite.regions.is_empty());
        assert!(composite.overlay_image.pixels().all(|p| p.0 == [50, 75, 164]));
    }

    #[test]
    fn test_mask_suppresses_saliency_outside_lungs() {
        let original = RgbImage::from_pixel(64, 64, Rgb([0, 0, 0]));
        let mut saliency = Array2::zeros((64, 64));
        saliency[[20, 5]] = 1.0; // outside every zone
        saliency[[20, 15]] = 0.6; // left upper lobe
        let mut mask = Array2::zeros((64, 64));
        mask.slice_mut(s![10..30, 10..30]).fill(1.0);

        let composite = HeatmapCompositor::new(HeatmapConfig::default())
            .compose(&SaliencyMap::from_values(saliency), &LungMask::from_values(mask), &original)
            .unwrap();
        assert!(composite.masked_saliency[[20, 5]] < composite.masked_saliency[[20, 15]]);
        assert_eq!(composite.regions, vec![RegionLabel::LeftUpperLobe]);
    }

    #[test]
    fn test_mismatched_mask_fails_fast() {
        let original = RgbImage::new(16, 16);
        let saliency = SaliencyMap::from_values(Array2::zeros((16, 16)));
        let mask = LungMask::from_values(Array2::zeros((16, 8)));
        let result = HeatmapCompositor::new(HeatmapConfig::default()).compose(&saliency, &mask, &original);
        assert!(matches!(result, Err(ScreeningError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_gate_is_inclusive() {
        let config = HeatmapConfig::default();
        assert!(config.should_render(0.5));
        assert!(!config.should_render(0.4999));
    }
}
