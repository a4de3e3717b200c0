use image::{GrayImage, Luma, RgbImage};
use imageproc::contrast::{otsu_level, threshold, ThresholdType};
use imageproc::distance_transform::Norm;
use imageproc::morphology::{close, open};
use imageproc::region_labelling::{connected_components, Connectivity};
use log::debug;
use ndarray::{Array2, Zip};

use super::error::ScreeningError;
use super::utils::{gaussian_blur, kernel_sigma};

/// Soft lung mask in [0, 1], same resolution as the image it was built from.
#[derive(Debug, Clone, PartialEq)]
pub struct LungMask {
    values: Array2<f32>,
}

impl LungMask {
    /// Wraps an existing soft mask; values are expected in [0, 1].
    pub fn from_values(values: Array2<f32>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &Array2<f32> {
        &self.values
    }

    /// `(height, width)`
    pub fn dim(&self) -> (usize, usize) {
        self.values.dim()
    }

    pub fn into_inner(self) -> Array2<f32> {
        self.values
    }
}

/// One filled ellipse of the anatomical prior, in fractions of image size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriorEllipse {
    /// Center as (x, y) fractions of (width, height)
    pub center: (f32, f32),
    /// Semi-axes as (x, y) fractions of (width, height)
    pub semi_axes: (f32, f32),
    /// Clockwise rotation in image coordinates, degrees
    pub angle_deg: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationConfig {
    /// Whether the image-derived mask takes part; the prior is always used
    pub use_precise_mask: bool,
    pub clahe_clip_limit: f32,
    /// Tiles per axis of the CLAHE grid
    pub clahe_tiles: u32,
    /// Disk radius of the closing element (25×25 kernel)
    pub close_radius: u8,
    /// Disk radius of the opening element (15×15 kernel)
    pub open_radius: u8,
    pub precise_blur_sigma: f32,
    pub precise_weight: f32,
    pub combined_blur_sigma: f32,
    pub prior: [PriorEllipse; 2],
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            use_precise_mask: true,
            clahe_clip_limit: 2.0,
            clahe_tiles: 8,
            close_radius: 12,
            open_radius: 7,
            precise_blur_sigma: kernel_sigma(21),
            precise_weight: 0.7,
            combined_blur_sigma: kernel_sigma(15),
            prior: [
                PriorEllipse {
                    center: (0.30, 0.50),
                    semi_axes: (0.12, 0.28),
                    angle_deg: 10.0,
                },
                PriorEllipse {
                    center: (0.70, 0.50),
                    semi_axes: (0.12, 0.28),
                    angle_deg: -10.0,
                },
            ],
        }
    }
}

/// Derives a lung mask from the raw X-ray, constrained by a fixed two-ellipse prior.
#[derive(Debug, Clone, Default)]
pub struct LungSegmenter {
    config: SegmentationConfig,
}

impl LungSegmenter {
    pub fn new(config: SegmentationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SegmentationConfig {
        &self.config
    }

    /// Builds `max(precise × weight, prior)`, blurred.
    pub fn segment(&self, image: &RgbImage) -> Result<LungMask, ScreeningError> {
        let (w, h) = image.dimensions();
        if w == 0 || h == 0 {
            return Err(ScreeningError::ValidationError("Cannot segment an empty image".into()));
        }
        let (h, w) = (h as usize, w as usize);

        let prior = anatomical_prior(h, w, &self.config.prior);
        let combined = if self.config.use_precise_mask {
            let precise = self.precise_mask(image)?;
            let weight = self.config.precise_weight;
            let mut combined = Array2::<f32>::zeros((h, w));
            Zip::from(&mut combined)
                .and(&precise)
                .and(&prior)
                .for_each(|out, &p, &a| *out = (p * weight).max(a));
            combined
        } else {
            prior
        };

        let smoothed = gaussian_blur(&combined, self.config.combined_blur_sigma)?;
        Ok(LungMask {
            values: smoothed.mapv(|v| v.clamp(0.0, 1.0)),
        })
    }

    /// CLAHE → Otsu → close → open → hole fill → blur, values in [0, 1].
    pub fn precise_mask(&self, image: &RgbImage) -> Result<Array2<f32>, ScreeningError> {
        let gray = to_gray(image);
        let enhanced = clahe(&gray, self.config.clahe_clip_limit, self.config.clahe_tiles);

        let level = otsu_level(&enhanced);
        debug!("Otsu threshold on enhanced image: {}", level);
        let binary = threshold(&enhanced, level, ThresholdType::Binary);

        let closed = close(&binary, Norm::L2, self.config.close_radius);
        let opened = open(&closed, Norm::L2, self.config.open_radius);
        let filled = fill_holes(&opened);

        let (w, h) = filled.dimensions();
        let silhouette = Array2::from_shape_fn((h as usize, w as usize), |(y, x)| {
            if filled.get_pixel(x as u32, y as u32)[0] > 0 {
                1.0
            } else {
                0.0
            }
        });
        gaussian_blur(&silhouette, self.config.precise_blur_sigma)
    }
}

/// ITU-R BT.601 luma, rounded.
pub fn to_gray(image: &RgbImage) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let [r, g, b] = image.get_pixel(x, y).0;
        let luma = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
        Luma([luma.round().clamp(0.0, 255.0) as u8])
    })
}

/// Contrast-limited adaptive histogram equalization over a `tiles × tiles` grid.
///
/// Each tile's histogram is clipped at `clip_limit × area / 256`, the excess is
/// spread over all bins, and pixels are mapped by bilinear interpolation of the
/// four nearest tile lookup tables.
pub fn clahe(gray: &GrayImage, clip_limit: f32, tiles: u32) -> GrayImage {
    let (w, h) = gray.dimensions();
    if w == 0 || h == 0 || tiles == 0 {
        return gray.clone();
    }
    let tile_w = w.div_ceil(tiles.min(w));
    let tile_h = h.div_ceil(tiles.min(h));
    let tiles_x = w.div_ceil(tile_w);
    let tiles_y = h.div_ceil(tile_h);

    let mut luts = vec![[0u8; 256]; (tiles_x * tiles_y) as usize];
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let x0 = tx * tile_w;
            let y0 = ty * tile_h;
            let x1 = (x0 + tile_w).min(w);
            let y1 = (y0 + tile_h).min(h);

            let mut hist = [0u32; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[gray.get_pixel(x, y)[0] as usize] += 1;
                }
            }
            let area = (x1 - x0) * (y1 - y0);
            luts[(ty * tiles_x + tx) as usize] = tile_lut(&mut hist, area, clip_limit);
        }
    }

    let inv_tw = 1.0 / tile_w as f32;
    let inv_th = 1.0 / tile_h as f32;
    GrayImage::from_fn(w, h, |x, y| {
        let v = gray.get_pixel(x, y)[0] as usize;

        let txf = x as f32 * inv_tw - 0.5;
        let tx1 = txf.floor();
        let xa = txf - tx1;
        let tx2 = ((tx1 as i64 + 1).min(tiles_x as i64 - 1)).max(0) as u32;
        let tx1 = (tx1 as i64).max(0) as u32;

        let tyf = y as f32 * inv_th - 0.5;
        let ty1 = tyf.floor();
        let ya = tyf - ty1;
        let ty2 = ((ty1 as i64 + 1).min(tiles_y as i64 - 1)).max(0) as u32;
        let ty1 = (ty1 as i64).max(0) as u32;

        let lut = |tx: u32, ty: u32| luts[(ty * tiles_x + tx) as usize][v] as f32;
        let top = lut(tx1, ty1) * (1.0 - xa) + lut(tx2, ty1) * xa;
        let bottom = lut(tx1, ty2) * (1.0 - xa) + lut(tx2, ty2) * xa;
        let value = top * (1.0 - ya) + bottom * ya;
        Luma([value.round().clamp(0.0, 255.0) as u8])
    })
}

fn tile_lut(hist: &mut [u32; 256], area: u32, clip_limit: f32) -> [u8; 256] {
    let mut lut = [0u8; 256];
    if area == 0 {
        return lut;
    }

    if clip_limit > 0.0 {
        let clip = ((clip_limit * area as f32 / 256.0) as u32).max(1);
        let mut excess = 0u32;
        for bin in hist.iter_mut() {
            if *bin > clip {
                excess += *bin - clip;
                *bin = clip;
            }
        }

        let per_bin = excess / 256;
        let mut residual = excess - per_bin * 256;
        for bin in hist.iter_mut() {
            *bin += per_bin;
        }
        if residual > 0 {
            let step = (256 / residual as usize).max(1);
            let mut i = 0;
            while i < 256 && residual > 0 {
                hist[i] += 1;
                residual -= 1;
                i += step;
            }
        }
    }

    let scale = 255.0 / area as f32;
    let mut cumulative = 0u32;
    for (i, &count) in hist.iter().enumerate() {
        cumulative += count;
        lut[i] = (cumulative as f32 * scale).round().clamp(0.0, 255.0) as u8;
    }
    lut
}

/// Fills background regions that do not touch the image border.
pub fn fill_holes(binary: &GrayImage) -> GrayImage {
    let (w, h) = binary.dimensions();
    // Labels every non-foreground pixel; foreground pixels get label 0.
    let labels = connected_components(binary, Connectivity::Four, Luma([255u8]));
    let max_label = labels.pixels().map(|p| p[0]).max().unwrap_or(0) as usize;

    let mut touches_border = vec![false; max_label + 1];
    for x in 0..w {
        touches_border[labels.get_pixel(x, 0)[0] as usize] = true;
        touches_border[labels.get_pixel(x, h - 1)[0] as usize] = true;
    }
    for y in 0..h {
        touches_border[labels.get_pixel(0, y)[0] as usize] = true;
        touches_border[labels.get_pixel(w - 1, y)[0] as usize] = true;
    }

    GrayImage::from_fn(w, h, |x, y| {
        let original = binary.get_pixel(x, y)[0];
        let label = labels.get_pixel(x, y)[0] as usize;
        if original == 255 || (label != 0 && !touches_border[label]) {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

/// Filled ellipses at fixed fractions of the image, 1.0 inside and 0.0 outside.
///
/// Depends only on `(height, width)`, never on pixel content.
pub fn anatomical_prior(height: usize, width: usize, ellipses: &[PriorEllipse]) -> Array2<f32> {
    let mut mask = Array2::<f32>::zeros((height, width));
    for ellipse in ellipses {
        let cx = (width as f32 * ellipse.center.0) as i64 as f32;
        let cy = (height as f32 * ellipse.center.1) as i64 as f32;
        let a = ((width as f32 * ellipse.semi_axes.0) as i64).max(1) as f32;
        let b = ((height as f32 * ellipse.semi_axes.1) as i64).max(1) as f32;
        let (sin, cos) = ellipse.angle_deg.to_radians().sin_cos();

        for ((y, x), value) in mask.indexed_iter_mut() {
            let dx = x as f32 - cx;
            let dy = y as f32 - cy;
            let u = dx * cos + dy * sin;
            let v = -dx * sin + dy * cos;
            if (u / a).powi(2) + (v / b).powi(2) <= 1.0 {
                *value = 1.0;
            }
        }
    }
    mask
}
