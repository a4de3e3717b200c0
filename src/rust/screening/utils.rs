use image::imageops::{self, FilterType};
use image::{ImageBuffer, Luma};
use imageproc::filter::gaussian_blur_f32;
use ndarray::Array2;

use super::error::ScreeningError;

pub(crate) type GrayF32 = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Sigma OpenCV derives for a Gaussian kernel of the given odd size when sigma is 0.
pub fn kernel_sigma(ksize: u32) -> f32 {
    0.3 * ((ksize as f32 - 1.0) * 0.5 - 1.0) + 0.8
}

/// Min-max normalizes into [0, 1]. A uniform map (including all-zero) becomes
/// all-zero instead of dividing by a zero range.
pub fn min_max_normalize(map: &Array2<f32>) -> Array2<f32> {
    let (min, max) = min_max(map);
    let mut out = map.mapv(|v| v - min);
    let range = max - min;
    if range > 0.0 {
        out.mapv_inplace(|v| v / range);
    }
    out
}

pub(crate) fn min_max(map: &Array2<f32>) -> (f32, f32) {
    if map.is_empty() {
        return (0.0, 0.0);
    }
    map.iter().fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
        (lo.min(v), hi.max(v))
    })
}

pub(crate) fn array_to_gray_f32(map: &Array2<f32>) -> GrayF32 {
    let (h, w) = map.dim();
    ImageBuffer::from_fn(w as u32, h as u32, |x, y| Luma([map[[y as usize, x as usize]]]))
}

pub(crate) fn gray_f32_to_array(img: &GrayF32) -> Result<Array2<f32>, ScreeningError> {
    let (w, h) = img.dimensions();
    Array2::from_shape_vec((h as usize, w as usize), img.as_raw().clone())
        .map_err(|e| ScreeningError::ValidationError(format!("Failed to reshape image buffer: {}", e)))
}

/// Gaussian blur of a single-channel float map. A non-positive sigma is a no-op.
pub fn gaussian_blur(map: &Array2<f32>, sigma: f32) -> Result<Array2<f32>, ScreeningError> {
    if map.is_empty() || sigma <= 0.0 {
        return Ok(map.clone());
    }
    let blurred = gaussian_blur_f32(&array_to_gray_f32(map), sigma);
    gray_f32_to_array(&blurred)
}

/// Bilinear resize of a single-channel float map to `height × width`.
pub fn resize_bilinear(map: &Array2<f32>, height: usize, width: usize) -> Result<Array2<f32>, ScreeningError> {
    if map.dim() == (height, width) {
        return Ok(map.clone());
    }
    if map.is_empty() {
        return Err(ScreeningError::ValidationError("Cannot resize an empty map".into()));
    }
    let resized = imageops::resize(&array_to_gray_f32(map), width as u32, height as u32, FilterType::Triangle);
    gray_f32_to_array(&resized)
}
