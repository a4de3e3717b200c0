use image::imageops::FilterType;
use image::RgbImage;
use log::debug;
use ndarray::Array4;

use super::error::ScreeningError;

/// A decoded chest X-ray, resized to the model's square input resolution.
///
/// Never mutated after construction; the model tensor and every display image
/// are derived from `rgb` as new values.
#[derive(Debug, Clone)]
pub struct XrayImage {
    rgb: RgbImage,
    original_size: (u32, u32),
}

impl XrayImage {
    /// Decodes an uploaded image and resizes it to `input_size × input_size`.
    ///
    /// # Errors
    /// - `ValidationError` if the buffer is empty or `input_size` is zero
    /// - `ImageError` if the bytes are not a supported image format
    pub fn from_bytes(bytes: &[u8], input_size: u32) -> Result<Self, ScreeningError> {
        if bytes.is_empty() {
            return Err(ScreeningError::ValidationError("Image data cannot be empty".into()));
        }
        if input_size == 0 {
            return Err(ScreeningError::ValidationError("Input size must be positive".into()));
        }
        let decoded = image::load_from_memory(bytes)?;
        let original_size = (decoded.width(), decoded.height());
        debug!("Original image size: {:?}", original_size);

        let rgb = decoded.to_rgb8();
        let rgb = image::imageops::resize(&rgb, input_size, input_size, FilterType::Lanczos3);
        Ok(Self { rgb, original_size })
    }

    /// Wraps an RGB image that already has the model's input resolution.
    pub fn from_rgb(rgb: RgbImage) -> Result<Self, ScreeningError> {
        if rgb.width() == 0 || rgb.height() == 0 {
            return Err(ScreeningError::ValidationError("Image must not be empty".into()));
        }
        let original_size = rgb.dimensions();
        Ok(Self { rgb, original_size })
    }

    pub fn rgb(&self) -> &RgbImage {
        &self.rgb
    }

    /// Width and height as uploaded, before resizing.
    pub fn original_size(&self) -> (u32, u32) {
        self.original_size
    }

    /// `(height, width)` of the working resolution.
    pub fn shape(&self) -> (usize, usize) {
        (self.rgb.height() as usize, self.rgb.width() as usize)
    }

    /// Model input in NCHW layout, values scaled to [0, 1].
    pub fn to_tensor(&self) -> Array4<f32> {
        let (h, w) = self.shape();
        Array4::from_shape_fn((1, 3, h, w), |(_, c, y, x)| {
            self.rgb.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        })
    }
}
