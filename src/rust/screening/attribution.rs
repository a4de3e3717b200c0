use log::debug;
use ndarray::{Array2, Array3, Axis, Zip};

use super::adapter::LayerTaps;
use super::error::ScreeningError;
use super::utils::{min_max_normalize, resize_bilinear};

/// Single-channel saliency in [0, 1], at image resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct SaliencyMap {
    values: Array2<f32>,
}

impl SaliencyMap {
    /// Wraps an existing map; values are expected in [0, 1].
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

/// Grad-CAM++ over the taps of one forward/backward pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct GradCamPlusPlus;

impl GradCamPlusPlus {
    /// Builds a saliency map of `height × width` from `taps`.
    ///
    /// Per channel `c`, with `g = ∂y/∂A` and `S_c = Σ_ij A_cij g_cij³`:
    /// `α_cij = g² / (2g² + S_c)` (denominator 1 where it is exactly 0),
    /// `w_c = Σ_ij α_cij relu(g_cij)`, `cam = relu(Σ_c w_c A_c)`, then min-max
    /// normalization and bilinear resize. All-zero input yields an all-zero map.
    ///
    /// # Errors
    /// - `ShapeMismatch` if activations and gradients differ in shape
    /// - `ValidationError` if the taps are empty or the target size is zero
    pub fn attribute(&self, taps: &LayerTaps, height: usize, width: usize) -> Result<SaliencyMap, ScreeningError> {
        let cam = Self::raw_cam(&taps.activations, &taps.gradients)?;
        if height == 0 || width == 0 {
            return Err(ScreeningError::ValidationError(format!(
                "Saliency target size must be positive, got {}x{}",
                height, width
            )));
        }
        debug!("Grad-CAM++ on layer '{}' (pass {}): {:?} -> {}x{}", taps.layer, taps.pass, cam.dim(), height, width);

        let normalized = min_max_normalize(&cam);
        let resized = resize_bilinear(&normalized, height, width)?;
        Ok(SaliencyMap {
            values: resized.mapv(|v| v.clamp(0.0, 1.0)),
        })
    }

    /// Unnormalized, non-negative class activation map at layer resolution.
    pub fn raw_cam(activations: &Array3<f32>, gradients: &Array3<f32>) -> Result<Array2<f32>, ScreeningError> {
        if activations.shape() != gradients.shape() {
            return Err(ScreeningError::shape_mismatch(
                "Grad-CAM++ inputs",
                activations.shape(),
                gradients.shape(),
            ));
        }
        let (channels, h, w) = activations.dim();
        if channels == 0 || h == 0 || w == 0 {
            return Err(ScreeningError::ValidationError(format!(
                "Activation tap is empty: {:?}",
                activations.shape()
            )));
        }

        let mut cam = Array2::<f32>::zeros((h, w));
        for (a, g) in activations.axis_iter(Axis(0)).zip(gradients.axis_iter(Axis(0))) {
            let spatial_sum: f32 = Zip::from(&a).and(&g).fold(0.0, |acc, &act, &grad| acc + act * grad.powi(3));

            let weight: f32 = g
                .iter()
                .map(|&grad| {
                    let g2 = grad * grad;
                    let denom = 2.0 * g2 + spatial_sum;
                    let denom = if denom != 0.0 { denom } else { 1.0 };
                    (g2 / denom) * grad.max(0.0)
                })
                .sum();

            if weight != 0.0 {
                cam.scaled_add(weight, &a);
            }
        }

        cam.mapv_inplace(|v| v.max(0.0));
        Ok(cam)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn taps(activations: Array3<f32>, gradients: Array3<f32>) -> LayerTaps {
        LayerTaps {
            layer: "features".into(),
            pass: 1,
            activations,
            gradients,
        }
    }

    #[test]
    fn test_zero_inputs_give_zero_map() {
        let t = taps(Array3::zeros((4, 3, 3)), Array3::zeros((4, 3, 3)));
        let map = GradCamPlusPlus.attribute(&t, 12, 12).unwrap();
        assert_eq!(map.dim(), (12, 12));
        assert!(map.values().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_zero_gradients_give_zero_map() {
        let t = taps(Array3::ones((2, 4, 4)), Array3::zeros((2, 4, 4)));
        let map = GradCamPlusPlus.attribute(&t, 4, 4).unwrap();
        assert!(map.values().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_single_channel_hotspot() {
        let mut activations = Array3::zeros((1, 4, 4));
        activations[[0, 1, 2]] = 2.0;
        activations[[0, 3, 0]] = 1.0;
        let gradients = Array3::from_elem((1, 4, 4), 0.5);
        let cam = GradCamPlusPlus::raw_cam(&activations, &gradients).unwrap();
        assert!(cam[[1, 2]] > cam[[3, 0]]);
        assert_eq!(cam[[0, 0]], 0.0);

        let map = GradCamPlusPlus.attribute(&taps(activations, gradients), 4, 4).unwrap();
        assert_eq!(map.values()[[1, 2]], 1.0);
        assert!((map.values()[[3, 0]] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_weight_formula_matches_hand_computation() {
        // One channel, two positions: A = [1, 3], g = [1, 1].
        // S = 1 + 3 = 4, alpha = 1 / (2 + 4), weight = 2 * (1/6) = 1/3.
        let activations = Array3::from_shape_vec((1, 1, 2), vec![1.0, 3.0]).unwrap();
        let gradients = Array3::from_elem((1, 1, 2), 1.0);
        let cam = GradCamPlusPlus::raw_cam(&activations, &gradients).unwrap();
        assert!((cam[[0, 0]] - 1.0 / 3.0).abs() < 1e-6);
        assert!((cam[[0, 1]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_negative_gradients_are_ignored() {
        let activations = Array3::ones((1, 2, 2));
        let gradients = Array3::from_elem((1, 2, 2), -1.0);
        let cam = GradCamPlusPlus::raw_cam(&activations, &gradients).unwrap();
        assert!(cam.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_values_in_unit_interval_and_idempotent() {
        let activations = Array3::from_shape_fn((3, 5, 5), |(c, y, x)| ((c * 7 + y * 3 + x) % 5) as f32);
        let gradients = Array3::from_shape_fn((3, 5, 5), |(c, y, _)| 0.1 * (c as f32 + 1.0) - 0.02 * y as f32);
        let t = taps(activations, gradients);
        let resized = GradCamPlusPlus.attribute(&t, 20, 20).unwrap();
        assert!(resized.values().iter().all(|&v| (0.0..=1.0).contains(&v)));

        let map = GradCamPlusPlus.attribute(&t, 5, 5).unwrap();
        let max = map.values().iter().cloned().fold(f32::MIN, f32::max);
        assert_eq!(max, 1.0);
        let again = min_max_normalize(map.values());
        for (a, b) in again.iter().zip(map.values().iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_shape_mismatch_fails_fast() {
        let t = taps(Array3::zeros((2, 4, 4)), Array3::zeros((2, 4, 5)));
        let result = GradCamPlusPlus.attribute(&t, 8, 8);
        assert!(matches!(result, Err(ScreeningError::ShapeMismatch { .. })));
    }
}
