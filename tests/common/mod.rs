#![allow(dead_code)]

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use drishti::screening::{ForwardPass, ModelAdapter, TapSlot};
use drishti::ScreeningError;
use env_logger::{Builder, Env};
use image::{ImageFormat, Rgb, RgbImage};
use ndarray::{Array3, Array4};

// Initialize test logger
pub fn init() {
    let _ = Builder::from_env(Env::default().default_filter_or("warn"))
        .is_test(true)
        .try_init();
}

/// Model double with a fixed probability and fixed synthetic taps.
///
/// The activation map has one hot cell at (5, 5) of a 16×16 grid, which lands
/// in the left upper lobe once upsampled.
pub struct StubModel {
    probability: f32,
    input_size: u32,
    taps: TapSlot,
    busy: Arc<AtomicBool>,
}

impl StubModel {
    pub fn new(probability: f32, input_size: u32) -> Self {
        Self {
            probability,
            input_size,
            taps: TapSlot::new("backbone.features.7"),
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn boxed(probability: f32, input_size: u32) -> Box<dyn ModelAdapter> {
        Box::new(Self::new(probability, input_size))
    }

    pub fn activations() -> Array3<f32> {
        let mut a = Array3::from_elem((8, 16, 16), 0.05);
        for c in 0..8 {
            a[[c, 5, 5]] = 2.0 + c as f32 * 0.1;
        }
        a
    }

    pub fn gradients() -> Array3<f32> {
        Array3::from_shape_fn((8, 16, 16), |(c, _, _)| 0.01 * (c as f32 + 1.0))
    }

    fn check_input(&self, input: &Array4<f32>) -> Result<(), ScreeningError> {
        let n = self.input_size as usize;
        if input.shape() != &[1, 3, n, n][..] {
            return Err(ScreeningError::ValidationError(format!("unexpected input {:?}", input.shape())));
        }
        Ok(())
    }
}

impl ModelAdapter for StubModel {
    fn target_layer(&self) -> &str {
        self.taps.layer()
    }

    fn input_size(&self) -> u32 {
        self.input_size
    }

    fn forward(&mut self, input: &Array4<f32>) -> Result<f32, ScreeningError> {
        self.check_input(input)?;
        Ok(self.probability)
    }

    fn forward_backward(&mut self, input: &Array4<f32>) -> Result<ForwardPass, ScreeningError> {
        self.check_input(input)?;
        assert!(!self.busy.swap(true, Ordering::SeqCst), "interleaved passes");
        let pass = self.taps.arm();
        self.taps.record_activations(pass, Self::activations())?;
        std::thread::yield_now();
        self.taps.record_gradients(pass, Self::gradients())?;
        let taps = self.taps.take(pass)?;
        self.busy.store(false, Ordering::SeqCst);
        Ok(ForwardPass {
            probability: self.probability,
            taps,
        })
    }
}

/// Dark field with two bright vertical lobes, roughly where lungs sit.
pub fn synthetic_xray(size: u32) -> RgbImage {
    let s = size as f32;
    RgbImage::from_fn(size, size, |x, y| {
        let (fx, fy) = (x as f32 / s, y as f32 / s);
        let in_lobe = |cx: f32| ((fx - cx) / 0.13).powi(2) + ((fy - 0.5) / 0.3).powi(2) <= 1.0;
        let v = if in_lobe(0.3) || in_lobe(0.7) {
            170 + ((x + y) % 40) as u8
        } else {
            30 + (y % 20) as u8
        };
        Rgb([v, v, v])
    })
}

pub fn png_bytes(image: &RgbImage) -> Vec<u8> {
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, ImageFormat::Png).unwrap();
    buffer.into_inner()
}
