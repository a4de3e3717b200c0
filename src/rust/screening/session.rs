use std::sync::Mutex;

use super::adapter::ModelAdapter;
use super::error::ScreeningError;

/// Owns the one model instance of a service and hands out exclusive access.
///
/// Forward passes, backward passes and tap reads of one request all happen
/// inside a single [`with_exclusive`](Self::with_exclusive) call, so taps of
/// concurrent requests can never interleave.
pub struct InferenceSession {
    model: Mutex<Box<dyn ModelAdapter>>,
    target_layer: String,
    input_size: u32,
    device: String,
}

impl std::fmt::Debug for InferenceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceSession")
            .field("target_layer", &self.target_layer)
            .field("input_size", &self.input_size)
            .field("device", &self.device)
            .finish()
    }
}

// Compile-time verification of thread-safety
const _: () = {
    fn assert_send_sync<T: Send + Sync>() {}
    fn verify_thread_safety() {
        assert_send_sync::<InferenceSession>();
    }
};

impl InferenceSession {
    pub fn new(model: Box<dyn ModelAdapter>) -> Self {
        let target_layer = model.target_layer().to_string();
        let input_size = model.input_size();
        let device = model.device().to_string();
        Self {
            model: Mutex::new(model),
            target_layer,
            input_size,
            device,
        }
    }

    pub fn target_layer(&self) -> &str {
        &self.target_layer
    }

    pub fn input_size(&self) -> u32 {
        self.input_size
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    /// Runs `f` while holding the model exclusively.
    pub fn with_exclusive<R>(
        &self,
        f: impl FnOnce(&mut dyn ModelAdapter) -> Result<R, ScreeningError>,
    ) -> Result<R, ScreeningError> {
        let mut guard = self.model.lock().map_err(|_| ScreeningError::SessionPoisoned)?;
        f(guard.as_mut())
    }
}
