use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::Session;
use ort::Result as OrtResult;
use std::sync::Once;

static INIT: Once = Once::new();

/// Where ONNX Runtime executes the backbone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionDevice {
    #[default]
    Cpu,
    /// Requires the `cuda` feature; ONNX Runtime falls back to CPU when the
    /// provider cannot be registered.
    Cuda,
}

impl ExecutionDevice {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Cuda => "cuda",
        }
    }
}

impl std::str::FromStr for ExecutionDevice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "cuda" | "gpu" => Ok(Self::Cuda),
            other => Err(format!("Unknown execution device '{}' (expected cpu or cuda)", other)),
        }
    }
}

#[derive(Debug)]
pub struct RuntimeConfig {
    pub inter_threads: usize,
    pub intra_threads: usize,
    pub optimization_level: GraphOptimizationLevel,
    pub device: ExecutionDevice,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            inter_threads: 0, // Let ONNX Runtime decide
            intra_threads: 0, // Let ONNX Runtime decide
            optimization_level: GraphOptimizationLevel::Level3,
            device: ExecutionDevice::Cpu,
        }
    }
}

impl RuntimeConfig {
    /// The device sessions will actually run on with the compiled feature set.
    pub fn effective_device(&self) -> ExecutionDevice {
        if cfg!(feature = "cuda") {
            self.device
        } else {
            ExecutionDevice::Cpu
        }
    }
}

impl Clone for RuntimeConfig {
    fn clone(&self) -> Self {
        Self {
            inter_threads: self.inter_threads,
            intra_threads: self.intra_threads,
            optimization_level: copy_level(&self.optimization_level),
            device: self.device,
        }
    }
}

fn copy_level(level: &GraphOptimizationLevel) -> GraphOptimizationLevel {
    match level {
        GraphOptimizationLevel::Level1 => GraphOptimizationLevel::Level1,
        GraphOptimizationLevel::Level2 => GraphOptimizationLevel::Level2,
        GraphOptimizationLevel::Level3 => GraphOptimizationLevel::Level3,
        GraphOptimizationLevel::Disable => GraphOptimizationLevel::Disable,
    }
}

fn init_onnx_environment() -> OrtResult<()> {
    ort::init()
        .with_name("drishti")
        .commit()?;
    Ok(())
}

pub fn ensure_initialized() -> OrtResult<()> {
    let mut result = Ok(());
    INIT.call_once(|| {
        result = init_onnx_environment();
    });
    if let Err(e) = &result {
        log::error!("Failed to initialize ONNX Runtime environment: {}", e);
    }
    result
}

pub fn create_session_builder(config: &RuntimeConfig) -> OrtResult<SessionBuilder> {
    ensure_initialized()?;
    let mut builder = Session::builder()?;

    // Configure threading
    if config.inter_threads > 0 {
        builder = builder.with_inter_threads(config.inter_threads)?;
    }
    if config.intra_threads > 0 {
        builder = builder.with_intra_threads(config.intra_threads)?;
    }

    builder = builder.with_optimization_level(copy_level(&config.optimization_level))?;

    if config.device == ExecutionDevice::Cuda {
        builder = register_cuda(builder)?;
    }

    Ok(builder)
}

#[cfg(feature = "cuda")]
fn register_cuda(builder: SessionBuilder) -> OrtResult<SessionBuilder> {
    use ort::execution_providers::CUDAExecutionProvider;
    builder.with_execution_providers([CUDAExecutionProvider::default().build()])
}

#[cfg(not(feature = "cuda"))]
fn register_cuda(builder: SessionBuilder) -> OrtResult<SessionBuilder> {
    log::warn!("CUDA requested but drishti was built without the `cuda` feature; running on CPU");
    Ok(builder)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_initialization() {
        assert!(ensure_initialized().is_ok());
        assert!(ensure_initialized().is_ok()); // Second call should be fine
    }

    #[test]
    fn test_session_builder_config() {
        let config = RuntimeConfig {
            inter_threads: 2,
            intra_threads: 2,
            optimization_level: GraphOptimizationLevel::Level1,
            device: ExecutionDevice::Cpu,
        };
        let builder = create_session_builder(&config);
        assert!(builder.is_ok());
    }

    #[test]
    fn test_device_parsing() {
        assert_eq!("CPU".parse::<ExecutionDevice>(), Ok(ExecutionDevice::Cpu));
        assert_eq!("cuda".parse::<ExecutionDevice>(), Ok(ExecutionDevice::Cuda));
        assert!("tpu".parse::<ExecutionDevice>().is_err());
        assert_eq!(ExecutionDevice::Cuda.as_str(), "cuda");
    }

    #[test]
    fn test_effective_device_defaults_to_cpu() {
        assert_eq!(RuntimeConfig::default().effective_device(), ExecutionDevice::Cpu);
    }
}
