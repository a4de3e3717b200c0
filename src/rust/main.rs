use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use drishti::server::{self, AppState};
use drishti::{BuiltinModel, ExecutionDevice, ModelInfo, ModelManager, RuntimeConfig, Screener};
use log::{error, info, warn};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP screening service
    Serve {
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        #[arg(short, long, default_value_t = 5000)]
        port: u16,
        #[command(flatten)]
        model: ModelArgs,
    },
    /// Screen one X-ray and write its heatmaps next to a summary
    Analyze {
        /// Image file to screen
        image: PathBuf,
        /// Directory for overlay.png and heatmap.png
        #[arg(short, long, default_value = ".")]
        out_dir: PathBuf,
        #[command(flatten)]
        model: ModelArgs,
    },
    /// Download and verify the model files into the cache
    Fetch {
        #[arg(long)]
        model_url: String,
        #[arg(long)]
        model_sha256: String,
        #[arg(long)]
        head_url: String,
        #[arg(long)]
        head_sha256: String,
        /// Force a fresh download of the model files
        #[arg(short, long)]
        fresh: bool,
    },
}

#[derive(Args)]
struct ModelArgs {
    /// Backbone graph; uses the cached built-in model when omitted
    #[arg(long, requires = "head_path")]
    model_path: Option<String>,
    /// Head sidecar (JSON weights and bias)
    #[arg(long, requires = "model_path")]
    head_path: Option<String>,
    /// Execution device: cpu or cuda
    #[arg(long, default_value = "cpu")]
    device: ExecutionDevice,
    /// ONNX Runtime intra-op threads (0 lets the runtime decide)
    #[arg(long, default_value_t = 0)]
    threads: usize,
}

impl ModelArgs {
    fn build_screener(&self) -> Result<Screener> {
        let runtime_config = RuntimeConfig {
            intra_threads: self.threads,
            device: self.device,
            ..RuntimeConfig::default()
        };
        let builder = Screener::builder().with_runtime_config(runtime_config);
        let builder = match (&self.model_path, &self.head_path) {
            (Some(model_path), Some(head_path)) => builder.with_custom_model(model_path, head_path, None)?,
            _ => builder.with_model(BuiltinModel::EfficientNetV2S)?,
        };
        Ok(builder.build()?)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { host, port, model } => serve(&host, port, &model).await,
        Command::Analyze { image, out_dir, model } => analyze(&image, &out_dir, &model),
        Command::Fetch {
            model_url,
            model_sha256,
            head_url,
            head_sha256,
            fresh,
        } => {
            let info = ModelInfo::new(BuiltinModel::EfficientNetV2S, model_url, model_sha256, head_url, head_sha256);
            fetch(&info, fresh).await
        }
    }
}

async fn serve(host: &str, port: u16, model: &ModelArgs) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", host, port))?;

    info!("=== Starting TB Screening Service ===");
    let start = Instant::now();
    let state = match model.build_screener() {
        Ok(screener) => {
            info!("Model loaded in {:.2?}", start.elapsed());
            AppState::new(Arc::new(screener))
        }
        Err(e) => {
            error!("Failed to load model: {:#}", e);
            warn!("Serving without a model; /predict will fail until restarted with one");
            let runtime_config = RuntimeConfig {
                device: model.device,
                ..RuntimeConfig::default()
            };
            AppState::without_model(runtime_config.effective_device().as_str())
        }
    };

    server::serve(addr, state).await.context("Server error")
}

fn analyze(image: &Path, out_dir: &Path, model: &ModelArgs) -> Result<()> {
    let screener = model.build_screener()?;
    let bytes = std::fs::read(image).with_context(|| format!("Failed to read {}", image.display()))?;

    let start = Instant::now();
    let report = screener.screen_bytes(&bytes)?;
    info!("Screened {} in {:.2?}", image.display(), start.elapsed());

    println!("\nResults:");
    println!("  Probability:    {:.4}", report.probability);
    println!("  Classification: {}", report.assessment.classification.as_str());
    println!("  Confidence:     {:.1}%", report.assessment.confidence * 100.0);
    println!("  Urgency:        {}", report.urgency.as_str());
    println!("  Explanation:    {}", report.heatmap_explanation);
    println!("  Recommendations:");
    for line in report.recommendations() {
        println!("    - {}", line);
    }

    if let Some(outputs) = &report.heatmap {
        std::fs::create_dir_all(out_dir)?;
        let overlay = out_dir.join("overlay.png");
        let heatmap = out_dir.join("heatmap.png");
        outputs.overlay_image.save(&overlay)?;
        outputs.saliency_image.save(&heatmap)?;
        println!("  Heatmaps written to {} and {}", overlay.display(), heatmap.display());
    }

    Ok(())
}

async fn fetch(info: &ModelInfo, fresh: bool) -> Result<()> {
    let manager = ModelManager::new_default()?;

    if fresh {
        info!("Fresh download requested - removing any existing model files...");
        manager.remove_download(info.model)?;
    }

    manager.ensure_model_downloaded(info).await?;
    println!("Model files ready in {}", manager.models_dir().join(info.name()).display());
    Ok(())
}
