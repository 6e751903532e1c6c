use anyhow::{Context, Result};
use bratgen::encode::is_ffmpeg_available;
use bratgen::server::{self, AppState};
use bratgen::{Pipeline, PipelineConfig, TemplateSource};
use clap::Parser;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;

#[derive(Parser, Debug)]
#[command(name = "bratgen", about = "Brat image and video generator API")]
struct Cli {
    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 3000)]
    port: u16,

    /// Root directory for transient frame/video files
    #[arg(long)]
    temp_dir: Option<PathBuf>,

    /// HTML template to render instead of the bundled one
    #[arg(long)]
    template: Option<PathBuf>,

    /// Chrome/Chromium binary (autodetected by default)
    #[arg(long)]
    chrome_path: Option<PathBuf>,

    /// ffmpeg binary
    #[arg(long, default_value = "ffmpeg")]
    ffmpeg: PathBuf,

    /// Upper bound for rendering one frame
    #[arg(long, default_value_t = 30_000)]
    render_timeout_ms: u64,

    /// Upper bound for one ffmpeg run
    #[arg(long, default_value_t = 120_000)]
    encode_timeout_ms: u64,

    /// Maximum number of pages rendering at once (defaults to the CPU count)
    #[arg(long)]
    max_concurrent_renders: Option<usize>,
}

impl Cli {
    fn pipeline_config(&self) -> PipelineConfig {
        let mut config = PipelineConfig::default();
        if let Some(dir) = &self.temp_dir {
            config.temp_root = dir.clone();
        }
        if let Some(template) = &self.template {
            config.template = TemplateSource::Path(template.clone());
        }
        config.renderer.chrome_path = self.chrome_path.clone();
        config.ffmpeg_program = self.ffmpeg.clone();
        config.render_timeout_ms = self.render_timeout_ms;
        config.encode_timeout_ms = self.encode_timeout_ms;
        if let Some(n) = self.max_concurrent_renders {
            config.max_concurrent_renders = n.max(1);
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = cli.pipeline_config();

    if !is_ffmpeg_available(&config.ffmpeg_program) {
        warn!(
            "{} not found; /bratvid requests will fail",
            config.ffmpeg_program.display()
        );
    }

    let pipeline = Arc::new(Pipeline::with_defaults(config).context("Failed to set up pipeline")?);
    pipeline
        .workspaces()
        .ensure_root()
        .await
        .context("Cannot create temporary directory. Check write permissions.")?;

    // Launch the browser in the background; the first request waits for it
    // (or relaunches it) through the pool.
    {
        let pipeline = pipeline.clone();
        tokio::spawn(async move {
            if let Err(e) = pipeline.pool().launch().await {
                error!("Initial browser launch failed: {}", e);
            }
        });
    }

    let addr = format!("{}:{}", cli.host, cli.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Server is running on {}", addr);
    info!("Temp directory: {}", pipeline.workspaces().root().display());
    info!("Available endpoints:");
    info!("- GET /brat?text=your_text_here (Image)");
    info!("- GET /bratvid?text=your_text_here (Video)");

    let served = server::serve(listener, AppState::new(pipeline.clone()), shutdown_signal()).await;

    // Same teardown for SIGINT, SIGTERM and a server that stopped on its own
    info!("Shutting down");
    pipeline.shutdown().await;

    served.context("HTTP server failed")
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("SIGINT received"),
        _ = terminate => info!("SIGTERM received"),
    }
}
