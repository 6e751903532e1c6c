//! End-to-end image and video rendering
//!
//! A video request runs: allocate a workspace, render every word prefix into
//! it in order, write the timing manifest, run the encoder, read the result
//! back, remove the workspace. The workspace is removed on every exit path.

use crate::encode::{EncodeJob, VideoEncoder};
use crate::frame::FrameProducer;
use crate::manifest::FrameTimingManifest;
use crate::pool::RendererPool;
use crate::sequence::{RenderRequest, SequenceBuilder};
use crate::workspace::{Workspace, WorkspaceManager};
use crate::{Error, PipelineConfig, RendererLauncher, Result};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A rendered still image (PNG)
#[derive(Debug, Clone)]
pub struct ImageArtifact {
    pub bytes: Vec<u8>,
}

impl ImageArtifact {
    pub const CONTENT_TYPE: &'static str = "image/png";
}

/// An encoded reveal video (MP4)
#[derive(Debug, Clone)]
pub struct VideoArtifact {
    pub bytes: Vec<u8>,
    /// Number of distinct frames rendered (one per word)
    pub frame_count: usize,
}

impl VideoArtifact {
    pub const CONTENT_TYPE: &'static str = "video/mp4";
}

/// The frame-generation-and-assembly pipeline, shared by all requests.
pub struct Pipeline {
    config: PipelineConfig,
    pool: RendererPool,
    producer: FrameProducer,
    workspaces: WorkspaceManager,
    encoder: Arc<dyn VideoEncoder>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        launcher: Arc<dyn RendererLauncher>,
        encoder: Arc<dyn VideoEncoder>,
    ) -> Result<Self> {
        let producer = FrameProducer::new(&config.template, config.clip_size)?;
        let pool = RendererPool::new(
            launcher,
            config.renderer.viewport,
            config.max_concurrent_renders,
            Duration::from_millis(config.render_timeout_ms),
        );
        let workspaces = WorkspaceManager::new(config.temp_root.clone());

        Ok(Self {
            config,
            pool,
            producer,
            workspaces,
            encoder,
        })
    }

    /// Pipeline backed by headless Chrome and the configured `ffmpeg` binary.
    #[cfg(feature = "cdp")]
    pub fn with_defaults(config: PipelineConfig) -> Result<Self> {
        let launcher = crate::default_launcher(config.renderer.clone());
        let encoder = Arc::new(crate::FfmpegEncoder::new(config.ffmpeg_program.clone()));
        Self::new(config, launcher, encoder)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn pool(&self) -> &RendererPool {
        &self.pool
    }

    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.workspaces
    }

    /// Render `request` into a single image.
    pub async fn render_image(&self, request: &RenderRequest) -> Result<ImageArtifact> {
        let started = Instant::now();
        let bytes = self.producer.produce(&self.pool, request.text()).await?;
        debug!("Rendered image in {}ms", started.elapsed().as_millis());
        Ok(ImageArtifact { bytes })
    }

    /// Render `request` into a word-by-word reveal video.
    ///
    /// Nothing under the request's workspace survives this call, whether it
    /// succeeds or fails.
    pub async fn render_video(&self, request: &RenderRequest) -> Result<VideoArtifact> {
        let started = Instant::now();
        let mut workspace = self.workspaces.create_workspace().await?;

        let result = self.assemble(request, &mut workspace).await;

        // A failure here leaves the directory to `Drop`, which tries once more
        if let Err(e) = workspace.destroy().await {
            warn!("Failed to remove workspace {}: {}", workspace.id(), e);
        }

        match &result {
            Ok(video) => info!(
                "Encoded {} frames ({} bytes) in {}ms",
                video.frame_count,
                video.bytes.len(),
                started.elapsed().as_millis()
            ),
            Err(e) => warn!("Video request failed: {}", e),
        }
        result
    }

    async fn assemble(&self, request: &RenderRequest, workspace: &mut Workspace) -> Result<VideoArtifact> {
        let frame_count = SequenceBuilder::new(&self.pool, &self.producer)
            .build(request, workspace)
            .await?;

        let manifest = FrameTimingManifest::new(
            workspace.frames(),
            self.config.frame_duration_secs,
            self.config.hold_duration_secs,
        )?;
        manifest.write_to(workspace.manifest_path()).await?;

        let job = EncodeJob {
            manifest_path: workspace.manifest_path().to_path_buf(),
            output_path: workspace.output_path().to_path_buf(),
            fps: self.config.fps,
        };
        let timeout = Duration::from_millis(self.config.encode_timeout_ms);
        tokio::time::timeout(timeout, self.encoder.encode(&job))
            .await
            .map_err(|_| Error::EncodeTimeout(self.config.encode_timeout_ms))??;

        let bytes = tokio::fs::read(&job.output_path).await.map_err(|e| {
            Error::EncodeFailed(format!(
                "Cannot read encoder output {}: {}",
                job.output_path.display(),
                e
            ))
        })?;
        if bytes.is_empty() {
            return Err(Error::EncodeFailed("Encoder output is empty".into()));
        }

        Ok(VideoArtifact { bytes, frame_count })
    }

    /// Process teardown: close the renderer and sweep the temp root.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
        self.workspaces.sweep_orphans().await;
    }
}
