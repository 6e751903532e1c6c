//! bratgen
//!
//! Renders a short text string into a styled "brat" image, and optionally into
//! a short video that reveals the text word by word, then serves the result
//! over HTTP.
//!
//! # Features
//!
//! - **CDP Backend** (default): renders through headless Chrome over the
//!   Chrome DevTools Protocol
//! - **Adapter-based renderer**: the pipeline only depends on the
//!   [`Renderer`] / [`RenderContext`] contract, so backends can be swapped
//! - **Scoped cleanup**: every video request owns a transient [`Workspace`]
//!   that is removed on every exit path
//!
//! # Example
//!
//! ```no_run
//! use bratgen::{Pipeline, PipelineConfig, RenderRequest};
//!
//! # async fn run() -> bratgen::Result<()> {
//! let pipeline = Pipeline::with_defaults(PipelineConfig::default())?;
//! let request = RenderRequest::new("no sleep")?;
//! let video = pipeline.render_video(&request).await?;
//! std::fs::write("out.mp4", &video.bytes)?;
//! pipeline.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

pub mod error;
pub use error::{Error, Result};

pub mod config;
pub use config::{PipelineConfig, RendererConfig, TemplateSource};

#[cfg(feature = "cdp")]
pub mod cdp;

pub mod encode;
pub mod frame;
pub mod manifest;
pub mod pipeline;
pub mod pool;
pub mod sequence;
pub mod server;
pub mod workspace;

pub use encode::{EncodeJob, FfmpegEncoder, VideoEncoder};
pub use frame::FrameProducer;
pub use manifest::{FrameTimingManifest, ManifestEntry};
pub use pipeline::{ImageArtifact, Pipeline, VideoArtifact};
pub use pool::{ContextLease, RendererPool};
pub use sequence::{word_prefixes, RenderRequest, RenderedFrame, SequenceBuilder};
pub use workspace::{Workspace, WorkspaceManager};

/// Viewport dimensions of a rendering context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1536,
            height: 695,
        }
    }
}

/// Position and size of an element, in CSS pixels relative to the viewport
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Region of the page to capture
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipRegion {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl ClipRegion {
    /// A square clip of `size` pixels anchored at the top-left corner of `bbox`.
    pub fn square_at(bbox: &BoundingBox, size: u32) -> Self {
        Self {
            x: bbox.x,
            y: bbox.y,
            width: size as f64,
            height: size as f64,
        }
    }
}

/// User interaction performed against an element in the loaded document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interaction {
    Click,
}

/// A long-lived renderer instance shared by the whole process.
///
/// Implementations hand out isolated [`RenderContext`]s; concurrent contexts
/// never observe each other's page or cookie state.
pub trait Renderer: Send + Sync {
    /// Whether the underlying renderer process is still alive
    fn is_running(&self) -> bool;

    /// Create an isolated context bound to the given viewport.
    ///
    /// Returns [`Error::RendererUnavailable`] when the instance is not running.
    fn new_context(&self, viewport: Viewport) -> Result<Box<dyn RenderContext>>;

    /// Close the instance and terminate its process
    fn close(&self) -> Result<()>;
}

/// Launches new [`Renderer`] instances (used for the initial launch and for
/// the one-shot relaunch after the instance went away).
pub trait RendererLauncher: Send + Sync {
    fn launch(&self) -> Result<Arc<dyn Renderer>>;
}

/// An isolated browsing context with its own page.
///
/// This is the whole screenshot contract the pipeline relies on.
pub trait RenderContext: Send {
    /// Load a local document (a `file://` or `data:` URL) and wait for it
    fn load_local_document(&mut self, url: &str) -> Result<()>;

    /// Perform an interaction against the element matched by `selector`
    fn interact(&mut self, selector: &str, action: Interaction) -> Result<()>;

    /// Replace the value of the form field matched by `selector`
    fn set_field_value(&mut self, selector: &str, value: &str) -> Result<()>;

    /// Bounding box of the element matched by `selector`
    fn locate_element_bounding_box(&mut self, selector: &str) -> Result<BoundingBox>;

    /// Capture the given region of the page as PNG bytes
    fn capture_region(&mut self, clip: ClipRegion) -> Result<Vec<u8>>;

    /// Tear the context down, releasing its page and browser context
    fn close(self: Box<Self>) -> Result<()>;
}

/// Create a launcher for the default backend.
#[cfg(feature = "cdp")]
pub fn default_launcher(config: RendererConfig) -> Arc<dyn RendererLauncher> {
    Arc::new(cdp::CdpLauncher::new(config))
}
