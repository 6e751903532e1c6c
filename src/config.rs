//! Configuration for the renderer and the frame/video pipeline

use crate::Viewport;
use std::path::PathBuf;

/// Configuration used when launching the shared renderer instance
///
/// # Examples
///
/// ```
/// let cfg = bratgen::RendererConfig::default();
/// assert_eq!(cfg.viewport.width, 1536);
/// assert!(cfg.headless);
/// ```
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Viewport of every rendering context; must contain the overlay at
    /// worst-case text length
    pub viewport: Viewport,
    /// Explicit Chrome/Chromium binary; autodetected when `None`
    pub chrome_path: Option<PathBuf>,
    /// Run the browser without a visible window
    pub headless: bool,
    /// Idle time after which the browser connection is considered dead, in
    /// milliseconds
    pub idle_timeout_ms: u64,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            viewport: Viewport::default(),
            chrome_path: None,
            headless: true,
            idle_timeout_ms: 10 * 60 * 1000,
        }
    }
}

/// Where the template document comes from
#[derive(Debug, Clone, Default)]
pub enum TemplateSource {
    /// The template shipped with the crate, loaded as a `data:` URL
    #[default]
    Bundled,
    /// A template on disk, loaded as a `file://` URL
    Path(PathBuf),
}

/// Configuration for the whole frame/video pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub renderer: RendererConfig,
    /// Root directory for per-request workspaces
    pub temp_root: PathBuf,
    pub template: TemplateSource,
    /// Side of the square captured from the overlay's top-left corner
    pub clip_size: u32,
    /// Display duration of every reveal frame, in seconds
    pub frame_duration_secs: f64,
    /// Display duration of the appended hold frame, in seconds
    pub hold_duration_secs: f64,
    /// Output frame rate of the encoded video
    pub fps: u32,
    /// Encoder binary
    pub ffmpeg_program: PathBuf,
    /// Upper bound for one frame render (acquire, render, release), in milliseconds
    pub render_timeout_ms: u64,
    /// Upper bound for one encoder run, in milliseconds
    pub encode_timeout_ms: u64,
    /// Maximum number of rendering contexts open at once
    pub max_concurrent_renders: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            renderer: RendererConfig::default(),
            temp_root: std::env::temp_dir().join("brat-temp"),
            template: TemplateSource::default(),
            clip_size: 500,
            frame_duration_secs: 0.7,
            hold_duration_secs: 2.0,
            fps: 30,
            ffmpeg_program: PathBuf::from("ffmpeg"),
            render_timeout_ms: 30_000,
            encode_timeout_ms: 120_000,
            max_concurrent_renders: num_cpus::get().max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_pipeline_config() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.clip_size, 500);
        assert_eq!(cfg.frame_duration_secs, 0.7);
        assert_eq!(cfg.hold_duration_secs, 2.0);
        assert_eq!(cfg.fps, 30);
        assert!(cfg.temp_root.ends_with("brat-temp"));
        assert!(cfg.max_concurrent_renders >= 1);
        assert!(matches!(cfg.template, TemplateSource::Bundled));
    }
}
