//! In-process renderer and encoder stand-ins for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use bratgen::{
    BoundingBox, ClipRegion, EncodeJob, Error, Interaction, PipelineConfig, RenderContext,
    Renderer, RendererLauncher, Result, VideoEncoder, Viewport,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Shared counters and knobs behind a [`FakeLauncher`]
#[derive(Default)]
pub struct FakeState {
    pub launches: AtomicUsize,
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    /// Text whose capture fails with `CaptureFailed`
    pub fail_on: Mutex<Option<String>>,
    /// Selector reported as missing from the template
    pub missing: Mutex<Option<String>>,
    /// Delay applied to every capture
    pub capture_delay: Mutex<Option<Duration>>,
    /// Launches that fail before one succeeds
    pub failing_launches: AtomicUsize,
    pub current: Mutex<Option<Arc<FakeRenderer>>>,
}

impl FakeState {
    pub fn kill_current(&self) {
        if let Some(r) = self.current.lock().unwrap().as_ref() {
            r.alive.store(false, Ordering::SeqCst);
        }
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

pub struct FakeLauncher {
    pub state: Arc<FakeState>,
}

impl FakeLauncher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Arc::new(FakeState::default()),
        })
    }
}

impl RendererLauncher for FakeLauncher {
    fn launch(&self) -> Result<Arc<dyn Renderer>> {
        self.state.launches.fetch_add(1, Ordering::SeqCst);
        if self
            .state
            .failing_launches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Error::RendererUnavailable("fake launch failure".into()));
        }
        let renderer = Arc::new(FakeRenderer {
            alive: AtomicBool::new(true),
            state: self.state.clone(),
        });
        *self.state.current.lock().unwrap() = Some(renderer.clone());
        Ok(renderer)
    }
}

pub struct FakeRenderer {
    alive: AtomicBool,
    state: Arc<FakeState>,
}

impl Renderer for FakeRenderer {
    fn is_running(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn new_context(&self, _viewport: Viewport) -> Result<Box<dyn RenderContext>> {
        self.state.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeContext {
            state: self.state.clone(),
            loaded: false,
            value: String::new(),
        }))
    }

    fn close(&self) -> Result<()> {
        self.alive.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Captures `png:<field value>` so every frame shows which text it holds
pub struct FakeContext {
    state: Arc<FakeState>,
    loaded: bool,
    value: String,
}

impl FakeContext {
    fn check(&self, selector: &str) -> Result<()> {
        if !self.loaded {
            return Err(Error::RenderTargetNotFound("no document loaded".into()));
        }
        if self.state.missing.lock().unwrap().as_deref() == Some(selector) {
            return Err(Error::RenderTargetNotFound(selector.to_string()));
        }
        Ok(())
    }
}

impl RenderContext for FakeContext {
    fn load_local_document(&mut self, url: &str) -> Result<()> {
        assert!(url.starts_with("data:") || url.starts_with("file://"));
        self.loaded = true;
        Ok(())
    }

    fn interact(&mut self, selector: &str, _action: Interaction) -> Result<()> {
        self.check(selector)
    }

    fn set_field_value(&mut self, selector: &str, value: &str) -> Result<()> {
        self.check(selector)?;
        self.value = value.to_string();
        Ok(())
    }

    fn locate_element_bounding_box(&mut self, selector: &str) -> Result<BoundingBox> {
        self.check(selector)?;
        Ok(BoundingBox {
            x: 40.0,
            y: 40.0,
            width: 500.0,
            height: 500.0,
        })
    }

    fn capture_region(&mut self, clip: ClipRegion) -> Result<Vec<u8>> {
        assert_eq!((clip.width, clip.height), (500.0, 500.0));
        let delay = *self.state.capture_delay.lock().unwrap();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        if self.state.fail_on.lock().unwrap().as_deref() == Some(self.value.as_str()) {
            return Err(Error::CaptureFailed(format!("cannot capture {}", self.value)));
        }
        Ok(format!("png:{}", self.value).into_bytes())
    }

    fn close(self: Box<Self>) -> Result<()> {
        self.state.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Parse a concat script back into (path, duration) pairs.
pub fn parse_manifest(script: &str) -> Vec<(PathBuf, f64)> {
    let mut entries = Vec::new();
    let mut path = None;
    for line in script.lines() {
        if let Some(rest) = line.strip_prefix("file '") {
            path = Some(PathBuf::from(rest.trim_end_matches('\'')));
        } else if let Some(rest) = line.strip_prefix("duration ") {
            let duration: f64 = rest.parse().unwrap();
            entries.push((path.take().unwrap(), duration));
        }
    }
    entries
}

/// "Encodes" by joining the frame files named in the manifest with `|`.
///
/// Frame paths are resolved the way ffmpeg's concat demuxer does.
#[derive(Default)]
pub struct ConcatEncoder {
    pub calls: AtomicUsize,
    pub manifests: Mutex<Vec<String>>,
    pub delay: Option<Duration>,
}

#[async_trait]
impl VideoEncoder for ConcatEncoder {
    async fn encode(&self, job: &EncodeJob) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let script = tokio::fs::read_to_string(&job.manifest_path).await?;
        let base = job.manifest_path.parent().unwrap();
        let mut parts = Vec::new();
        for (path, _) in parse_manifest(&script) {
            // Relative entries resolve against the manifest's directory, as in ffmpeg
            let path = if path.is_relative() { base.join(path) } else { path };
            assert!(path.starts_with(base));
            let frame = tokio::fs::read_to_string(&path).await.map_err(|e| {
                Error::EncodeFailed(format!("{}: {}", path.display(), e))
            })?;
            parts.push(frame);
        }
        tokio::fs::write(&job.output_path, parts.join("|")).await?;
        self.manifests.lock().unwrap().push(script);
        Ok(())
    }
}

impl ConcatEncoder {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn test_config(temp_root: &Path) -> PipelineConfig {
    PipelineConfig {
        temp_root: temp_root.to_path_buf(),
        render_timeout_ms: 5_000,
        encode_timeout_ms: 5_000,
        max_concurrent_renders: 4,
        ..Default::default()
    }
}

/// Number of entries under `root` (0 when it does not exist)
pub fn entries(root: &Path) -> usize {
    std::fs::read_dir(root).map(|d| d.count()).unwrap_or(0)
}
