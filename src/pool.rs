//! Renderer session pool
//!
//! Owns the process-wide renderer instance and hands out isolated rendering
//! contexts. The blocking renderer calls run on tokio's blocking pool so a
//! slow page only suspends the request that issued it.

use crate::{Error, RenderContext, Renderer, RendererLauncher, Result, Viewport};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};

/// An acquired rendering context.
///
/// The context is closed by [`ContextLease::release`]; if the lease is
/// dropped without being released (panic, cancelled request, timeout) the
/// context is closed from `Drop` instead.
pub struct ContextLease {
    ctx: Option<Box<dyn RenderContext>>,
    _permit: OwnedSemaphorePermit,
}

impl ContextLease {
    fn new(ctx: Box<dyn RenderContext>, permit: OwnedSemaphorePermit) -> Self {
        Self {
            ctx: Some(ctx),
            _permit: permit,
        }
    }

    /// The underlying context, or `None` once released
    pub fn context(&mut self) -> Option<&mut (dyn RenderContext + 'static)> {
        self.ctx.as_deref_mut()
    }

    /// Close the context. Blocking; call from a blocking thread.
    pub fn release(mut self) -> Result<()> {
        match self.ctx.take() {
            Some(ctx) => ctx.close(),
            None => Ok(()),
        }
    }
}

impl Drop for ContextLease {
    fn drop(&mut self) {
        if let Some(ctx) = self.ctx.take() {
            debug!("Rendering context dropped without release; closing it");
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn_blocking(move || close_quietly(ctx));
                }
                Err(_) => close_quietly(ctx),
            }
        }
    }
}

fn close_quietly(ctx: Box<dyn RenderContext>) {
    if let Err(e) = ctx.close() {
        warn!("Failed to close rendering context: {}", e);
    }
}

fn join_error(err: tokio::task::JoinError) -> Error {
    Error::RendererUnavailable(format!("Render worker failed: {}", err))
}

/// Pool around one shared renderer instance.
///
/// The instance is launched lazily on first use (or eagerly through
/// [`RendererPool::launch`]) and relaunched at most once per failed
/// acquisition. Relaunch is single-flight: concurrent callers that observe
/// the same dead instance end up sharing one replacement.
pub struct RendererPool {
    launcher: Arc<dyn RendererLauncher>,
    instance: Mutex<Option<Arc<dyn Renderer>>>,
    permits: Arc<Semaphore>,
    viewport: Viewport,
    render_timeout: Duration,
}

impl RendererPool {
    pub fn new(
        launcher: Arc<dyn RendererLauncher>,
        viewport: Viewport,
        max_concurrent: usize,
        render_timeout: Duration,
    ) -> Self {
        Self {
            launcher,
            instance: Mutex::new(None),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            viewport,
            render_timeout,
        }
    }

    /// Launch the renderer instance now instead of on first use.
    pub async fn launch(&self) -> Result<()> {
        self.current().await.map(|_| ())
    }

    /// Current instance, launching it if none is running yet.
    async fn current(&self) -> Result<Arc<dyn Renderer>> {
        let mut guard = self.instance.lock().await;
        if let Some(renderer) = guard.as_ref() {
            return Ok(renderer.clone());
        }
        let renderer = self.spawn_launch().await?;
        *guard = Some(renderer.clone());
        Ok(renderer)
    }

    /// Replace `stale` with a fresh instance, unless another caller already did
    /// or `stale` is in fact still running.
    async fn relaunch(&self, stale: &Arc<dyn Renderer>) -> Result<Arc<dyn Renderer>> {
        let mut guard = self.instance.lock().await;
        if let Some(current) = guard.as_ref() {
            if !Arc::ptr_eq(current, stale) {
                debug!("Renderer already relaunched by a concurrent request");
                return Ok(current.clone());
            }
        }

        // A context failure on a live instance stays with that one request
        let instance = stale.clone();
        let still_running = tokio::task::spawn_blocking(move || instance.is_running())
            .await
            .map_err(join_error)?;
        if still_running && guard.is_some() {
            debug!("Renderer instance still running; not relaunching");
            return Ok(stale.clone());
        }

        warn!("Relaunching renderer instance");
        *guard = None;
        let old = stale.clone();
        match tokio::task::spawn_blocking(move || old.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to close stale renderer instance: {}", e),
            Err(e) => warn!("Renderer close task failed: {}", e),
        }

        let renderer = self.spawn_launch().await?;
        *guard = Some(renderer.clone());
        Ok(renderer)
    }

    async fn spawn_launch(&self) -> Result<Arc<dyn Renderer>> {
        let launcher = self.launcher.clone();
        let renderer = tokio::task::spawn_blocking(move || launcher.launch())
            .await
            .map_err(join_error)??;
        info!("Renderer instance launched");
        Ok(renderer)
    }

    async fn acquire_permit(&self) -> Result<OwnedSemaphorePermit> {
        self.permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::RendererUnavailable("Renderer pool is shut down".into()))
    }

    /// Open a context on `renderer` under `permit`. On a renderer error the
    /// permit is handed back so the caller can retry without queueing again.
    async fn open_context(
        &self,
        renderer: Arc<dyn Renderer>,
        permit: OwnedSemaphorePermit,
    ) -> std::result::Result<ContextLease, (Error, Option<OwnedSemaphorePermit>)> {
        let viewport = self.viewport;

        // The lease is built on the blocking thread so that a caller giving up
        // mid-acquire still closes the context through `Drop`.
        let opened = tokio::task::spawn_blocking(move || {
            if !renderer.is_running() {
                return Err((
                    Error::RendererUnavailable("Renderer instance is not running".into()),
                    permit,
                ));
            }
            match renderer.new_context(viewport) {
                Ok(ctx) => Ok(ContextLease::new(ctx, permit)),
                Err(e) => Err((e, permit)),
            }
        })
        .await;

        match opened {
            Ok(Ok(lease)) => Ok(lease),
            Ok(Err((err, permit))) => Err((err, Some(permit))),
            Err(e) => Err((join_error(e), None)),
        }
    }

    /// Open a context under an already acquired permit, relaunching the
    /// instance once if it turns out not to be running.
    async fn open_with_permit(&self, permit: OwnedSemaphorePermit) -> Result<ContextLease> {
        let renderer = self.current().await?;
        match self.open_context(renderer.clone(), permit).await {
            Ok(lease) => Ok(lease),
            Err((err, Some(permit))) if err.is_instance_failure() => {
                warn!("Renderer unavailable ({}), attempting relaunch", err);
                let renderer = self.relaunch(&renderer).await?;
                self.open_context(renderer, permit).await.map_err(|(err, _)| err)
            }
            Err((err, _)) => Err(err),
        }
    }

    /// Acquire an isolated rendering context.
    ///
    /// Waits for a free slot first. If the shared instance turns out not to
    /// be running, it is relaunched once and the acquisition retried; a
    /// second failure is surfaced as [`Error::RendererUnavailable`].
    pub async fn acquire_context(&self) -> Result<ContextLease> {
        let permit = self.acquire_permit().await?;
        self.open_with_permit(permit).await
    }

    /// Release a context acquired through [`RendererPool::acquire_context`].
    pub async fn release_context(&self, lease: ContextLease) -> Result<()> {
        tokio::task::spawn_blocking(move || lease.release())
            .await
            .map_err(join_error)?
    }

    /// Run `f` against a freshly acquired context and release it afterwards,
    /// whatever `f` returns.
    ///
    /// Waiting for a free slot is not bounded. Once a slot is held, opening
    /// the context, running `f` and releasing it are bounded by the pool's
    /// render timeout; on expiry [`Error::RenderTimeout`] is returned and the
    /// context is closed as soon as the blocking work lets go of it.
    pub async fn with_context<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn RenderContext) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let permit = self.acquire_permit().await?;

        let work = async move {
            let lease = self.open_with_permit(permit).await?;
            let task = tokio::task::spawn_blocking(move || {
                let mut lease = lease;
                let result = match lease.context() {
                    Some(ctx) => f(ctx),
                    None => Err(Error::RendererUnavailable("Context already released".into())),
                };
                if let Err(e) = lease.release() {
                    warn!("Failed to release rendering context: {}", e);
                }
                result
            });
            task.await.map_err(join_error)?
        };

        tokio::time::timeout(self.render_timeout, work)
            .await
            .map_err(|_| Error::RenderTimeout(self.render_timeout.as_millis() as u64))?
    }

    /// Close the shared instance and refuse further acquisitions.
    pub async fn shutdown(&self) {
        self.permits.close();
        let renderer = self.instance.lock().await.take();
        if let Some(renderer) = renderer {
            info!("Closing renderer instance");
            match tokio::task::spawn_blocking(move || renderer.close()).await {
                Ok(Ok(())) => info!("Renderer instance closed"),
                Ok(Err(e)) => warn!("Failed to close renderer instance: {}", e),
                Err(e) => warn!("Renderer close task failed: {}", e),
            }
        }
    }
}
