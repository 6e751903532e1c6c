//! Frame producer: one rendered image of the text overlay per call

use crate::pool::RendererPool;
use crate::{ClipRegion, Error, Interaction, RenderContext, Result, TemplateSource};
use base64::Engine as Base64Engine;
use std::sync::Arc;
use url::Url;

/// Control that switches the overlay to the white background
pub const TOGGLE_SELECTOR: &str = "#toggleButtonWhite";
/// The square overlay that gets captured
pub const OVERLAY_SELECTOR: &str = "#textOverlay";
/// The editable field driving the overlay text
pub const INPUT_SELECTOR: &str = "#textInput";

const BUNDLED_TEMPLATE: &str = include_str!("../assets/template.html");

/// Renders text into a PNG of the overlay.
///
/// Every call loads the template afresh and replaces the field content in
/// full, so a frame never depends on the frame before it.
#[derive(Debug, Clone)]
pub struct FrameProducer {
    document_url: Arc<str>,
    clip_size: u32,
}

impl FrameProducer {
    pub fn new(template: &TemplateSource, clip_size: u32) -> Result<Self> {
        let document_url = match template {
            TemplateSource::Bundled => format!(
                "data:text/html;base64,{}",
                Base64Engine::encode(&base64::engine::general_purpose::STANDARD, BUNDLED_TEMPLATE)
            ),
            TemplateSource::Path(path) => {
                let path = path.canonicalize().map_err(|e| {
                    Error::RenderTargetNotFound(format!(
                        "Template {} is not readable: {}",
                        path.display(),
                        e
                    ))
                })?;
                Url::from_file_path(&path)
                    .map_err(|()| {
                        Error::RenderTargetNotFound(format!(
                            "Template {} has no file URL",
                            path.display()
                        ))
                    })?
                    .to_string()
            }
        };

        Ok(Self {
            document_url: document_url.into(),
            clip_size,
        })
    }

    /// URL the template is loaded from
    pub fn document_url(&self) -> &str {
        &self.document_url
    }

    /// Render `text` inside an already acquired context. Blocking.
    pub fn render(&self, ctx: &mut dyn RenderContext, text: &str) -> Result<Vec<u8>> {
        ctx.load_local_document(&self.document_url)?;

        ctx.interact(TOGGLE_SELECTOR, Interaction::Click)?;
        ctx.interact(OVERLAY_SELECTOR, Interaction::Click)?;
        ctx.interact(INPUT_SELECTOR, Interaction::Click)?;
        ctx.set_field_value(INPUT_SELECTOR, text)?;

        let bbox = ctx.locate_element_bounding_box(OVERLAY_SELECTOR)?;
        let png = ctx.capture_region(ClipRegion::square_at(&bbox, self.clip_size))?;
        if png.is_empty() {
            return Err(Error::CaptureFailed("Renderer returned an empty image".into()));
        }
        Ok(png)
    }

    /// Acquire a context from `pool`, render `text`, and release the context.
    pub async fn produce(&self, pool: &RendererPool, text: &str) -> Result<Vec<u8>> {
        let producer = self.clone();
        let text = text.to_string();
        pool.with_context(move |ctx| producer.render(ctx, &text))
            .await
    }
}
