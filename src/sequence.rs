//! Sequence builder: word-by-word reveal frames for one video request

use crate::frame::FrameProducer;
use crate::pool::RendererPool;
use crate::workspace::Workspace;
use crate::{Error, Result};
use log::debug;

/// Validated input text of one image or video request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRequest {
    text: String,
}

impl RenderRequest {
    /// Rejects empty and whitespace-only text with [`Error::InputInvalid`].
    pub fn new(text: impl Into<String>) -> Result<Self> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(Error::InputInvalid("Parameter `text` is required".into()));
        }
        Ok(Self { text })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Number of frames a video of this text consists of
    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

/// One rendered frame, held in memory only until it is written to a workspace
#[derive(Debug, Clone)]
pub struct RenderedFrame {
    pub sequence_index: usize,
    pub image_bytes: Vec<u8>,
    /// The prefix of the input that was rendered
    pub source_text: String,
}

/// Progressively longer word prefixes of `text`.
///
/// Runs of whitespace count as one separator, so the result never contains
/// empty strings and has exactly one entry per word.
///
/// ```
/// assert_eq!(bratgen::word_prefixes("  no   sleep "), vec!["no", "no sleep"]);
/// ```
pub fn word_prefixes(text: &str) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    (1..=words.len()).map(|n| words[..n].join(" ")).collect()
}

/// Drives one frame render per word prefix, in order, into a workspace.
pub struct SequenceBuilder<'a> {
    pool: &'a RendererPool,
    producer: &'a FrameProducer,
}

impl<'a> SequenceBuilder<'a> {
    pub fn new(pool: &'a RendererPool, producer: &'a FrameProducer) -> Self {
        Self { pool, producer }
    }

    /// Render every prefix of `request` and write it to `workspace`.
    ///
    /// Frame `i` is fully written before frame `i + 1` is rendered, and only
    /// one frame's bytes are held in memory at a time. The first failure
    /// aborts the sequence; frames already written stay in the workspace
    /// until it is destroyed.
    pub async fn build(&self, request: &RenderRequest, workspace: &mut Workspace) -> Result<usize> {
        for (sequence_index, source_text) in word_prefixes(request.text()).into_iter().enumerate() {
            let image_bytes = self.producer.produce(self.pool, &source_text).await?;
            debug!(
                "Rendered frame {} ({} bytes) for workspace {}",
                sequence_index,
                image_bytes.len(),
                workspace.id()
            );

            workspace
                .write_frame(RenderedFrame {
                    sequence_index,
                    image_bytes,
                    source_text,
                })
                .await?;
        }
        Ok(workspace.frames().len())
    }
}
