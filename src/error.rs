//! Error types for the frame and video pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while rendering frames or assembling a video
#[derive(Error, Debug)]
pub enum Error {
    /// The shared renderer instance is not running (and could not be relaunched)
    #[error("Renderer unavailable: {0}")]
    RendererUnavailable(String),

    /// The template document is missing one of its interactive elements
    #[error("Render target not found: {0}")]
    RenderTargetNotFound(String),

    /// The renderer could not produce pixels for the requested region
    #[error("Capture failed: {0}")]
    CaptureFailed(String),

    /// A renderer call did not finish in time
    #[error("Rendering timed out after {0}ms")]
    RenderTimeout(u64),

    /// The external encoder failed or produced no output
    #[error("Encoding failed: {0}")]
    EncodeFailed(String),

    /// The external encoder did not finish in time
    #[error("Encoding timed out after {0}ms")]
    EncodeTimeout(u64),

    /// The transient storage location is not usable
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Empty or missing input text
    #[error("Invalid input: {0}")]
    InputInvalid(String),

    /// CDP-specific error
    #[cfg(feature = "cdp")]
    #[error("CDP error: {0}")]
    CdpError(String),

    /// Filesystem error while reading or writing workspace files
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable, categorical message suitable for user-facing responses.
    ///
    /// Unlike the `Display` form this never includes backend details.
    pub fn category(&self) -> &'static str {
        match self {
            Error::RendererUnavailable(_) => "renderer unavailable",
            Error::RenderTargetNotFound(_) => "render target not found",
            Error::CaptureFailed(_) => "capture failed",
            Error::RenderTimeout(_) => "render timed out",
            Error::EncodeFailed(_) => "encode failed",
            Error::EncodeTimeout(_) => "encode timed out",
            Error::StorageUnavailable(_) => "storage unavailable",
            Error::InputInvalid(_) => "invalid input",
            #[cfg(feature = "cdp")]
            Error::CdpError(_) => "renderer error",
            Error::Io(_) => "storage error",
        }
    }

    /// Whether the error indicates the shared renderer instance itself is gone
    /// (as opposed to a failure scoped to one context).
    pub fn is_instance_failure(&self) -> bool {
        matches!(self, Error::RendererUnavailable(_))
    }
}

#[cfg(feature = "cdp")]
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::CdpError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_hides_detail() {
        let err = Error::EncodeFailed("ffmpeg exited with status 1: boom".into());
        assert_eq!(err.category(), "encode failed");
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(!err.is_instance_failure());
    }
}
