//! Error types for the capture engine

use thiserror::Error;

/// Result type alias for capture operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can end a capture operation
///
/// Every variant is terminal for the operation that produced it. The engine
/// never retries internally; callers decide whether to run the whole
/// operation again.
#[derive(Error, Debug)]
pub enum Error {
    /// Geometry of the hosted document could not be read
    #[error("Surface cannot be measured: {0}")]
    Unmeasurable(String),

    /// The host refused to capture the document
    #[error("Capture restricted by host: {0}")]
    RestrictedSurface(String),

    /// The target was closed or navigated away mid-operation
    #[error("Capture target detached: {0}")]
    DetachedTarget(String),

    /// Selection is below the minimum size in at least one dimension
    #[error("Selection of {width}x{height} is below the minimum capture size")]
    DegenerateSelection { width: f64, height: f64 },

    /// Selection does not overlap the surface content at all
    #[error("Selection at ({x}, {y}) lies outside the {content_width}x{content_height} content")]
    SelectionOutOfBounds {
        x: f64,
        y: f64,
        content_width: f64,
        content_height: f64,
    },

    /// Operation was cancelled by the caller
    #[error("Capture cancelled")]
    Cancelled,

    /// Operation timed out
    #[error("Operation timed out after {0}ms")]
    Timeout(u64),

    /// Raster decode, crop or encode failed
    #[error("Image processing failed: {0}")]
    ImageError(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// CDP-specific error
    #[cfg(feature = "cdp")]
    #[error("CDP error: {0}")]
    CdpError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

/// Stable, localization-free classification of an [`Error`].
///
/// Callers map these to user-facing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Unmeasurable,
    RestrictedSurface,
    DetachedTarget,
    DegenerateSelection,
    SelectionOutOfBounds,
    Cancelled,
    Timeout,
    Image,
    Config,
    Backend,
    Other,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Unmeasurable(_) => ErrorKind::Unmeasurable,
            Error::RestrictedSurface(_) => ErrorKind::RestrictedSurface,
            Error::DetachedTarget(_) => ErrorKind::DetachedTarget,
            Error::DegenerateSelection { .. } => ErrorKind::DegenerateSelection,
            Error::SelectionOutOfBounds { .. } => ErrorKind::SelectionOutOfBounds,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::ImageError(_) => ErrorKind::Image,
            Error::ConfigError(_) => ErrorKind::Config,
            #[cfg(feature = "cdp")]
            Error::CdpError(_) => ErrorKind::Backend,
            Error::Other(_) => ErrorKind::Other,
        }
    }

    /// Whether the error represents a quiet no-op rather than a failure.
    ///
    /// A too-small selection or a user cancel ends the operation without
    /// anything worth reporting to the user.
    pub fn is_silent(&self) -> bool {
        matches!(self, Error::DegenerateSelection { .. } | Error::Cancelled)
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Error::ImageError(err.to_string())
    }
}

#[cfg(feature = "cdp")]
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::CdpError(err.to_string())
    }
}
