use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Invalid options, snapshot names or region declarations.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("cannot read image {}: {reason}", path.display())]
    ImageRead { path: PathBuf, reason: String },

    /// The compare step could not run at all (as opposed to finding a difference).
    #[error("comparison failed: {0}")]
    Comparison(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("capture failed: {0}")]
    Capture(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn image_read(path: &Path, reason: impl Into<String>) -> Self {
        Error::ImageRead {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
