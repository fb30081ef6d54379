use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the solver pipeline.
///
/// Problems with a single portal (missing or undecodable photo, broken cache entry, I/O)
/// are recorded in the split error report and the run continues. Fatal variants abort it.
#[derive(Debug, Error)]
pub enum SolverError {
    #[error("image not found: {0}")]
    ImageNotFound(PathBuf),

    #[error("failed to decode image {path}: {source}")]
    ImageDecode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("invalid feature cache {path}: {reason}")]
    CacheCorrupt { path: PathBuf, reason: String },

    #[error("missing input: {0}")]
    MissingInput(PathBuf),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("unsupported method: {0}")]
    UnsupportedMethod(String),

    #[error("backend `{0}` is not available in this build")]
    BackendUnavailable(&'static str),

    #[error("gpu error: {0}")]
    Gpu(String),

    #[error("interrupted")]
    Interrupted,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yml::Error),

    #[error(transparent)]
    Encode(#[from] bincode::error::EncodeError),

    #[error(transparent)]
    Decode(#[from] bincode::error::DecodeError),

    #[error(transparent)]
    Persist(#[from] tempfile::PersistError),
}

impl SolverError {
    /// Whether the error must abort the whole run instead of skipping one portal.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SolverError::MissingInput(_)
                | SolverError::InvalidConfig(_)
                | SolverError::UnsupportedMethod(_)
                | SolverError::BackendUnavailable(_)
                | SolverError::Gpu(_)
                | SolverError::Interrupted
        )
    }
}

pub type Result<T> = std::result::Result<T, SolverError>;
