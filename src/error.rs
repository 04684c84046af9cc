use std::path::PathBuf;

use burn::record::RecorderError;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while loading data, training or writing artifacts.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode or encode image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("checkpoint error: {0}")]
    Recorder(#[from] RecorderError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("loss became non-finite ({loss}) at epoch {epoch}, batch {batch}")]
    Diverged { epoch: usize, batch: usize, loss: f32 },

    #[error("tensor data conversion failed: {0}")]
    Tensor(String),

    #[error("failed to build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn image(path: impl Into<PathBuf>, source: image::ImageError) -> Self {
        Self::Image {
            path: path.into(),
            source,
        }
    }
}
