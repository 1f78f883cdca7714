use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error on {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("required file {0} does not exist")]
    MissingFile(PathBuf),

    #[error("could not parse config file {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("missing config key '{0}'")]
    MissingKey(String),

    #[error("invalid value for config key '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("CSV error in {path}: {source}")]
    Csv { path: PathBuf, source: csv::Error },

    #[error("ledger {path} has no '{column}' column")]
    LedgerSchema { path: PathBuf, column: &'static str },

    #[error("image error for {path}: {source}")]
    Image {
        path: PathBuf,
        source: image::ImageError,
    },

    #[error("invalid glob pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        source: glob::PatternError,
    },

    #[error("detector failure: {0}")]
    Detector(String),

    #[cfg(feature = "tensorflow")]
    #[error("tensorflow: {0}")]
    Tensorflow(#[from] tensorflow::Status),

    #[error("class '{0}' is not in the configured class list")]
    UnknownClass(String),

    #[error("invalid split plan: {0}")]
    InvalidSplit(String),

    #[error("corrupt record: {0}")]
    CorruptRecord(String),
}

impl Error {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        Error::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn csv(path: &Path, source: csv::Error) -> Self {
        Error::Csv {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn image(path: &Path, source: image::ImageError) -> Self {
        Error::Image {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn invalid(key: &str, reason: impl Into<String>) -> Self {
        Error::InvalidValue {
            key: key.to_owned(),
            reason: reason.into(),
        }
    }
}
