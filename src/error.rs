//! Error taxonomy for the ingestion pipeline.
//!
//! Only [`PersistenceError`] is fatal to a run. Fetch, download and parse
//! failures degrade a single page, item or attachment and are logged where
//! they occur.

use std::path::PathBuf;
use thiserror::Error;

/// The remote portal was unreachable or its markup no longer matches.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} answered with HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("no element matched `{selector}` on {url}")]
    SelectorNotFound { selector: &'static str, url: String },

    #[error("cannot build a URL from {input:?}: {source}")]
    InvalidUrl {
        input: String,
        #[source]
        source: url::ParseError,
    },
}

impl FetchError {
    /// Whether the same request may succeed if sent again.
    ///
    /// Connection failures, timeouts, server errors, 408 and 429 are
    /// transient. Other 4xx answers, missing selectors and bad URLs will
    /// fail the same way on every attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Http { source, .. } => !source.is_builder(),
            FetchError::Status { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            FetchError::SelectorNotFound { .. } | FetchError::InvalidUrl { .. } => false,
        }
    }
}

/// An attachment could not be transferred to local storage.
///
/// The attachment's `is_loaded` flag stays false so the next run retries it.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} answered with HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("refusing to write attachment with unsafe filename {0:?}")]
    InvalidFilename(String),

    #[error("writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The snapshot file could not be read, locked or replaced.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("reading snapshot {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("writing snapshot {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("locking snapshot via {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A date or detail field did not have the expected shape.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("unparsable news date {value:?}: {source}")]
    Date {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
}

/// Configuration file or values are unusable.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing config {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("building HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// A run aborted before a complete snapshot could be written.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}
