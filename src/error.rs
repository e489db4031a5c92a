//! Error types returned at the fetch boundary.

use thiserror::Error;

/// Why a single remote fetch produced no data.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The requested dataset key has no known identifier.
    #[error("unknown dataset: {0}")]
    UnknownDataset(String),

    /// A credential the endpoint requires is not configured.
    #[error("missing credential: {0} is not set")]
    MissingCredential(&'static str),

    /// The request could not be sent or the body could not be read.
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The endpoint answered with a non-success status.
    #[error("{url} returned status {status}: {body}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
        body: String,
    },

    /// The response (or the request URL) did not have the expected shape.
    #[error("parse error: {0}")]
    Parse(String),
}

impl FetchError {
    /// Short label used in structured log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::UnknownDataset(_) => "unknown_dataset",
            FetchError::MissingCredential(_) => "missing_credential",
            FetchError::Transport(_) => "transport",
            FetchError::Status { .. } => "status",
            FetchError::Parse(_) => "parse",
        }
    }
}
