use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum MirrorError {
    #[error("invalid candidate id: {0}")]
    InvalidCandidateId(String),

    #[error("unknown imaging format: {0} (expected bids or minc)")]
    UnknownSchema(String),

    #[error("none of the candidate ids provided ({0}) matched the dataset")]
    EmptyCandidateFilter(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("request failed: {0}")]
    Transport(String),

    #[error("{context} returned status {status}")]
    ServerStatus { status: u16, context: String },

    #[error("failed to parse response for {context}: {message}")]
    ApiResponseParse { context: String, message: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl MirrorError {
    pub fn filesystem(err: impl std::fmt::Display) -> Self {
        MirrorError::Filesystem(err.to_string())
    }
}
