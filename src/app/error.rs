use thiserror::Error;

use crate::infra::store::StoreError;

/// Failures scoped to the user action that triggered them.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("sign in required")]
    Unauthenticated,
    #[error("only the author can delete this post")]
    NotAuthor,
    #[error("{0} not found")]
    NotFound(String),
    #[error("write rejected: {0}")]
    WriteRejected(StoreError),
    #[error("subscription failed: {0}")]
    Channel(StoreError),
    #[error("invalid input: {0}")]
    Invalid(String),
    #[error("a submission is already in progress")]
    Busy,
}

impl From<serde_json::Error> for FeedError {
    fn from(err: serde_json::Error) -> Self {
        FeedError::Invalid(err.to_string())
    }
}
