//! Errors surfaced by the ledger controller.
//!
//! - [`ClientError`] is what a single request to the backend can fail with.
//!   It is `Clone` because a failed fetch is kept inside its cache entry and
//!   handed to every consumer that shared the request.
//! - [`FilterError`] rejects invalid filter/sort/page input at the boundary.
//! - [`MutationError`] is returned by the mutation coordinator.
use api_types::transaction::UnknownSortKey;
use chrono::NaiveDate;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("server unreachable: {0}")]
    Network(String),
    #[error("unauthenticated")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("not found")]
    NotFound,
    #[error("{message}")]
    Validation { status: u16, message: String },
    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },
    #[error("invalid response: {0}")]
    Decode(String),
    #[error("invalid client configuration: {0}")]
    Config(String),
    /// The task running the request panicked or was cancelled.
    #[error("request aborted: {0}")]
    Aborted(String),
}

impl ClientError {
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            401 => Self::Unauthorized,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            400..=499 => Self::Validation { status, message },
            _ => Self::Server { status, message },
        }
    }

    /// Only transport failures are worth retrying automatically.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error(transparent)]
    UnknownSortKey(#[from] UnknownSortKey),
    #[error("start date {start} is after end date {end}")]
    InvalidDateRange { start: NaiveDate, end: NaiveDate },
    #[error("page must be >= 1")]
    InvalidPage,
    #[error("page size must be between 1 and {max}, got {size}")]
    InvalidPageSize { size: u32, max: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MutationError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("{failed} of {total} transactions could not be updated")]
    PartialBatch { failed: usize, total: usize },
}
