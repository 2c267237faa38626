use ledger_view::{ClientError, FilterError, MutationError};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("request failed: {0}")]
    Client(#[from] ClientError),
    #[error("{0}")]
    Mutation(#[from] MutationError),
    #[error("invalid filter: {0}")]
    Filter(#[from] FilterError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
