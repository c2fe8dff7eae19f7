use blocktasks_core::AppError;
use thiserror::Error;

use crate::hex::QuantityError;

#[derive(Debug, Error)]
pub enum ChainError {
    /// The caller passed a block reference or range that cannot be requested.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected http status: {0}")]
    Status(reqwest::StatusCode),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("invalid hex quantity {value:?}: {source}")]
    Hex {
        value: String,
        #[source]
        source: QuantityError,
    },
}

impl From<ChainError> for AppError {
    fn from(err: ChainError) -> Self {
        match err {
            ChainError::InvalidArgument(msg) => AppError::InvalidArgument(msg),
            ChainError::Json(_) | ChainError::Decode(_) | ChainError::Hex { .. } => AppError::Decode(err.to_string()),
            ChainError::Http(_) | ChainError::Status(_) => AppError::Rpc(err.to_string()),
        }
    }
}
