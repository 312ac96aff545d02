use std::error::Error as StdError;

use reqwest::StatusCode;
use thiserror::Error;

pub use anyhow::Context;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    #[error("request to {url} failed with status {status}")]
    Status { status: StatusCode, url: String },
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    pub fn message<T: Into<String>>(msg: T) -> Self {
        AppError::Message(msg.into())
    }

    pub fn status(status: StatusCode, url: impl Into<String>) -> Self {
        AppError::Status {
            status,
            url: url.into(),
        }
    }

    /// Whether this error means the upstream provider is throttling us.
    ///
    /// Transport layers do not always surface the status code in a structured way, so any error
    /// whose message mentions `429` counts as well. reqwest renders the request URL into its own
    /// message, so only its underlying causes are searched there.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            AppError::Status { status, .. } => *status == StatusCode::TOO_MANY_REQUESTS,
            AppError::Reqwest(err) => {
                err.status() == Some(StatusCode::TOO_MANY_REQUESTS)
                    || causes_mention_429(err.source())
            }
            AppError::Other(err) => err.chain().any(|cause| {
                match cause.downcast_ref::<reqwest::Error>() {
                    Some(inner) => inner.status() == Some(StatusCode::TOO_MANY_REQUESTS),
                    None => cause.to_string().contains("429"),
                }
            }),
            other => other.to_string().contains("429"),
        }
    }
}

fn causes_mention_429(mut cause: Option<&(dyn StdError + 'static)>) -> bool {
    while let Some(err) = cause {
        if err.to_string().contains("429") {
            return true;
        }
        cause = err.source();
    }
    false
}
