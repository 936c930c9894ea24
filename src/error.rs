use std::time::Duration;

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
    #[error(transparent)]
    Notify(#[from] notify::Error),
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    pub fn message<T: Into<String>>(msg: T) -> Self {
        AppError::Message(msg.into())
    }
}

/// Failure reported by an upstream quote or account source.
///
/// Cloneable so a single in-flight result can be handed to every caller that
/// awaited it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("instrument not found: {0}")]
    NotFound(String),
    #[error("rate limited, retry in {}s", .retry_after_ms.div_ceil(1000))]
    RateLimited { retry_after_ms: u64 },
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("incomplete quote: {0}")]
    Incomplete(String),
}

impl SourceError {
    pub fn not_found<T: Into<String>>(msg: T) -> Self {
        SourceError::NotFound(msg.into())
    }

    pub fn unauthorized<T: Into<String>>(msg: T) -> Self {
        SourceError::Unauthorized(msg.into())
    }

    pub fn transport<T: Into<String>>(msg: T) -> Self {
        SourceError::Transport(msg.into())
    }

    pub fn incomplete<T: Into<String>>(msg: T) -> Self {
        SourceError::Incomplete(msg.into())
    }

    pub fn rate_limited(retry_after: Duration) -> Self {
        SourceError::RateLimited {
            retry_after_ms: retry_after.as_millis().min(u128::from(u64::MAX)) as u64,
        }
    }

    pub const fn is_rate_limited(&self) -> bool {
        matches!(self, SourceError::RateLimited { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SourceError::RateLimited { retry_after_ms } => {
                Some(Duration::from_millis(*retry_after_ms))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_reports_remaining_seconds() {
        let err = SourceError::rate_limited(Duration::from_millis(20_500));
        assert_eq!(err.to_string(), "rate limited, retry in 21s");
        assert_eq!(err.retry_after(), Some(Duration::from_millis(20_500)));
        assert!(err.is_rate_limited());
    }

    #[test]
    fn source_errors_convert_into_app_errors() {
        let err: AppError = SourceError::not_found("ZZZZ").into();
        assert!(matches!(err, AppError::Source(SourceError::NotFound(_))));
    }
}
