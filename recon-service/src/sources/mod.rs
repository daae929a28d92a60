//! Pull-only source adapters.
//!
//! Each adapter turns an out-of-scope transport (mail gateway, operations
//! database, payment processor API) into typed batches for the engine.
//! Adapters are idempotent: re-fetching the same window yields the same
//! records, modulo source-side updates.

pub mod email;
pub mod inbound;
pub mod invoice;
pub mod outbound;
pub mod processor;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use service_core::retry::Transient;
use thiserror::Error;

/// Bounded lookback for a fetch.
#[derive(Debug, Clone, Copy)]
pub struct FetchWindow {
    pub days_back: i64,
}

impl FetchWindow {
    pub fn days(days_back: i64) -> Self {
        Self { days_back }
    }

    pub fn cutoff(&self) -> DateTime<Utc> {
        Utc::now() - Duration::days(self.days_back)
    }

    pub fn cutoff_date(&self) -> NaiveDate {
        self.cutoff().date_naive()
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source unavailable: {cause}")]
    Unavailable {
        /// Whether a retry is worthwhile (timeouts, resets, 5xx) as opposed
        /// to auth or exhausted retries.
        transient: bool,
        cause: anyhow::Error,
    },

    #[error("source malformed: {0}")]
    Malformed(anyhow::Error),
}

impl SourceError {
    pub fn transport(cause: impl Into<anyhow::Error>) -> Self {
        Self::Unavailable {
            transient: true,
            cause: cause.into(),
        }
    }

    pub fn auth(cause: impl Into<anyhow::Error>) -> Self {
        Self::Unavailable {
            transient: false,
            cause: cause.into(),
        }
    }

    pub fn malformed(cause: impl Into<anyhow::Error>) -> Self {
        Self::Malformed(cause.into())
    }

    /// Map a reqwest failure: connection problems and 5xx are transient,
    /// 4xx means the credentials or request are wrong.
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            if status.is_client_error() {
                return Self::auth(err);
            }
        }
        Self::transport(err)
    }
}

impl Transient for SourceError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { transient: true, .. })
    }
}

impl From<SourceError> for service_core::error::AppError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::Unavailable { cause, .. } => {
                service_core::error::AppError::SourceUnavailable {
                    source_name: "source".to_string(),
                    cause,
                }
            }
            SourceError::Malformed(cause) => service_core::error::AppError::SourceMalformed {
                source_name: "source".to_string(),
                cause,
            },
        }
    }
}
