use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use hagglz_core::errors::ApplicationError;

pub mod negotiation;
pub mod strategy_memory;

pub use negotiation::SqlNegotiationRepository;
pub use strategy_memory::SqlStrategyMemory;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("row not found: {0}")]
    Missing(String),
    #[error("write conflict: {0}")]
    Conflict(String),
}

impl RepositoryError {
    pub fn into_memory_store(self) -> ApplicationError {
        ApplicationError::MemoryStore(self.to_string())
    }

    pub fn into_persistence(self) -> ApplicationError {
        ApplicationError::Persistence(self.to_string())
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(error: serde_json::Error) -> Self {
        Self::Decode(error.to_string())
    }
}

/// Fixed-width RFC 3339 so stored timestamps sort lexicographically.
pub(crate) fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}
