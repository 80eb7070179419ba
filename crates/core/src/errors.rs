use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::classification::BillCategory;
use crate::domain::negotiation::{FailureReason, NegotiationId};
use crate::flows::FlowTransitionError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error(transparent)]
    FlowTransition(#[from] FlowTransitionError),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

/// Kind reported alongside every user-visible failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Classification,
    Provider,
    CapabilityUnavailable,
    MemoryStore,
    Persistence,
    NotFound,
    Cancelled,
    Configuration,
    Domain,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Classification => "classification",
            Self::Provider => "provider",
            Self::CapabilityUnavailable => "capability_unavailable",
            Self::MemoryStore => "memory_store",
            Self::Persistence => "persistence",
            Self::NotFound => "not_found",
            Self::Cancelled => "cancelled",
            Self::Configuration => "configuration",
            Self::Domain => "domain",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "validation" => Some(Self::Validation),
            "classification" => Some(Self::Classification),
            "provider" => Some(Self::Provider),
            "capability_unavailable" => Some(Self::CapabilityUnavailable),
            "memory_store" => Some(Self::MemoryStore),
            "persistence" => Some(Self::Persistence),
            "not_found" => Some(Self::NotFound),
            "cancelled" => Some(Self::Cancelled),
            "configuration" => Some(Self::Configuration),
            "domain" => Some(Self::Domain),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("classification produced no usable result: {0}")]
    Classification(String),
    #[error("{capability} call failed: {message}")]
    Provider { capability: String, message: String },
    #[error("no specialist registered for category {0}")]
    CapabilityUnavailable(BillCategory),
    #[error("strategy memory failure: {0}")]
    MemoryStore(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("negotiation {0} not found")]
    NotFound(NegotiationId),
    #[error("cancelled: {0}")]
    Cancelled(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl ApplicationError {
    pub fn provider(capability: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider { capability: capability.into(), message: message.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Domain(_) => ErrorKind::Domain,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Classification(_) => ErrorKind::Classification,
            Self::Provider { .. } => ErrorKind::Provider,
            Self::CapabilityUnavailable(_) => ErrorKind::CapabilityUnavailable,
            Self::MemoryStore(_) => ErrorKind::MemoryStore,
            Self::Persistence(_) => ErrorKind::Persistence,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::Configuration(_) => ErrorKind::Configuration,
        }
    }

    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Provider { .. } | Self::MemoryStore(_))
    }

    /// Reason stored on a failed record. Provider payloads are reduced to
    /// the capability name so they never reach users.
    pub fn failure_reason(&self) -> FailureReason {
        let message = match self {
            Self::Provider { capability, .. } => {
                format!("{capability} did not respond successfully after retries")
            }
            Self::MemoryStore(_) => "strategy memory is unavailable".to_string(),
            Self::Persistence(_) => "negotiation records are unavailable".to_string(),
            other => other.to_string(),
        };
        FailureReason { kind: self.kind(), message }
    }

    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { kind: ErrorKind, message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { kind: ErrorKind, message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { kind: ErrorKind, message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BadRequest { kind, .. }
            | Self::Conflict { kind, .. }
            | Self::ServiceUnavailable { kind, .. } => *kind,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Internal { .. } => ErrorKind::Configuration,
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::NotFound { .. } => "No negotiation exists with that identifier.",
            Self::Conflict { .. } => "The negotiation is not in a state that accepts this action.",
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }
}

const UNASSIGNED: &str = "unassigned";

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let kind = value.kind();
        let correlation_id = UNASSIGNED.to_owned();
        match value {
            ApplicationError::Validation(message) => {
                Self::BadRequest { kind, message, correlation_id }
            }
            ApplicationError::Domain(error) => {
                Self::Conflict { kind, message: error.to_string(), correlation_id }
            }
            ApplicationError::NotFound(id) => {
                Self::NotFound { message: format!("negotiation {id}"), correlation_id }
            }
            ApplicationError::Cancelled(message) => Self::Conflict { kind, message, correlation_id },
            ApplicationError::Provider { capability, .. } => Self::ServiceUnavailable {
                kind,
                message: format!("{capability} unavailable"),
                correlation_id,
            },
            ApplicationError::MemoryStore(message)
            | ApplicationError::Persistence(message)
            | ApplicationError::Classification(message) => {
                Self::ServiceUnavailable { kind, message, correlation_id }
            }
            ApplicationError::CapabilityUnavailable(category) => Self::ServiceUnavailable {
                kind,
                message: format!("no specialist for {category}"),
                correlation_id,
            },
            ApplicationError::Configuration(message) => Self::Internal { message, correlation_id },
        }
    }
}
