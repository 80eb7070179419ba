use thiserror::Error;

use hagglz_core::errors::ApplicationError;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider returned status {status}")]
    Status { status: u16, body: String },
    #[error("unexpected provider response: {0}")]
    Decode(String),
    #[error("template error: {0}")]
    Template(#[from] tera::Error),
    #[error("agent configuration error: {0}")]
    Configuration(String),
}

impl AgentError {
    /// Maps onto the engine's taxonomy. Transport faults, throttling and
    /// server errors stay retryable; rejected credentials or requests and
    /// broken templates do not.
    pub fn into_application(self, capability: &str) -> ApplicationError {
        match self {
            Self::Status { status, .. }
                if (400..500).contains(&status) && status != 408 && status != 429 =>
            {
                ApplicationError::Configuration(format!("{capability} rejected the request ({status})"))
            }
            Self::Template(error) => {
                ApplicationError::Configuration(format!("{capability} template: {error}"))
            }
            Self::Configuration(message) => ApplicationError::Configuration(message),
            other => ApplicationError::provider(capability, other.to_string()),
        }
    }
}
