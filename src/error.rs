use thiserror::Error;

/// Failure setting a single field on a work item record.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FieldError {
    #[error("unknown field '{0}' for this work item type")]
    Unknown(String),
    #[error("fields '{first}' and '{second}' both name '{reference_name}'")]
    Conflict {
        reference_name: String,
        first: String,
        second: String,
    },
}

/// Errors surfaced by a [`crate::providers::WorkItemProvider`].
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("work item {0} does not exist or access is denied")]
    NotFoundOrDenied(u64),

    #[error("invalid argument: {0}")]
    Argument(&'static str),

    #[error("provider is not connected; call connect first")]
    NotConfigured,

    #[error("work item failed validation, invalid fields: {}", .fields.join(", "))]
    Validation { fields: Vec<String> },

    #[error("work item was produced by {found}, expected {expected}")]
    TypeMismatch { expected: String, found: String },

    #[error(transparent)]
    Field(#[from] FieldError),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("server returned {status}: {message}")]
    Remote { status: u16, message: String },
}

impl ProviderError {
    /// Whether the error leaves the session unusable for the rest of a pass.
    pub fn aborts_pass(&self) -> bool {
        matches!(
            self,
            ProviderError::InvalidConfiguration(_)
                | ProviderError::Authentication(_)
                | ProviderError::NotFoundOrDenied(_)
                | ProviderError::NotConfigured
        )
    }
}
