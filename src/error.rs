use std::time::Duration;

use thiserror::Error;

pub(crate) type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, Error, PartialEq)]
pub(crate) enum Error {
    /// User input that does not form a valid filter.
    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    /// A mode value that selects no template family.
    #[error("unrecognized analysis mode: {0}")]
    Configuration(String),

    #[error("no `{purpose}` template for {mode} mode")]
    TemplateNotFound { purpose: String, mode: String },

    #[error("template placeholder `{{{placeholder}}}` was left unresolved")]
    Substitution { placeholder: String },

    #[error("warehouse query failed: {0}")]
    QueryExecution(String),

    #[error("search API request failed: {0}")]
    SearchApi(String),

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
}

impl Error {
    pub(crate) fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }
}
