//! Engine error types

use crate::request::OperationToken;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Structured error returned by the remote control plane.
///
/// `code` is the stable, namespaced machine-readable code
/// (e.g. `"ResourceNotFound.Instance"`); the classifier keys on it.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("[{code}] {message}")]
pub struct RemoteError {
    pub code: String,
    pub message: String,
}

impl RemoteError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Blocking stage of a reconciliation, used to label timeouts and cancellations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Submit,
    Poll,
    Converge,
    Read,
    DeleteConfirm,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Submit => write!(f, "submit"),
            Stage::Poll => write!(f, "poll"),
            Stage::Converge => write!(f, "converge"),
            Stage::Read => write!(f, "read"),
            Stage::DeleteConfirm => write!(f, "delete confirmation"),
        }
    }
}

/// Errors surfaced by the reconciliation engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Remote error {0}")]
    Remote(#[from] RemoteError),

    #[error("Invalid request: {0}")]
    Invalid(String),

    #[error("Field `{field}` cannot be changed after creation")]
    ImmutableField { field: String },

    /// The remote side explicitly rejected the operation. `reason` is verbatim.
    #[error("{reason}")]
    OperationFailed {
        token: Option<OperationToken>,
        reason: String,
    },

    #[error(
        "{stage} timed out after {elapsed:?}; the operation may still be in progress remotely"
    )]
    TimedOut {
        stage: Stage,
        elapsed: Duration,
        last_error: Option<Box<EngineError>>,
    },

    #[error("{stage} cancelled")]
    Cancelled { stage: Stage },

    #[error("Unrecognized operation status: {0}")]
    UnknownStatus(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Attempt aborted before returning a result: {0}")]
    Panicked(String),

    /// A multi-group update failed after some groups were already applied
    /// remotely. `applied` lists them in order; `source` is the failure.
    #[error("Update stopped after applying [{}]: {source}", .applied.join(", "))]
    UpdateIncomplete {
        applied: Vec<String>,
        #[source]
        source: Box<EngineError>,
    },

    /// Non-terminal wait signal fed back into a retry loop.
    #[error("Still waiting: {0}")]
    Pending(String),
}

impl EngineError {
    /// "We don't know the final state": the local wait ran out.
    pub fn is_timeout(&self) -> bool {
        match self {
            EngineError::TimedOut { .. } => true,
            EngineError::UpdateIncomplete { source, .. } => source.is_timeout(),
            _ => false,
        }
    }

    /// Rejected locally before anything was sent to the remote side.
    pub fn is_fatal_validation(&self) -> bool {
        matches!(
            self,
            EngineError::Invalid(_) | EngineError::ImmutableField { .. }
        )
    }

    /// Remote-supplied failure reason, when the remote side rejected the operation.
    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            EngineError::OperationFailed { reason, .. } => Some(reason),
            EngineError::UpdateIncomplete { source, .. } => source.failure_reason(),
            _ => None,
        }
    }

    /// Update groups applied remotely before the error, if any
    pub fn applied_groups(&self) -> &[String] {
        match self {
            EngineError::UpdateIncomplete { applied, .. } => applied,
            _ => &[],
        }
    }

    /// Remote error code, if this error came straight from the control plane.
    pub fn remote_code(&self) -> Option<&str> {
        match self {
            EngineError::Remote(e) => Some(&e.code),
            EngineError::UpdateIncomplete { source, .. } => source.remote_code(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
