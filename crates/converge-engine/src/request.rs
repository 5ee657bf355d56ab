//! Operation request types

use serde::{Deserialize, Serialize};

/// Logical kind of a mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Create a new resource
    Create,
    /// Update an existing resource
    Update,
    /// Delete a resource
    Delete,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationKind::Create => write!(f, "create"),
            OperationKind::Update => write!(f, "update"),
            OperationKind::Delete => write!(f, "delete"),
        }
    }
}

/// Identifier of an asynchronous remote operation (flow/task ID).
///
/// Created at submission, consumed by the flow poller, never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationToken(String);

impl OperationToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OperationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OperationToken {
    fn from(token: &str) -> Self {
        Self::new(token)
    }
}

/// A single idempotent mutation against one resource instance.
///
/// Resubmitting the same request after a transient failure must be safe: either
/// the remote action is naturally idempotent, or `client_token` carries an
/// idempotency key the remote side recognizes. The engine cannot check this; it
/// only forwards the token unchanged on every attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRequest {
    /// Resource type (e.g., "mysql_instance", "security_group_attachment")
    pub resource_type: String,

    /// Target resource; unknown before a create is submitted
    pub resource_id: Option<String>,

    pub kind: OperationKind,

    /// Remote action name (e.g., "CreateDBInstance"); also the rate-gate key
    pub action: String,

    /// Vendor-specific parameters, passed through untouched
    pub params: serde_json::Value,

    /// Idempotency key recognized by the remote side
    pub client_token: Option<String>,
}

impl OperationRequest {
    pub fn create(
        resource_type: impl Into<String>,
        action: impl Into<String>,
        params: serde_json::Value,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            resource_id: None,
            kind: OperationKind::Create,
            action: action.into(),
            params,
            client_token: None,
        }
    }

    pub fn update(
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
        action: impl Into<String>,
        params: serde_json::Value,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            resource_id: Some(resource_id.into()),
            kind: OperationKind::Update,
            action: action.into(),
            params,
            client_token: None,
        }
    }

    pub fn delete(
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            resource_id: Some(resource_id.into()),
            kind: OperationKind::Delete,
            action: action.into(),
            params: serde_json::Value::Null,
            client_token: None,
        }
    }

    pub fn with_client_token(mut self, token: impl Into<String>) -> Self {
        self.client_token = Some(token.into());
        self
    }

    /// Human-readable label for logs (type:id or type:<new>)
    pub fn label(&self) -> String {
        format!(
            "{}:{}",
            self.resource_type,
            self.resource_id.as_deref().unwrap_or("<new>")
        )
    }
}
