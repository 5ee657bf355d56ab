//! Remote control-plane capability
//!
//! The engine depends on exactly three remote calls. Vendor SDK clients are
//! adapted to this trait by the provider layer; the engine never sees anything
//! else of them.

use crate::error::RemoteError;
use crate::request::{OperationRequest, OperationToken};
use crate::state::ResourceState;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Narrow, mockable view of a remote control plane
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Issue one mutation. Called once per retry attempt.
    async fn mutate(&self, request: &OperationRequest) -> Result<MutateResponse, RemoteError>;

    /// Query the status of an asynchronous operation
    async fn query_status(&self, token: &OperationToken) -> Result<FlowStatus, RemoteError>;

    /// Read a resource; `Ok(None)` when it does not exist
    async fn read(
        &self,
        resource_type: &str,
        resource_id: &str,
    ) -> Result<Option<ResourceState>, RemoteError>;
}

/// Raw response of a mutation.
///
/// Asynchronous operations return a non-empty `token` and no `result`;
/// synchronous ones return an optional `result` and no `token`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MutateResponse {
    /// Resource the mutation applies to (required for creates)
    pub resource_id: Option<String>,

    pub token: Option<String>,

    pub result: Option<serde_json::Value>,
}

impl MutateResponse {
    pub fn accepted(resource_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            resource_id: Some(resource_id.into()),
            token: Some(token.into()),
            result: None,
        }
    }

    pub fn completed(resource_id: impl Into<String>, result: serde_json::Value) -> Self {
        Self {
            resource_id: Some(resource_id.into()),
            token: None,
            result: Some(result),
        }
    }

    /// Synchronous success with nothing to report
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Raw status of an asynchronous operation; `state` is the vendor's vocabulary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowStatus {
    pub state: String,
    pub failure_reason: Option<String>,
}

impl FlowStatus {
    pub fn new(state: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            failure_reason: None,
        }
    }

    pub fn running() -> Self {
        Self::new("running")
    }

    pub fn succeeded() -> Self {
        Self::new("succeeded")
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            state: "failed".to_string(),
            failure_reason: Some(reason.into()),
        }
    }
}
