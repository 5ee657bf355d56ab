//! Converge engine
//!
//! Drives mutating cloud API calls that only *start* a remote operation to a
//! terminal, observable state: submit once per attempt, poll the returned
//! operation token, then re-read the resource until it settles. Transient
//! failures are absorbed under explicit budgets; fatal ones short-circuit.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │        provider CRUD layer (schema, CLI)        │
//! └─────────────────┬───────────────────────────────┘
//!                   │ create / read / update / delete
//! ┌─────────────────▼───────────────────────────────┐
//! │                  Reconciler                     │
//! │  ┌───────────┐  ┌────────────┐  ┌────────────┐  │
//! │  │ Submitter │─▶│ FlowPoller │─▶│ Convergence│  │
//! │  │           │  │            │  │   Reader   │  │
//! │  └─────┬─────┘  └─────┬──────┘  └─────┬──────┘  │
//! │        └─────── RetryExecutor ────────┘         │
//! │            ErrorClassifier · RateGate           │
//! └─────────────────┬───────────────────────────────┘
//!                   │ mutate / query_status / read
//! ┌─────────────────▼───────────────────────────────┐
//! │          trait ControlPlane (vendor SDK)        │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use converge_engine::{OperationClass, Reconciler, ResourceKind};
//! use std::sync::Arc;
//!
//! let kind = ResourceKind::new("mysql_instance", OperationClass::HeavyProvisioning)
//!     .with_actions("CreateDBInstance", "IsolateDBInstance")
//!     .with_transitional(["creating"]);
//!
//! let reconciler = Reconciler::new(Arc::new(client));
//! let request = kind.create_request(params).with_client_token(request_id);
//! let state = reconciler.create(&kind, &request).await?;
//! ```

pub mod budget;
pub mod classify;
pub mod converge;
pub mod error;
pub mod kind;
pub mod poller;
pub mod rate_limit;
pub mod reconciler;
pub mod remote;
pub mod request;
pub mod retry;
pub mod state;
pub mod submit;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

// Re-exports
pub use budget::{Backoff, BudgetProfile, Budgets, MAX_DEADLINE, OperationClass, RetryBudget};
pub use classify::{Classification, ClassifierBuilder, CodePattern, ErrorClassifier, ErrorPath};
pub use converge::{ConvergenceReader, Readiness};
pub use error::{EngineError, RemoteError, Result, Stage};
pub use kind::{NotFoundOnUpdate, ResourceKind, UpdateGroup};
pub use poller::{
    FlowMachine, FlowPoller, FlowStatusMap, OperationOutcome, PollReport, PollState, RemotePhase,
};
pub use rate_limit::RateGate;
pub use reconciler::{Changes, Reconciler, UpdateReport};
pub use remote::{ControlPlane, FlowStatus, MutateResponse};
pub use request::{OperationKind, OperationRequest, OperationToken};
pub use retry::{AttemptResult, ClassifiedError, RetryExecutor};
pub use state::ResourceState;
pub use submit::{Submission, Submitter};
pub use tokio_util::sync::CancellationToken;
