//! Flow poller
//!
//! Drives an operation token to a terminal state:
//!
//! ```text
//! Submitted ──▶ Polling ──┬──▶ Succeeded
//!                 ▲   │   ├──▶ Failed(reason)
//!                 └───┘   └──▶ TimedOut
//!               (running)
//! ```
//!
//! One retry budget governs the whole poll, not each status query.

use crate::budget::RetryBudget;
use crate::classify::{Classification, ErrorClassifier, ErrorPath};
use crate::error::{EngineError, Result, Stage};
use crate::rate_limit::RateGate;
use crate::remote::{ControlPlane, FlowStatus};
use crate::request::OperationToken;
use crate::retry::{AttemptResult, ClassifiedError, RetryExecutor};
use crate::state::ResourceState;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};

const QUERY_STATUS_ACTION: &str = "QueryStatus";
const READ_ACTION: &str = "Read";

/// Terminal result of an operation
#[derive(Debug, Clone, PartialEq)]
pub enum OperationOutcome {
    Succeeded(serde_json::Value),
    Failed(String),
    TimedOut,
}

impl OperationOutcome {
    /// Turn a non-success outcome into the matching error
    pub fn into_result(
        self,
        token: Option<&OperationToken>,
        stage: Stage,
        elapsed: std::time::Duration,
    ) -> Result<serde_json::Value> {
        match self {
            OperationOutcome::Succeeded(value) => Ok(value),
            OperationOutcome::Failed(reason) => Err(EngineError::OperationFailed {
                token: token.cloned(),
                reason,
            }),
            OperationOutcome::TimedOut => Err(EngineError::TimedOut {
                stage,
                elapsed,
                last_error: None,
            }),
        }
    }
}

/// Remote status interpreted through a [`FlowStatusMap`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemotePhase {
    Running,
    Succeeded,
    Failed,
}

/// A resource kind's status vocabulary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowStatusMap {
    pub running: BTreeSet<String>,
    pub succeeded: BTreeSet<String>,
    pub failed: BTreeSet<String>,
}

impl Default for FlowStatusMap {
    fn default() -> Self {
        Self::new(
            ["running", "pending", "RUNNING", "PENDING"],
            ["succeeded", "success", "SUCCESS"],
            ["failed", "FAILED"],
        )
    }
}

impl FlowStatusMap {
    pub fn new<R, S, F>(running: R, succeeded: S, failed: F) -> Self
    where
        R: IntoIterator,
        R::Item: Into<String>,
        S: IntoIterator,
        S::Item: Into<String>,
        F: IntoIterator,
        F::Item: Into<String>,
    {
        Self {
            running: running.into_iter().map(Into::into).collect(),
            succeeded: succeeded.into_iter().map(Into::into).collect(),
            failed: failed.into_iter().map(Into::into).collect(),
        }
    }

    /// `None` for a status outside the vocabulary
    pub fn interpret(&self, state: &str) -> Option<RemotePhase> {
        if self.succeeded.contains(state) {
            Some(RemotePhase::Succeeded)
        } else if self.failed.contains(state) {
            Some(RemotePhase::Failed)
        } else if self.running.contains(state) {
            Some(RemotePhase::Running)
        } else {
            None
        }
    }
}

/// Local state of one token's poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollState {
    Submitted,
    Polling,
    Succeeded,
    Failed(String),
    TimedOut,
}

impl PollState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PollState::Succeeded | PollState::Failed(_) | PollState::TimedOut
        )
    }
}

/// State machine for one token. Terminal states are never left.
#[derive(Debug)]
pub struct FlowMachine {
    token: OperationToken,
    state: PollState,
    queries: u32,
}

impl FlowMachine {
    pub fn new(token: OperationToken) -> Self {
        Self {
            token,
            state: PollState::Submitted,
            queries: 0,
        }
    }

    pub fn state(&self) -> &PollState {
        &self.state
    }

    pub fn queries(&self) -> u32 {
        self.queries
    }

    pub fn begin(&mut self) -> Result<()> {
        match self.state {
            PollState::Submitted => {
                self.state = PollState::Polling;
                Ok(())
            }
            PollState::Polling => Ok(()),
            _ => Err(self.already_terminal()),
        }
    }

    /// Apply one status observation
    pub fn observe(&mut self, status: &FlowStatus, map: &FlowStatusMap) -> Result<&PollState> {
        if self.state.is_terminal() {
            return Err(self.already_terminal());
        }
        self.state = PollState::Polling;
        self.queries = self.queries.saturating_add(1);

        match map.interpret(&status.state) {
            Some(RemotePhase::Running) => {}
            Some(RemotePhase::Succeeded) => self.state = PollState::Succeeded,
            Some(RemotePhase::Failed) => {
                let reason = status.failure_reason.clone().unwrap_or_else(|| {
                    format!("operation {} reported status {}", self.token, status.state)
                });
                self.state = PollState::Failed(reason);
            }
            None => return Err(EngineError::UnknownStatus(status.state.clone())),
        }
        Ok(&self.state)
    }

    /// The remote side no longer knows the operation's target: a delete that
    /// already finished. Settles the machine as `Succeeded`.
    pub fn observe_absent(&mut self) -> Result<&PollState> {
        if self.state.is_terminal() {
            return Err(self.already_terminal());
        }
        self.queries = self.queries.saturating_add(1);
        self.state = PollState::Succeeded;
        Ok(&self.state)
    }

    pub fn time_out(&mut self) {
        if !self.state.is_terminal() {
            self.state = PollState::TimedOut;
        }
    }

    fn already_terminal(&self) -> EngineError {
        EngineError::Invalid(format!(
            "operation {} already reached {:?}",
            self.token, self.state
        ))
    }
}

/// Terminal outcome plus how many status queries it took
#[derive(Debug, Clone, PartialEq)]
pub struct PollReport {
    pub outcome: OperationOutcome,
    pub queries: u32,
}

/// Polls operation tokens, and confirms deletions by absence
pub struct FlowPoller<C: ?Sized> {
    client: Arc<C>,
    classifier: Arc<ErrorClassifier>,
    gate: Arc<RateGate>,
    status_map: FlowStatusMap,
    error_path: ErrorPath,
}

impl<C: ControlPlane + ?Sized> FlowPoller<C> {
    pub fn new(client: Arc<C>, classifier: Arc<ErrorClassifier>, gate: Arc<RateGate>) -> Self {
        Self {
            client,
            classifier,
            gate,
            status_map: FlowStatusMap::default(),
            error_path: ErrorPath::Read,
        }
    }

    pub fn with_status_map(mut self, status_map: FlowStatusMap) -> Self {
        self.status_map = status_map;
        self
    }

    /// Path used to classify status-query errors. Delete flows use
    /// [`ErrorPath::DeleteConfirmation`], where not-found settles the poll as
    /// succeeded.
    pub fn with_error_path(mut self, error_path: ErrorPath) -> Self {
        self.error_path = error_path;
        self
    }

    /// Poll `token` until it reaches a terminal state.
    ///
    /// `Failed` and `TimedOut` are outcomes, not errors; errors are reserved for
    /// fatal query failures, unrecognized statuses and cancellation.
    pub async fn poll(
        &self,
        executor: &RetryExecutor,
        budget: &RetryBudget,
        token: &OperationToken,
    ) -> Result<PollReport> {
        let machine = Mutex::new(FlowMachine::new(token.clone()));
        lock(&machine).begin()?;

        let result = executor
            .run(Stage::Poll, budget, || self.query_once(&machine, token, executor))
            .await;

        let mut machine = machine.into_inner().unwrap_or_else(PoisonError::into_inner);
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(EngineError::TimedOut { elapsed, .. }) => {
                machine.time_out();
                tracing::warn!("Operation {} still running after {:?}", token, elapsed);
                OperationOutcome::TimedOut
            }
            Err(e) => return Err(e),
        };

        tracing::info!(
            "Operation {} reached {:?} after {} status queries",
            token,
            machine.state(),
            machine.queries()
        );
        Ok(PollReport {
            outcome,
            queries: machine.queries(),
        })
    }

    async fn query_once(
        &self,
        machine: &Mutex<FlowMachine>,
        token: &OperationToken,
        executor: &RetryExecutor,
    ) -> AttemptResult<OperationOutcome> {
        self.gate
            .acquire(QUERY_STATUS_ACTION, Stage::Poll, executor.cancellation())
            .await
            .map_err(ClassifiedError::fatal)?;

        let status = match self.client.query_status(token).await {
            Ok(status) => status,
            Err(e) => match self.classifier.classify(&e, self.error_path) {
                Classification::Absent => {
                    tracing::debug!("Operation {} target is gone: {}", token, e);
                    return match lock(machine).observe_absent() {
                        Ok(_) => Ok(OperationOutcome::Succeeded(serde_json::Value::Null)),
                        Err(e) => Err(ClassifiedError::fatal(e)),
                    };
                }
                classification => return Err(ClassifiedError::new(classification, e)),
            },
        };
        tracing::debug!("Operation {} status: {}", token, status.state);

        let mut machine = lock(machine);
        match machine.observe(&status, &self.status_map) {
            Ok(PollState::Succeeded) => Ok(OperationOutcome::Succeeded(serde_json::Value::Null)),
            Ok(PollState::Failed(reason)) => Ok(OperationOutcome::Failed(reason.clone())),
            Ok(_) => Err(ClassifiedError::retryable(EngineError::Pending(format!(
                "operation {} is {}",
                token, status.state
            )))),
            Err(e) => Err(ClassifiedError::fatal(e)),
        }
    }

    /// Delete confirmation: succeed once the resource can no longer be found,
    /// or once `gone` accepts its observed state (e.g. an isolated instance
    /// that the remote side keeps around but no longer serves).
    pub async fn poll_until_absent<G>(
        &self,
        executor: &RetryExecutor,
        budget: &RetryBudget,
        resource_type: &str,
        resource_id: &str,
        gone: G,
    ) -> Result<()>
    where
        G: Fn(&ResourceState) -> bool,
    {
        executor
            .run(Stage::DeleteConfirm, budget, || {
                self.confirm_absent_once(resource_type, resource_id, &gone, executor)
            })
            .await?;
        tracing::info!("{}:{} is gone", resource_type, resource_id);
        Ok(())
    }

    async fn confirm_absent_once<G>(
        &self,
        resource_type: &str,
        resource_id: &str,
        gone: &G,
        executor: &RetryExecutor,
    ) -> AttemptResult<()>
    where
        G: Fn(&ResourceState) -> bool,
    {
        self.gate
            .acquire(READ_ACTION, Stage::DeleteConfirm, executor.cancellation())
            .await
            .map_err(ClassifiedError::fatal)?;

        match self.client.read(resource_type, resource_id).await {
            Ok(None) => Ok(()),
            Ok(Some(state)) if gone(&state) => {
                tracing::debug!(
                    "{}:{} reached deleted status {}",
                    resource_type,
                    resource_id,
                    state.status
                );
                Ok(())
            }
            Ok(Some(state)) => Err(ClassifiedError::retryable(EngineError::Pending(format!(
                "{}:{} still present with status {}",
                resource_type, resource_id, state.status
            )))),
            Err(e) => match self.classifier.classify(&e, ErrorPath::DeleteConfirmation) {
                Classification::Absent => Ok(()),
                classification => Err(ClassifiedError::new(classification, e)),
            },
        }
    }
}

fn lock(machine: &Mutex<FlowMachine>) -> std::sync::MutexGuard<'_, FlowMachine> {
    machine.lock().unwrap_or_else(PoisonError::into_inner)
}
