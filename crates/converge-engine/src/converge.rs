//! Convergence reader
//!
//! Re-reads a resource until its observed state satisfies a predicate. Covers
//! read-after-write lag after creates, and mutations the remote side applies
//! asynchronously without handing out a token.

use crate::budget::RetryBudget;
use crate::classify::{ErrorClassifier, ErrorPath};
use crate::error::{EngineError, Result, Stage};
use crate::rate_limit::RateGate;
use crate::remote::ControlPlane;
use crate::retry::{AttemptResult, ClassifiedError, RetryExecutor};
use crate::state::ResourceState;
use std::sync::Arc;

const READ_ACTION: &str = "Read";

/// Verdict of a convergence check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    Waiting,
    /// The resource settled into a failure state; stop waiting
    Failed(String),
}

impl From<bool> for Readiness {
    fn from(ready: bool) -> Self {
        if ready {
            Readiness::Ready
        } else {
            Readiness::Waiting
        }
    }
}

pub struct ConvergenceReader<C: ?Sized> {
    client: Arc<C>,
    classifier: Arc<ErrorClassifier>,
    gate: Arc<RateGate>,
}

impl<C: ControlPlane + ?Sized> ConvergenceReader<C> {
    pub fn new(client: Arc<C>, classifier: Arc<ErrorClassifier>, gate: Arc<RateGate>) -> Self {
        Self {
            client,
            classifier,
            gate,
        }
    }

    /// Wait until `predicate` holds for the observed state
    pub async fn wait_until<P>(
        &self,
        executor: &RetryExecutor,
        budget: &RetryBudget,
        resource_type: &str,
        resource_id: &str,
        predicate: P,
    ) -> Result<ResourceState>
    where
        P: Fn(&ResourceState) -> bool,
    {
        self.wait_for(executor, budget, resource_type, resource_id, |state| {
            Readiness::from(predicate(state))
        })
        .await
    }

    /// Like [`wait_until`](Self::wait_until), but the check may also declare failure.
    ///
    /// Absence is treated as lag: a resource that was just written may not be
    /// visible to reads yet.
    pub async fn wait_for<P>(
        &self,
        executor: &RetryExecutor,
        budget: &RetryBudget,
        resource_type: &str,
        resource_id: &str,
        check: P,
    ) -> Result<ResourceState>
    where
        P: Fn(&ResourceState) -> Readiness,
    {
        let state = executor
            .run(Stage::Converge, budget, || {
                self.read_once(resource_type, resource_id, &check, executor)
            })
            .await?;
        tracing::info!(
            "{}:{} converged with status {}",
            resource_type,
            resource_id,
            state.status
        );
        Ok(state)
    }

    async fn read_once<P>(
        &self,
        resource_type: &str,
        resource_id: &str,
        check: &P,
        executor: &RetryExecutor,
    ) -> AttemptResult<ResourceState>
    where
        P: Fn(&ResourceState) -> Readiness,
    {
        self.gate
            .acquire(READ_ACTION, Stage::Converge, executor.cancellation())
            .await
            .map_err(ClassifiedError::fatal)?;

        let state = match self.client.read(resource_type, resource_id).await {
            Ok(Some(state)) => state,
            Ok(None) => {
                return Err(ClassifiedError::retryable(EngineError::Pending(format!(
                    "{}:{} not visible yet",
                    resource_type, resource_id
                ))));
            }
            Err(e) if self.classifier.is_not_found(&e) => {
                return Err(ClassifiedError::retryable(e));
            }
            Err(e) => {
                let classification = self.classifier.classify(&e, ErrorPath::Read);
                return Err(ClassifiedError::new(classification, e));
            }
        };

        match check(&state) {
            Readiness::Ready => Ok(state),
            Readiness::Waiting => {
                tracing::debug!(
                    "{}:{} not converged yet (status {})",
                    resource_type,
                    resource_id,
                    state.status
                );
                Err(ClassifiedError::retryable(EngineError::Pending(format!(
                    "{}:{} has status {}",
                    resource_type, resource_id, state.status
                ))))
            }
            Readiness::Failed(reason) => Err(ClassifiedError::non_retryable(
                EngineError::OperationFailed {
                    token: None,
                    reason,
                },
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteError;
    use crate::testing::ScriptedControlPlane;
    use std::time::Duration;

    fn reader(plane: &Arc<ScriptedControlPlane>) -> ConvergenceReader<ScriptedControlPlane> {
        ConvergenceReader::new(
            Arc::clone(plane),
            Arc::new(ErrorClassifier::default()),
            Arc::new(RateGate::unlimited()),
        )
    }

    fn state(status: &str) -> Option<ResourceState> {
        Some(ResourceState::new("sg-1", "security_group").with_status(status))
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_until_predicate_holds() {
        let plane = Arc::new(ScriptedControlPlane::new());
        plane
            .push_read(Ok(None))
            .push_read(Ok(state("binding")))
            .push_read(Ok(state("bound")));

        let state = reader(&plane)
            .wait_until(
                &RetryExecutor::default(),
                &RetryBudget::new(Duration::from_secs(60)),
                "security_group",
                "sg-1",
                |s| s.status == "bound",
            )
            .await
            .unwrap();

        assert_eq!(state.status, "bound");
        assert_eq!(plane.read_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_read_error_stops_waiting() {
        let plane = Arc::new(ScriptedControlPlane::new());
        plane.push_read(Err(RemoteError::new("AuthFailure.TokenFailure", "bad token")));

        let err = reader(&plane)
            .wait_until(
                &RetryExecutor::default(),
                &RetryBudget::new(Duration::from_secs(60)),
                "security_group",
                "sg-1",
                |_| true,
            )
            .await
            .unwrap_err();

        assert_eq!(err.remote_code(), Some("AuthFailure.TokenFailure"));
        assert_eq!(plane.read_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_resource_times_out_at_converge() {
        let plane = Arc::new(ScriptedControlPlane::new());
        plane.push_read(Err(RemoteError::new("ResourceNotFound", "no such group")));

        let err = reader(&plane)
            .wait_until(
                &RetryExecutor::default(),
                &RetryBudget::new(Duration::from_secs(20)),
                "security_group",
                "sg-1",
                |_| true,
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            EngineError::TimedOut {
                stage: Stage::Converge,
                ..
            }
        ));
    }
}
