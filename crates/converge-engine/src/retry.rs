//! Bounded retry loop
//!
//! Runs a unit of work until it succeeds, fails terminally, the budget's
//! deadline passes, or the caller cancels. Sleeps between attempts are the only
//! suspension points besides the attempt itself, and both observe cancellation.

use crate::budget::{MAX_DEADLINE, RetryBudget};
use crate::classify::Classification;
use crate::error::{EngineError, Result, Stage};
use futures_util::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// A failure labelled with how the retry loop should treat it
#[derive(Debug)]
pub struct ClassifiedError {
    pub classification: Classification,
    pub error: EngineError,
}

impl ClassifiedError {
    pub fn new(classification: Classification, error: impl Into<EngineError>) -> Self {
        Self {
            classification,
            error: error.into(),
        }
    }

    pub fn retryable(error: impl Into<EngineError>) -> Self {
        Self::new(Classification::Retryable, error)
    }

    pub fn non_retryable(error: impl Into<EngineError>) -> Self {
        Self::new(Classification::NonRetryable, error)
    }

    pub fn fatal(error: impl Into<EngineError>) -> Self {
        Self::new(Classification::Fatal, error)
    }
}

/// Result of a single attempt
pub type AttemptResult<T> = std::result::Result<T, ClassifiedError>;

/// Executes attempts under a [`RetryBudget`].
///
/// Holds only the caller's cancellation token, so one executor may be shared by
/// every stage of a reconciliation.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    cancel: CancellationToken,
}

impl RetryExecutor {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run `attempt` until it succeeds or the loop must stop.
    ///
    /// - success: returned immediately
    /// - `Fatal`, `NonRetryable`, `Absent`: the attempt's error, no further attempts
    /// - `Retryable` past the deadline: [`EngineError::TimedOut`]
    /// - an attempt that overruns the deadline is dropped: [`EngineError::TimedOut`]
    /// - an attempt that panics: [`EngineError::Panicked`], treated as fatal
    /// - cancellation: [`EngineError::Cancelled`]; the remote side is not rolled back
    pub async fn run<T, F, Fut>(&self, stage: Stage, budget: &RetryBudget, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AttemptResult<T>>,
    {
        let started = Instant::now();
        let deadline = started + budget.deadline.min(MAX_DEADLINE);
        let mut attempts: u32 = 0;
        let mut last_error: Option<EngineError> = None;

        loop {
            if self.cancel.is_cancelled() {
                return Err(EngineError::Cancelled { stage });
            }
            attempts = attempts.saturating_add(1);

            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    tracing::debug!("{} cancelled during attempt {}", stage, attempts);
                    return Err(EngineError::Cancelled { stage });
                }
                outcome = tokio::time::timeout_at(
                    deadline,
                    AssertUnwindSafe(attempt()).catch_unwind(),
                ) => outcome,
            };

            let failure = match outcome {
                Err(_) => {
                    tracing::warn!(
                        "{} attempt {} overran the {:?} deadline",
                        stage,
                        attempts,
                        budget.deadline
                    );
                    return Err(EngineError::TimedOut {
                        stage,
                        elapsed: started.elapsed(),
                        last_error: last_error.map(Box::new),
                    });
                }
                Ok(Err(panic)) => {
                    let message = panic_message(panic.as_ref());
                    tracing::error!("{} attempt {} panicked: {}", stage, attempts, message);
                    return Err(EngineError::Panicked(message));
                }
                Ok(Ok(Ok(value))) => {
                    tracing::debug!(
                        "{} succeeded after {} attempt(s) in {:?}",
                        stage,
                        attempts,
                        started.elapsed()
                    );
                    return Ok(value);
                }
                Ok(Ok(Err(failure))) => failure,
            };

            if failure.classification != Classification::Retryable {
                tracing::debug!(
                    "{} attempt {} failed terminally ({:?}): {}",
                    stage,
                    attempts,
                    failure.classification,
                    failure.error
                );
                return Err(failure.error);
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(
                    "{} gave up after {} attempt(s): {}",
                    stage,
                    attempts,
                    failure.error
                );
                return Err(EngineError::TimedOut {
                    stage,
                    elapsed: now.duration_since(started),
                    last_error: Some(Box::new(failure.error)),
                });
            }

            let delay = budget
                .backoff
                .delay_for_attempt(attempts - 1)
                .min(deadline.duration_since(now));
            tracing::debug!(
                "{} attempt {} will be retried in {:?}: {}",
                stage,
                attempts,
                delay,
                failure.error
            );
            last_error = Some(failure.error);

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    tracing::debug!("{} cancelled while waiting to retry", stage);
                    return Err(EngineError::Cancelled { stage });
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
