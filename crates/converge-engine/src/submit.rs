//! Operation submitter

use crate::budget::RetryBudget;
use crate::classify::{Classification, ErrorClassifier, ErrorPath};
use crate::error::{EngineError, Result, Stage};
use crate::rate_limit::RateGate;
use crate::remote::{ControlPlane, MutateResponse};
use crate::request::{OperationKind, OperationRequest, OperationToken};
use crate::retry::{AttemptResult, ClassifiedError, RetryExecutor};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// What a successful submission produced
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    /// The remote side finished synchronously
    Completed {
        resource_id: Option<String>,
        result: serde_json::Value,
    },
    /// The remote side started an operation to be polled by token
    Accepted {
        resource_id: Option<String>,
        token: OperationToken,
    },
    /// A delete found nothing to delete
    AlreadyAbsent,
}

impl Submission {
    pub fn resource_id(&self) -> Option<&str> {
        match self {
            Submission::Completed { resource_id, .. } | Submission::Accepted { resource_id, .. } => {
                resource_id.as_deref()
            }
            Submission::AlreadyAbsent => None,
        }
    }

    pub fn token(&self) -> Option<&OperationToken> {
        match self {
            Submission::Accepted { token, .. } => Some(token),
            _ => None,
        }
    }
}

/// Issues a mutation exactly once per retry attempt.
///
/// Callers own idempotency: a request resubmitted after a transient failure
/// must not create a second resource (see [`OperationRequest`]).
pub struct Submitter<C: ?Sized> {
    client: Arc<C>,
    classifier: Arc<ErrorClassifier>,
    gate: Arc<RateGate>,
}

impl<C: ControlPlane + ?Sized> Submitter<C> {
    pub fn new(client: Arc<C>, classifier: Arc<ErrorClassifier>, gate: Arc<RateGate>) -> Self {
        Self {
            client,
            classifier,
            gate,
        }
    }

    /// One attempt: pace, call `mutate`, classify the outcome
    pub async fn submit(
        &self,
        request: &OperationRequest,
        cancel: &CancellationToken,
    ) -> AttemptResult<Submission> {
        self.gate
            .acquire(&request.action, Stage::Submit, cancel)
            .await
            .map_err(ClassifiedError::fatal)?;

        tracing::debug!("Submitting {} {} ({})", request.kind, request.label(), request.action);

        let path = match request.kind {
            OperationKind::Delete => ErrorPath::DeleteConfirmation,
            OperationKind::Create | OperationKind::Update => ErrorPath::Write,
        };

        match self.client.mutate(request).await {
            Ok(response) => interpret(response),
            Err(e) => match self.classifier.classify(&e, path) {
                Classification::Absent => Ok(Submission::AlreadyAbsent),
                classification => Err(ClassifiedError::new(classification, e)),
            },
        }
    }

    /// Submit under a retry budget
    pub async fn submit_with_retry(
        &self,
        executor: &RetryExecutor,
        budget: &RetryBudget,
        request: &OperationRequest,
    ) -> Result<Submission> {
        let cancel = executor.cancellation();
        let submission = executor
            .run(Stage::Submit, budget, || self.submit(request, cancel))
            .await?;

        match &submission {
            Submission::Accepted { token, .. } => {
                tracing::info!("{} {} accepted as operation {}", request.kind, request.label(), token)
            }
            Submission::Completed { .. } => {
                tracing::info!("{} {} completed synchronously", request.kind, request.label())
            }
            Submission::AlreadyAbsent => {
                tracing::info!("{} is already absent", request.label())
            }
        }
        Ok(submission)
    }
}

fn interpret(response: MutateResponse) -> AttemptResult<Submission> {
    // An empty token means no asynchronous operation was started
    let token = response.token.filter(|t| !t.is_empty());

    match (token, response.result) {
        (Some(_), Some(_)) => Err(ClassifiedError::fatal(EngineError::Invalid(
            "mutation returned both an operation token and a final result".to_string(),
        ))),
        (Some(token), None) => Ok(Submission::Accepted {
            resource_id: response.resource_id,
            token: OperationToken::new(token),
        }),
        (None, result) => Ok(Submission::Completed {
            resource_id: response.resource_id,
            result: result.unwrap_or(serde_json::Value::Null),
        }),
    }
}
