//! Resource reconciler
//!
//! Sequences submit -> poll -> converge for each CRUD entry point. Each
//! invocation runs strictly sequentially; concurrent invocations share nothing
//! mutable except the rate gate.

use crate::budget::{BudgetProfile, Budgets};
use crate::classify::{ErrorClassifier, ErrorPath};
use crate::converge::ConvergenceReader;
use crate::error::{EngineError, Result, Stage};
use crate::kind::{NotFoundOnUpdate, ResourceKind};
use crate::poller::FlowPoller;
use crate::rate_limit::RateGate;
use crate::remote::ControlPlane;
use crate::request::{OperationKind, OperationRequest};
use crate::retry::{AttemptResult, ClassifiedError, RetryExecutor};
use crate::state::ResourceState;
use crate::submit::{Submission, Submitter};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const READ_ACTION: &str = "Read";

/// Changed fields of an update, keyed by field name
pub type Changes = BTreeMap<String, serde_json::Value>;

/// Result of an update
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateReport {
    /// Update groups applied, in order
    pub applied: Vec<String>,
    /// The resource disappeared out of band (only under [`NotFoundOnUpdate::Vanished`])
    pub vanished: bool,
}

/// Composition point exposing Create/Read/Update/Delete.
///
/// The control-plane client is an explicit handle; nothing is looked up from
/// ambient state.
///
/// Callers that run their own pre-flight checks against the remote API (quota
/// or parameter validation calls) classify those errors through
/// [`Reconciler::classifier`] with [`ErrorPath::Validation`], so unknown codes
/// fail fast instead of being retried.
pub struct Reconciler<C: ?Sized> {
    client: Arc<C>,
    classifier: Arc<ErrorClassifier>,
    gate: Arc<RateGate>,
    budgets: Budgets,
    cancel: CancellationToken,
}

impl<C: ?Sized> Clone for Reconciler<C> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            classifier: Arc::clone(&self.classifier),
            gate: Arc::clone(&self.gate),
            budgets: self.budgets,
            cancel: self.cancel.clone(),
        }
    }
}

impl<C: ControlPlane + ?Sized> Reconciler<C> {
    pub fn new(client: Arc<C>) -> Self {
        Self {
            client,
            classifier: Arc::new(ErrorClassifier::default()),
            gate: Arc::new(RateGate::default()),
            budgets: Budgets::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<ErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Share one gate between every reconciler talking to the same API
    pub fn with_rate_gate(mut self, gate: Arc<RateGate>) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_budgets(mut self, budgets: Budgets) -> Self {
        self.budgets = budgets;
        self
    }

    /// Abort local waiting when `cancel` fires. Remote operations already
    /// started keep running.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn budgets(&self) -> &Budgets {
        &self.budgets
    }

    pub fn rate_gate(&self) -> &Arc<RateGate> {
        &self.gate
    }

    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    fn executor(&self) -> RetryExecutor {
        RetryExecutor::new(self.cancel.clone())
    }

    fn submitter(&self) -> Submitter<C> {
        Submitter::new(
            Arc::clone(&self.client),
            Arc::clone(&self.classifier),
            Arc::clone(&self.gate),
        )
    }

    fn poller(&self, kind: &ResourceKind) -> FlowPoller<C> {
        FlowPoller::new(
            Arc::clone(&self.client),
            Arc::clone(&self.classifier),
            Arc::clone(&self.gate),
        )
        .with_status_map(kind.status_map.clone())
    }

    fn reader(&self) -> ConvergenceReader<C> {
        ConvergenceReader::new(
            Arc::clone(&self.client),
            Arc::clone(&self.classifier),
            Arc::clone(&self.gate),
        )
    }

    /// Create: submit, poll the token if any, then wait for a settled state.
    ///
    /// Build `request` with [`ResourceKind::create_request`]; attach a client
    /// token when the remote action is not naturally idempotent.
    pub async fn create(
        &self,
        kind: &ResourceKind,
        request: &OperationRequest,
    ) -> Result<ResourceState> {
        let started = Instant::now();
        check_request(kind, request, OperationKind::Create)?;

        let executor = self.executor();
        let profile = self.budgets.profile(kind.class);
        let submission = self
            .submitter()
            .submit_with_retry(&executor, &profile.submit, request)
            .await?;

        let resource_id = submission
            .resource_id()
            .or(request.resource_id.as_deref())
            .map(str::to_string)
            .ok_or_else(|| {
                EngineError::Invalid(format!(
                    "{} returned no resource id for {}",
                    request.action, kind.resource_type
                ))
            })?;

        self.settle(kind, &executor, profile, &submission, &resource_id, ErrorPath::Read)
            .await?;
        let state = self
            .reader()
            .wait_for(
                &executor,
                &profile.converge,
                &kind.resource_type,
                &resource_id,
                |state| kind.readiness(state),
            )
            .await?;

        tracing::info!(
            "resource.{}.create {} finished in {:?}",
            kind.resource_type,
            resource_id,
            started.elapsed()
        );
        Ok(state)
    }

    /// Read for drift detection; `Ok(None)` when the resource is absent.
    pub async fn read(&self, kind: &ResourceKind, resource_id: &str) -> Result<Option<ResourceState>> {
        let started = Instant::now();
        let executor = self.executor();
        let state = executor
            .run(Stage::Read, &self.budgets.read, || {
                self.read_once(kind, resource_id, &executor)
            })
            .await?;

        tracing::debug!(
            "resource.{}.read {} ({}) finished in {:?}",
            kind.resource_type,
            resource_id,
            if state.is_some() { "found" } else { "absent" },
            started.elapsed()
        );
        Ok(state)
    }

    async fn read_once(
        &self,
        kind: &ResourceKind,
        resource_id: &str,
        executor: &RetryExecutor,
    ) -> AttemptResult<Option<ResourceState>> {
        self.gate
            .acquire(READ_ACTION, Stage::Read, executor.cancellation())
            .await
            .map_err(ClassifiedError::fatal)?;

        match self.client.read(&kind.resource_type, resource_id).await {
            Ok(state) => Ok(state),
            Err(e) if self.classifier.is_not_found(&e) => Ok(None),
            Err(e) => {
                let classification = self.classifier.classify(&e, ErrorPath::Read);
                Err(ClassifiedError::new(classification, e))
            }
        }
    }

    /// Update: one mutation per affected field group, in declaration order.
    ///
    /// Immutable fields and fields no group owns are rejected before any
    /// remote call.
    pub async fn update(
        &self,
        kind: &ResourceKind,
        resource_id: &str,
        changes: &Changes,
    ) -> Result<UpdateReport> {
        let started = Instant::now();
        for field in changes.keys() {
            if kind.immutable_fields.contains(field) {
                return Err(EngineError::ImmutableField {
                    field: field.clone(),
                });
            }
            if kind.group_for(field).is_none() {
                return Err(EngineError::Invalid(format!(
                    "{} has no update action for field `{}`",
                    kind.resource_type, field
                )));
            }
        }

        let mut report = UpdateReport::default();
        if changes.is_empty() {
            return Ok(report);
        }

        if self.read(kind, resource_id).await?.is_none() {
            return self.vanished(kind, resource_id, report);
        }

        let executor = self.executor();
        for group in &kind.update_groups {
            let params: serde_json::Map<String, serde_json::Value> = changes
                .iter()
                .filter(|(field, _)| group.fields.contains(*field))
                .map(|(field, value)| (field.clone(), value.clone()))
                .collect();
            if params.is_empty() {
                continue;
            }

            let class = group.class.unwrap_or(kind.class);
            let profile = self.budgets.profile(class);
            let request = OperationRequest::update(
                &kind.resource_type,
                resource_id,
                &group.action,
                serde_json::Value::Object(params),
            );
            tracing::info!(
                "Updating {} via {} ({} budgets)",
                request.label(),
                group.action,
                class
            );

            let submission = match self
                .submitter()
                .submit_with_retry(&executor, &profile.submit, &request)
                .await
            {
                Ok(submission) => submission,
                Err(EngineError::Remote(e)) if self.classifier.is_not_found(&e) => {
                    return self.vanished(kind, resource_id, report);
                }
                Err(e) => return Err(incomplete(report, e)),
            };

            if let Err(e) = self
                .finish_group(kind, &executor, profile, &submission, resource_id)
                .await
            {
                return Err(incomplete(report, e));
            }
            report.applied.push(group.name.clone());
        }

        tracing::info!(
            "resource.{}.update {} finished in {:?} (groups: {})",
            kind.resource_type,
            resource_id,
            started.elapsed(),
            report.applied.join(", ")
        );
        Ok(report)
    }

    /// Settle one update group's operation and wait for the resource to converge
    async fn finish_group(
        &self,
        kind: &ResourceKind,
        executor: &RetryExecutor,
        profile: &BudgetProfile,
        submission: &Submission,
        resource_id: &str,
    ) -> Result<()> {
        self.settle(kind, executor, profile, submission, resource_id, ErrorPath::Read)
            .await?;
        self.reader()
            .wait_for(
                executor,
                &profile.converge,
                &kind.resource_type,
                resource_id,
                |state| kind.readiness(state),
            )
            .await?;
        Ok(())
    }

    fn vanished(
        &self,
        kind: &ResourceKind,
        resource_id: &str,
        mut report: UpdateReport,
    ) -> Result<UpdateReport> {
        match kind.not_found_on_update {
            NotFoundOnUpdate::Fail => Err(EngineError::NotFound(format!(
                "{}:{}",
                kind.resource_type, resource_id
            ))),
            NotFoundOnUpdate::Vanished => {
                tracing::warn!(
                    "{}:{} disappeared during update; dropping it",
                    kind.resource_type,
                    resource_id
                );
                report.vanished = true;
                Ok(report)
            }
        }
    }

    /// Delete: idempotent; an already-absent resource is success.
    pub async fn delete(&self, kind: &ResourceKind, resource_id: &str) -> Result<()> {
        let started = Instant::now();
        match self.read(kind, resource_id).await? {
            None => {
                tracing::info!("{}:{} already absent", kind.resource_type, resource_id);
                return Ok(());
            }
            Some(state) if kind.is_deleted(&state) => {
                tracing::info!(
                    "{}:{} already deleted (status {})",
                    kind.resource_type,
                    resource_id,
                    state.status
                );
                return Ok(());
            }
            Some(_) => {}
        }

        let executor = self.executor();
        let profile = self.budgets.profile(kind.class);
        let request = kind.delete_request(resource_id);
        let submission = self
            .submitter()
            .submit_with_retry(&executor, &profile.submit, &request)
            .await?;
        if submission == Submission::AlreadyAbsent {
            return Ok(());
        }

        self.settle(
            kind,
            &executor,
            profile,
            &submission,
            resource_id,
            ErrorPath::DeleteConfirmation,
        )
        .await?;
        self.poller(kind)
            .poll_until_absent(
                &executor,
                &profile.converge,
                &kind.resource_type,
                resource_id,
                |state| kind.is_deleted(state),
            )
            .await?;

        tracing::info!(
            "resource.{}.delete {} finished in {:?}",
            kind.resource_type,
            resource_id,
            started.elapsed()
        );
        Ok(())
    }

    /// Poll a submission's token, if it has one, to a successful terminal state
    async fn settle(
        &self,
        kind: &ResourceKind,
        executor: &RetryExecutor,
        profile: &BudgetProfile,
        submission: &Submission,
        resource_id: &str,
        error_path: ErrorPath,
    ) -> Result<()> {
        let Some(token) = submission.token() else {
            return Ok(());
        };
        let started = Instant::now();
        let report = self
            .poller(kind)
            .with_error_path(error_path)
            .poll(executor, &profile.poll, token)
            .await?;
        tracing::debug!(
            "{}:{} operation {} settled after {} queries",
            kind.resource_type,
            resource_id,
            token,
            report.queries
        );
        report
            .outcome
            .into_result(Some(token), Stage::Poll, started.elapsed())
            .map(|_| ())
    }
}

/// Keep track of groups that already reached the remote side
fn incomplete(report: UpdateReport, error: EngineError) -> EngineError {
    if report.applied.is_empty() {
        return error;
    }
    tracing::warn!(
        "Update failed after applying {}: {}",
        report.applied.join(", "),
        error
    );
    EngineError::UpdateIncomplete {
        applied: report.applied,
        source: Box::new(error),
    }
}

fn check_request(kind: &ResourceKind, request: &OperationRequest, expected: OperationKind) -> Result<()> {
    if request.kind != expected {
        return Err(EngineError::Invalid(format!(
            "expected a {} request, got {}",
            expected, request.kind
        )));
    }
    if request.resource_type != kind.resource_type {
        return Err(EngineError::Invalid(format!(
            "request targets {} but kind is {}",
            request.resource_type, kind.resource_type
        )));
    }
    Ok(())
}
