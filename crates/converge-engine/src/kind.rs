//! Resource kind descriptors
//!
//! Everything the reconciler needs to know about one resource type: which
//! budgets apply, how its operations report status, which fields can change
//! and through which remote action.

use crate::budget::OperationClass;
use crate::converge::Readiness;
use crate::poller::FlowStatusMap;
use crate::request::OperationRequest;
use crate::state::ResourceState;
use std::collections::BTreeSet;

/// What an update does when the resource turns out to be gone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotFoundOnUpdate {
    /// Report [`EngineError::NotFound`](crate::EngineError::NotFound)
    #[default]
    Fail,
    /// Report success with `vanished = true`; the caller drops it from state
    Vanished,
}

/// Fields that change together through one remote action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateGroup {
    pub name: String,
    pub action: String,
    pub fields: BTreeSet<String>,
    /// Overrides the kind's class, e.g. a resize on an otherwise light resource
    pub class: Option<OperationClass>,
}

impl UpdateGroup {
    pub fn new<I>(name: impl Into<String>, action: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self {
            name: name.into(),
            action: action.into(),
            fields: fields.into_iter().map(Into::into).collect(),
            class: None,
        }
    }

    pub fn with_class(mut self, class: OperationClass) -> Self {
        self.class = Some(class);
        self
    }
}

/// Descriptor of one resource type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceKind {
    pub resource_type: String,
    pub class: OperationClass,
    pub create_action: String,
    pub delete_action: String,
    pub status_map: FlowStatusMap,
    /// Statuses the convergence reader waits out (e.g. "creating")
    pub transitional_statuses: BTreeSet<String>,
    /// Statuses that end convergence as a failure
    pub failed_statuses: BTreeSet<String>,
    /// Statuses that count as deleted even though reads still return the resource
    pub deleted_statuses: BTreeSet<String>,
    pub immutable_fields: BTreeSet<String>,
    pub update_groups: Vec<UpdateGroup>,
    pub not_found_on_update: NotFoundOnUpdate,
}

impl ResourceKind {
    pub fn new(resource_type: impl Into<String>, class: OperationClass) -> Self {
        let resource_type = resource_type.into();
        Self {
            create_action: format!("Create:{}", resource_type),
            delete_action: format!("Delete:{}", resource_type),
            resource_type,
            class,
            status_map: FlowStatusMap::default(),
            transitional_statuses: BTreeSet::new(),
            failed_statuses: BTreeSet::new(),
            deleted_statuses: BTreeSet::new(),
            immutable_fields: BTreeSet::new(),
            update_groups: Vec::new(),
            not_found_on_update: NotFoundOnUpdate::default(),
        }
    }

    pub fn with_actions(mut self, create: impl Into<String>, delete: impl Into<String>) -> Self {
        self.create_action = create.into();
        self.delete_action = delete.into();
        self
    }

    pub fn with_status_map(mut self, status_map: FlowStatusMap) -> Self {
        self.status_map = status_map;
        self
    }

    pub fn with_transitional<I>(mut self, statuses: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.transitional_statuses
            .extend(statuses.into_iter().map(Into::into));
        self
    }

    pub fn with_failed<I>(mut self, statuses: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.failed_statuses.extend(statuses.into_iter().map(Into::into));
        self
    }

    pub fn with_deleted<I>(mut self, statuses: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.deleted_statuses.extend(statuses.into_iter().map(Into::into));
        self
    }

    pub fn with_immutable<I>(mut self, fields: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.immutable_fields.extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn with_update_group(mut self, group: UpdateGroup) -> Self {
        self.update_groups.push(group);
        self
    }

    pub fn with_not_found_on_update(mut self, policy: NotFoundOnUpdate) -> Self {
        self.not_found_on_update = policy;
        self
    }

    pub fn create_request(&self, params: serde_json::Value) -> OperationRequest {
        OperationRequest::create(&self.resource_type, &self.create_action, params)
    }

    pub fn delete_request(&self, resource_id: &str) -> OperationRequest {
        OperationRequest::delete(&self.resource_type, resource_id, &self.delete_action)
    }

    /// Whether an observed state is settled
    pub fn readiness(&self, state: &ResourceState) -> Readiness {
        if self.failed_statuses.contains(&state.status) {
            Readiness::Failed(format!(
                "{} {} entered status {}",
                self.resource_type, state.id, state.status
            ))
        } else if self.transitional_statuses.contains(&state.status) {
            Readiness::Waiting
        } else {
            Readiness::Ready
        }
    }

    /// Whether a delete of this resource is complete at `state`
    pub fn is_deleted(&self, state: &ResourceState) -> bool {
        self.deleted_statuses.contains(&state.status)
    }

    /// Group that owns `field`, if any
    pub fn group_for(&self, field: &str) -> Option<&UpdateGroup> {
        self.update_groups.iter().find(|g| g.fields.contains(field))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind() -> ResourceKind {
        ResourceKind::new("mysql_instance", OperationClass::HeavyProvisioning)
            .with_actions("CreateDBInstance", "IsolateDBInstance")
            .with_transitional(["creating", "upgrading"])
            .with_failed(["create_failed"])
            .with_immutable(["availability_zone"])
            .with_update_group(UpdateGroup::new(
                "name",
                "ModifyDBInstanceName",
                ["instance_name"],
            ))
    }

    #[test]
    fn test_readiness() {
        let kind = kind();
        let state = ResourceState::new("cdb-1", "mysql_instance");
        assert_eq!(kind.readiness(&state.clone().with_status("creating")), Readiness::Waiting);
        assert_eq!(kind.readiness(&state.clone().with_status("running")), Readiness::Ready);
        assert!(matches!(
            kind.readiness(&state.with_status("create_failed")),
            Readiness::Failed(_)
        ));
    }

    #[test]
    fn test_requests_use_kind_actions() {
        let kind = kind();
        let create = kind.create_request(serde_json::json!({"mem_size": 1000}));
        assert_eq!(create.action, "CreateDBInstance");
        assert_eq!(create.resource_type, "mysql_instance");

        let delete = kind.delete_request("cdb-1");
        assert_eq!(delete.action, "IsolateDBInstance");
        assert_eq!(delete.resource_id.as_deref(), Some("cdb-1"));
    }

    #[test]
    fn test_deleted_statuses() {
        let kind = kind().with_deleted(["isolated"]);
        let state = ResourceState::new("cdb-1", "mysql_instance");
        assert!(kind.is_deleted(&state.clone().with_status("isolated")));
        assert!(!kind.is_deleted(&state.with_status("running")));
    }

    #[test]
    fn test_group_lookup() {
        let kind = kind();
        assert_eq!(
            kind.group_for("instance_name").map(|g| g.action.as_str()),
            Some("ModifyDBInstanceName")
        );
        assert!(kind.group_for("availability_zone").is_none());
        assert_eq!(kind.not_found_on_update, NotFoundOnUpdate::Fail);
    }
}
