use converge_engine::testing::ScriptedControlPlane;
use converge_engine::{
    NotFoundOnUpdate, OperationClass, RateGate, Reconciler, RemoteError, ResourceKind,
    ResourceState, UpdateGroup,
};
use std::sync::Arc;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn database_kind() -> ResourceKind {
    ResourceKind::new("mysql_instance", OperationClass::HeavyProvisioning)
        .with_actions("CreateDBInstance", "IsolateDBInstance")
        .with_transitional(["creating", "upgrading", "isolating"])
        .with_failed(["create_failed"])
        .with_immutable(["availability_zone", "charge_type"])
        .with_update_group(UpdateGroup::new(
            "name",
            "ModifyDBInstanceName",
            ["instance_name"],
        ).with_class(OperationClass::Lightweight))
        .with_update_group(UpdateGroup::new(
            "resize",
            "UpgradeDBInstance",
            ["mem_size", "volume_size"],
        ))
}

#[allow(dead_code)]
pub fn vanishing_kind() -> ResourceKind {
    database_kind().with_not_found_on_update(NotFoundOnUpdate::Vanished)
}

pub fn running(id: &str) -> Option<ResourceState> {
    Some(ResourceState::new(id, "mysql_instance").with_status("running"))
}

#[allow(dead_code)]
pub fn with_status(id: &str, status: &str) -> Option<ResourceState> {
    Some(ResourceState::new(id, "mysql_instance").with_status(status))
}

pub fn remote(code: &str) -> RemoteError {
    RemoteError::new(code, format!("{} (scripted)", code))
}

pub fn reconciler(plane: &Arc<ScriptedControlPlane>) -> Reconciler<ScriptedControlPlane> {
    init_tracing();
    Reconciler::new(Arc::clone(plane)).with_rate_gate(Arc::new(RateGate::unlimited()))
}
