//! Catalog kinds driven through the reconciler

use converge_catalog::Catalog;
use converge_catalog::database::mysql_status;
use converge_engine::testing::ScriptedControlPlane;
use converge_engine::{
    Changes, EngineError, FlowStatus, MutateResponse, RateGate, Reconciler, RemoteError,
    ResourceState,
};
use serde_json::json;
use std::sync::Arc;

fn reconciler(plane: &Arc<ScriptedControlPlane>) -> Reconciler<ScriptedControlPlane> {
    Reconciler::new(Arc::clone(plane)).with_rate_gate(Arc::new(RateGate::unlimited()))
}

fn state(id: &str, resource_type: &str, status: &str) -> Option<ResourceState> {
    Some(ResourceState::new(id, resource_type).with_status(status))
}

#[tokio::test(start_paused = true)]
async fn test_mysql_resize_follows_async_request() {
    let catalog = Catalog::builtin();
    let kind = catalog.require("mysql_instance").unwrap();

    let plane = Arc::new(ScriptedControlPlane::new());
    plane.push_read(Ok(state("cdb-1", "mysql_instance", mysql_status::RUNNING)));
    plane.push_mutate(Ok(MutateResponse::accepted("cdb-1", "async-req-1")));
    plane
        .push_status(Ok(FlowStatus::new("INITIAL")))
        .push_status(Ok(FlowStatus::new("RUNNING")))
        .push_status(Ok(FlowStatus::new("SUCCESS")));

    let mut changes = Changes::new();
    changes.insert("mem_size".to_string(), json!(8000));
    let report = reconciler(&plane)
        .update(kind, "cdb-1", &changes)
        .await
        .unwrap();

    assert_eq!(report.applied, ["resize"]);
    assert_eq!(plane.status_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_mysql_killed_request_is_a_failure() {
    let catalog = Catalog::builtin();
    let kind = catalog.require("mysql_instance").unwrap();

    let plane = Arc::new(ScriptedControlPlane::new());
    plane.push_read(Ok(state("cdb-1", "mysql_instance", mysql_status::RUNNING)));
    plane.push_mutate(Ok(MutateResponse::accepted("cdb-1", "async-req-2")));
    plane.push_status(Ok(FlowStatus {
        state: "KILLED".to_string(),
        failure_reason: Some("task killed by operator".to_string()),
    }));

    let mut changes = Changes::new();
    changes.insert("volume_size".to_string(), json!(200));
    let err = reconciler(&plane)
        .update(kind, "cdb-1", &changes)
        .await
        .unwrap_err();

    assert_eq!(err.failure_reason(), Some("task killed by operator"));
}

#[tokio::test(start_paused = true)]
async fn test_mysql_delete_settles_on_isolated() {
    let catalog = Catalog::builtin();
    let kind = catalog.require("mysql_instance").unwrap();

    let plane = Arc::new(ScriptedControlPlane::new());
    plane
        .push_read(Ok(state("cdb-1", "mysql_instance", mysql_status::RUNNING)))
        .push_read(Ok(state("cdb-1", "mysql_instance", mysql_status::ISOLATING)))
        .push_read(Ok(state("cdb-1", "mysql_instance", mysql_status::ISOLATED)));
    plane.push_mutate(Ok(MutateResponse::empty()));

    reconciler(&plane).delete(kind, "cdb-1").await.unwrap();

    assert_eq!(plane.requests()[0].action, "IsolateDBInstance");
    assert_eq!(plane.read_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_mysql_delete_of_isolated_instance_is_a_no_op() {
    let catalog = Catalog::builtin();
    let kind = catalog.require("mysql_instance").unwrap();

    let plane = Arc::new(ScriptedControlPlane::new());
    plane.push_read(Ok(state("cdb-1", "mysql_instance", mysql_status::ISOLATED)));

    reconciler(&plane).delete(kind, "cdb-1").await.unwrap();

    assert_eq!(plane.mutate_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_dcdb_create_with_numeric_flow() {
    let catalog = Catalog::builtin();
    let kind = catalog.require("dcdb_hourdb_instance").unwrap();

    let plane = Arc::new(ScriptedControlPlane::new());
    plane.push_mutate(Ok(MutateResponse::accepted("dcdbt-1", "1024")));
    plane
        .push_status(Ok(FlowStatus::new("2")))
        .push_status(Ok(FlowStatus::new("0")));
    plane
        .push_read(Ok(state("dcdbt-1", "dcdb_hourdb_instance", "1")))
        .push_read(Ok(state("dcdbt-1", "dcdb_hourdb_instance", "2")));

    let request = kind.create_request(json!({"shard_count": 2}));
    let created = reconciler(&plane).create(kind, &request).await.unwrap();

    assert_eq!(created.status, "2");
    assert_eq!(plane.status_calls(), 2);
    assert_eq!(plane.read_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_dcdb_update_of_vanished_instance() {
    let catalog = Catalog::builtin();
    let kind = catalog.require("dcdb_hourdb_instance").unwrap();

    let plane = Arc::new(ScriptedControlPlane::new());
    plane.push_read(Err(RemoteError::new(
        "ResourceNotFound.InstanceNotFound",
        "instance dcdbt-1 not found",
    )));

    let mut changes = Changes::new();
    changes.insert("instance_name".to_string(), json!("orders"));
    let report = reconciler(&plane)
        .update(kind, "dcdbt-1", &changes)
        .await
        .unwrap();

    assert!(report.vanished);
    assert_eq!(plane.mutate_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_attachment_rejects_in_place_change() {
    let catalog = Catalog::builtin();
    let kind = catalog.require("mysql_security_groups_attachment").unwrap();

    let plane = Arc::new(ScriptedControlPlane::new());
    let mut changes = Changes::new();
    changes.insert("security_group_id".to_string(), json!("sg-2"));
    let err = reconciler(&plane)
        .update(kind, "cdb-1#sg-1", &changes)
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::ImmutableField { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_connect_resource_delete_waits_for_removal() {
    let catalog = Catalog::builtin();
    let kind = catalog.require("ckafka_connect_resource").unwrap();

    let plane = Arc::new(ScriptedControlPlane::new());
    plane
        .push_read(Ok(state("resource-1", "ckafka_connect_resource", "1")))
        .push_read(Ok(state("resource-1", "ckafka_connect_resource", "2")))
        .push_read(Ok(None));
    plane.push_mutate(Ok(MutateResponse::empty()));

    reconciler(&plane).delete(kind, "resource-1").await.unwrap();

    assert_eq!(plane.requests()[0].action, "DeleteConnectResource");
    assert_eq!(plane.read_calls(), 3);
}
