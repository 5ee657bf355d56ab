//! Message queue kinds

use converge_engine::{NotFoundOnUpdate, OperationClass, ResourceKind, UpdateGroup};

/// CKafka connector endpoint. Status: 0 creating, 1 running, 2 deleting.
pub fn ckafka_connect_resource() -> ResourceKind {
    ResourceKind::new("ckafka_connect_resource", OperationClass::Provisioning)
        .with_actions("CreateConnectResource", "DeleteConnectResource")
        .with_transitional(["0", "2"])
        .with_immutable(["type"])
        .with_update_group(
            UpdateGroup::new(
                "connection",
                "ModifyConnectResource",
                [
                    "resource_name",
                    "description",
                    "dts_connect_param",
                    "mongodb_connect_param",
                    "es_connect_param",
                    "clickhouse_connect_param",
                    "mysql_connect_param",
                    "postgresql_connect_param",
                    "mariadb_connect_param",
                    "sqlserver_connect_param",
                    "doris_connect_param",
                    "kafka_connect_param",
                ],
            )
            .with_class(OperationClass::Lightweight),
        )
        .with_not_found_on_update(NotFoundOnUpdate::Vanished)
}

pub fn ckafka_instance() -> ResourceKind {
    ResourceKind::new("ckafka_instance", OperationClass::HeavyProvisioning)
        .with_actions("CreateInstancePre", "DeleteInstancePre")
        .with_transitional(["0", "3"])
        .with_failed(["-1"])
        .with_immutable(["zone_id", "vpc_id", "subnet_id", "kafka_version", "charge_type"])
        .with_update_group(
            UpdateGroup::new(
                "attributes",
                "ModifyInstanceAttributes",
                ["instance_name", "msg_retention_time", "config"],
            )
            .with_class(OperationClass::Lightweight),
        )
        .with_update_group(UpdateGroup::new(
            "specification",
            "ModifyInstancePre",
            ["disk_size", "band_width", "partition"],
        ))
}
