//! Database instance kinds

use converge_engine::{FlowStatusMap, NotFoundOnUpdate, OperationClass, ResourceKind, UpdateGroup};

/// Instance status values reported by the MySQL describe call
pub mod mysql_status {
    pub const CREATING: &str = "0";
    pub const RUNNING: &str = "1";
    pub const ISOLATING: &str = "4";
    pub const ISOLATED: &str = "5";
}

/// MySQL async request status vocabulary
pub fn mysql_task_statuses() -> FlowStatusMap {
    FlowStatusMap::new(
        ["INITIAL", "RUNNING", "PAUSED"],
        ["SUCCESS"],
        ["FAILED", "KILLED", "REMOVED"],
    )
}

/// Full MySQL instance: delivery takes minutes and resizes run as async requests
pub fn mysql_instance() -> ResourceKind {
    ResourceKind::new("mysql_instance", OperationClass::HeavyProvisioning)
        .with_actions("CreateDBInstanceHour", "IsolateDBInstance")
        .with_status_map(mysql_task_statuses())
        .with_transitional([mysql_status::CREATING, mysql_status::ISOLATING])
        .with_failed([mysql_status::ISOLATED])
        .with_deleted([mysql_status::ISOLATED])
        .with_immutable([
            "availability_zone",
            "charge_type",
            "engine_version",
            "root_password",
            "slave_deploy_mode",
            "first_slave_zone",
            "second_slave_zone",
        ])
        .with_update_group(
            UpdateGroup::new("name", "ModifyDBInstanceName", ["instance_name"])
                .with_class(OperationClass::Lightweight),
        )
        .with_update_group(
            UpdateGroup::new(
                "network",
                "ModifyDBInstanceVipVport",
                ["vpc_id", "subnet_id", "intranet_port"],
            )
            .with_class(OperationClass::Lightweight),
        )
        .with_update_group(UpdateGroup::new(
            "resize",
            "UpgradeDBInstance",
            ["mem_size", "volume_size"],
        ))
        .with_update_group(
            UpdateGroup::new("parameters", "ModifyInstanceParam", ["parameters"])
                .with_class(OperationClass::Provisioning),
        )
        .with_update_group(
            UpdateGroup::new(
                "security_groups",
                "ModifyDBInstanceSecurityGroups",
                ["security_groups"],
            )
            .with_class(OperationClass::Lightweight),
        )
}

/// Distributed (sharded) database billed hourly. Flows report numeric codes.
pub fn dcdb_hourdb_instance() -> ResourceKind {
    ResourceKind::new("dcdb_hourdb_instance", OperationClass::Provisioning)
        .with_actions("CreateHourDCDBInstance", "DestroyHourDCDBInstance")
        .with_status_map(FlowStatusMap::new(["2"], ["0"], ["1"]))
        // Instance status: 0 creating, 1 processing, 2 running
        .with_transitional(["0", "1"])
        .with_immutable([
            "zones",
            "shard_node_count",
            "shard_count",
            "db_version_id",
            "dcn_region",
            "dcn_instance_id",
        ])
        .with_update_group(
            UpdateGroup::new("name", "ModifyDBInstanceName", ["instance_name"])
                .with_class(OperationClass::Lightweight),
        )
        .with_update_group(
            UpdateGroup::new("project", "ModifyDBInstancesProject", ["project_id"])
                .with_class(OperationClass::Lightweight),
        )
        .with_update_group(UpdateGroup::new(
            "network",
            "ModifyInstanceVip",
            ["vpc_id", "subnet_id", "vip"],
        ))
        .with_not_found_on_update(NotFoundOnUpdate::Vanished)
}

/// SQL Server instance; network changes are tracked through a numeric flow id
pub fn sqlserver_instance() -> ResourceKind {
    ResourceKind::new("sqlserver_instance", OperationClass::HeavyProvisioning)
        .with_actions("CreateDBInstances", "TerminateDBInstance")
        .with_status_map(FlowStatusMap::new(["1"], ["2"], ["3"]))
        .with_transitional(["1"])
        .with_immutable(["time_zone", "availability_zone", "charge_type"])
        .with_update_group(
            UpdateGroup::new("name", "ModifyDBInstanceName", ["name"])
                .with_class(OperationClass::Lightweight),
        )
        .with_update_group(UpdateGroup::new(
            "network",
            "ModifyDBInstanceNetwork",
            ["vpc_id", "subnet_id", "vip"],
        ))
        .with_update_group(
            UpdateGroup::new(
                "maintenance",
                "ModifyMaintenanceSpan",
                ["maintenance_week_set", "maintenance_start_time", "maintenance_time_span"],
            )
            .with_class(OperationClass::Lightweight),
        )
}
