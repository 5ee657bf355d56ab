//! Network attachments
//!
//! Attachments complete synchronously; there is no operation token to poll,
//! only a read to confirm the binding is visible.

use converge_engine::{OperationClass, ResourceKind, UpdateGroup};

pub fn mysql_security_groups_attachment() -> ResourceKind {
    ResourceKind::new("mysql_security_groups_attachment", OperationClass::Lightweight)
        .with_actions("AssociateSecurityGroups", "DisassociateSecurityGroups")
        .with_immutable(["security_group_id", "instance_id"])
}

pub fn vpn_gateway() -> ResourceKind {
    ResourceKind::new("vpn_gateway", OperationClass::Provisioning)
        .with_actions("CreateVpnGateway", "DeleteVpnGateway")
        .with_transitional(["PENDING", "DELETING"])
        .with_immutable(["vpc_id", "zone", "type"])
        .with_update_group(
            UpdateGroup::new("attributes", "ModifyVpnGatewayAttribute", ["name", "charge_type"])
                .with_class(OperationClass::Lightweight),
        )
        .with_update_group(UpdateGroup::new(
            "bandwidth",
            "ResetVpnGatewayInternetMaxBandwidth",
            ["bandwidth"],
        ))
}
