//! Resource kind catalog for converge
//!
//! Descriptors for a representative set of resource types. Each descriptor
//! tells the reconciler which budgets apply, how the kind's operations report
//! progress and which fields can change in place.
//!
//! # Example
//!
//! ```ignore
//! use converge_catalog::Catalog;
//!
//! let catalog = Catalog::builtin();
//! let kind = catalog.require("mysql_instance")?;
//! let state = reconciler.create(kind, &kind.create_request(params)).await?;
//! ```

pub mod database;
pub mod error;
pub mod messaging;
pub mod network;

pub use error::{CatalogError, Result};

use converge_engine::ResourceKind;
use std::collections::BTreeMap;

/// Resource kinds keyed by resource type
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    kinds: BTreeMap<String, ResourceKind>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every kind this crate ships
    pub fn builtin() -> Self {
        let mut kinds = BTreeMap::new();
        for kind in [
            database::mysql_instance(),
            database::dcdb_hourdb_instance(),
            database::sqlserver_instance(),
            network::mysql_security_groups_attachment(),
            network::vpn_gateway(),
            messaging::ckafka_instance(),
            messaging::ckafka_connect_resource(),
        ] {
            kinds.insert(kind.resource_type.clone(), kind);
        }
        Self { kinds }
    }

    /// Add a kind; a resource type can only be registered once
    pub fn register(&mut self, kind: ResourceKind) -> Result<()> {
        if self.kinds.contains_key(&kind.resource_type) {
            return Err(CatalogError::DuplicateKind(kind.resource_type));
        }
        tracing::debug!("Registered resource kind {}", kind.resource_type);
        self.kinds.insert(kind.resource_type.clone(), kind);
        Ok(())
    }

    pub fn get(&self, resource_type: &str) -> Option<&ResourceKind> {
        self.kinds.get(resource_type)
    }

    pub fn require(&self, resource_type: &str) -> Result<&ResourceKind> {
        self.get(resource_type)
            .ok_or_else(|| CatalogError::UnknownKind(resource_type.to_string()))
    }

    pub fn resource_types(&self) -> impl Iterator<Item = &str> {
        self.kinds.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge_engine::OperationClass;

    #[test]
    fn test_builtin_lookup() {
        let catalog = Catalog::builtin();
        assert_eq!(catalog.len(), 7);
        assert_eq!(
            catalog.require("mysql_instance").unwrap().class,
            OperationClass::HeavyProvisioning
        );
        assert_eq!(
            catalog.require("redis_instance").unwrap_err(),
            CatalogError::UnknownKind("redis_instance".to_string())
        );
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let mut catalog = Catalog::new();
        assert!(catalog.is_empty());
        catalog.register(network::vpn_gateway()).unwrap();
        assert_eq!(
            catalog.register(network::vpn_gateway()),
            Err(CatalogError::DuplicateKind("vpn_gateway".to_string()))
        );
        assert_eq!(catalog.resource_types().collect::<Vec<_>>(), ["vpn_gateway"]);
    }

    #[test]
    fn test_builtin_kinds_are_consistent() {
        let catalog = Catalog::builtin();
        for resource_type in catalog.resource_types() {
            let kind = catalog.require(resource_type).unwrap();
            assert_eq!(kind.resource_type, resource_type);
            assert!(
                kind.transitional_statuses.is_disjoint(&kind.failed_statuses),
                "{} has a status that is both transitional and failed",
                resource_type
            );
        }
    }
}
