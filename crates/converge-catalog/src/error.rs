//! Catalog error types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("Unknown resource type: {0}")]
    UnknownKind(String),

    #[error("Resource type already registered: {0}")]
    DuplicateKind(String),
}

pub type Result<T> = std::result::Result<T, CatalogError>;
