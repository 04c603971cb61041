//! Domain error types.

use storage::{RuleViolation, StorageError};
use thiserror::Error;

use crate::ports::CatalogError;

/// Errors returned by the cart and order services.
///
/// Every variant carries a reason string meant for the caller; the HTTP
/// layer maps variants to status codes.
#[derive(Debug, Error)]
pub enum DomainError {
    /// Bad input shape, e.g. a zero quantity or an empty item list.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The request contradicts current state: single-store cart, invalid
    /// status transition, or a concurrent writer got there first.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Cart, order or product does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The caller's role is not allowed to perform the action.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The catalog lookup failed.
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// The persistence layer failed.
    #[error("Storage error: {0}")]
    Storage(StorageError),
}

impl DomainError {
    /// Returns the short name of the error category.
    pub fn kind(&self) -> &'static str {
        match self {
            DomainError::Validation(_) => "validation",
            DomainError::Conflict(_) => "conflict",
            DomainError::NotFound(_) => "not_found",
            DomainError::Forbidden(_) => "forbidden",
            DomainError::Catalog(_) => "catalog",
            DomainError::Storage(_) => "storage",
        }
    }
}

impl From<StorageError> for DomainError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::CartConflict { .. }
            | StorageError::OrderConflict { .. }
            | StorageError::OrderExists(_)
            | StorageError::DuplicateIdempotencyKey { .. } => DomainError::Conflict(e.to_string()),
            other => DomainError::Storage(other),
        }
    }
}

impl From<RuleViolation> for DomainError {
    fn from(e: RuleViolation) -> Self {
        match e {
            RuleViolation::InvalidQuantity(_) | RuleViolation::QuantityOverflow(_) => {
                DomainError::Validation(e.to_string())
            }
            RuleViolation::ItemNotFound(_) => DomainError::NotFound(e.to_string()),
            RuleViolation::ForeignStore { .. }
            | RuleViolation::InvalidTransition { .. }
            | RuleViolation::TerminalOrder(_) => DomainError::Conflict(e.to_string()),
        }
    }
}

/// Result type for domain operations.
pub type Result<T> = std::result::Result<T, DomainError>;
