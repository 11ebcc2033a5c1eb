// ============================================================================
// Order Persistence - Transactional repository contract and adapters
// ============================================================================
//
// The engine needs very little from storage:
// - insert an order with its items and first history entry atomically,
//   rejecting a duplicate order number
// - apply a status transition only if the stored version is unchanged
// - read committed aggregates by id, by order number, or by scope
//
// Adapters:
// - `memory`: in-process reference implementation
// - `postgres`: sqlx/PostgreSQL implementation
// - `resilient`: timeout + retry + circuit breaker around any adapter
//
// ============================================================================

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::order::{Order, OrderScope, StatusTransition};
use crate::utils::IsTransient;

pub mod memory;
pub mod postgres;
pub mod resilient;

pub use memory::InMemoryOrderRepository;
pub use postgres::PgOrderRepository;
pub use resilient::ResilientRepository;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("storage operation timed out after {0} ms")]
    Timeout(u64),

    #[error("storage circuit breaker is open")]
    CircuitOpen,

    #[error("order number already exists: {0}")]
    DuplicateOrderNumber(String),

    #[error("version conflict: expected {expected}, found {actual}")]
    VersionConflict { expected: i64, actual: i64 },

    #[error("order not found")]
    NotFound,

    #[error("stored data is corrupt: {0}")]
    Corrupt(String),

    /// Non-retryable backend failure (bad query, constraint, permissions).
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl IsTransient for RepositoryError {
    fn is_transient(&self) -> bool {
        matches!(self, RepositoryError::Unavailable(_) | RepositoryError::Timeout(_))
    }
}

/// Transactional store for order aggregates.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Insert order, items and history in one transaction.
    async fn insert_order(&self, order: &Order) -> Result<(), RepositoryError>;

    /// Apply `transition` if the stored order still has the expected version
    /// and status. Fails with `VersionConflict` otherwise.
    async fn apply_transition(&self, transition: &StatusTransition) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>, RepositoryError>;

    /// `order_number` is already normalized to upper case.
    async fn find_by_order_number(&self, order_number: &str) -> Result<Option<Order>, RepositoryError>;

    /// Orders in `scope`, newest first.
    async fn list(&self, scope: OrderScope) -> Result<Vec<Order>, RepositoryError>;
}
