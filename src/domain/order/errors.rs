use rust_decimal::Decimal;
use uuid::Uuid;

use crate::persistence::RepositoryError;
use super::value_objects::OrderStatus;

// ============================================================================
// Order Errors
// ============================================================================

/// Error surfaced by every engine operation.
#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("invalid request: {0}")]
    Validation(#[from] ValidationError),

    /// Unknown order, or an order outside the caller's scope.
    #[error("order not found: {0}")]
    NotFound(String),

    #[error("conflicting update on order {order_id}: {reason}")]
    Conflict {
        order_id: Uuid,
        reason: ConflictReason,
    },

    #[error("persistence failure: {0}")]
    Persistence(RepositoryError),
}

impl OrderError {
    pub fn kind(&self) -> &'static str {
        match self {
            OrderError::Validation(_) => "validation",
            OrderError::NotFound(_) => "not_found",
            OrderError::Conflict { .. } => "conflict",
            OrderError::Persistence(_) => "persistence",
        }
    }
}

/// Malformed input. Always rejected before anything is written.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("order items cannot be empty")]
    EmptyItems,

    #[error("item {index} has invalid quantity {quantity}")]
    InvalidQuantity { index: usize, quantity: i32 },

    #[error("item {index} has negative unit price {unit_price}")]
    NegativeUnitPrice { index: usize, unit_price: Decimal },

    #[error("{field} cannot be negative: {value}")]
    NegativeAmount { field: &'static str, value: Decimal },

    #[error("{0} cannot be blank")]
    BlankField(&'static str),

    #[error("total {total} does not match items + shipping + tax = {expected}")]
    TotalMismatch { total: Decimal, expected: Decimal },

    #[error("generated order number {0:?} is malformed")]
    MalformedOrderNumber(String),

    #[error("generated delivery code {0:?} is malformed")]
    MalformedDeliveryCode(String),

    #[error("a delivery code is required to mark the order delivered")]
    MissingDeliveryCode,

    #[error("delivery code does not match")]
    DeliveryCodeMismatch,
}

/// Why a status change was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConflictReason {
    #[error("cannot move from {from} to {to}; next allowed status is {allowed}")]
    InvalidTransition {
        from: OrderStatus,
        to: OrderStatus,
        allowed: OrderStatus,
    },

    #[error("order is already {0} and cannot change")]
    Terminal(OrderStatus),

    #[error("order changed concurrently (expected version {expected}, found {actual})")]
    StaleVersion { expected: i64, actual: i64 },
}

impl ConflictReason {
    pub fn label(&self) -> &'static str {
        match self {
            ConflictReason::InvalidTransition { .. } => "invalid_transition",
            ConflictReason::Terminal(_) => "terminal",
            ConflictReason::StaleVersion { .. } => "stale_version",
        }
    }
}

impl OrderError {
    /// Map a repository failure for an operation on `order_id`.
    pub(crate) fn from_repository(order_id: Uuid, err: RepositoryError) -> Self {
        match err {
            RepositoryError::VersionConflict { expected, actual } => OrderError::Conflict {
                order_id,
                reason: ConflictReason::StaleVersion { expected, actual },
            },
            RepositoryError::NotFound => OrderError::NotFound(order_id.to_string()),
            other => OrderError::Persistence(other),
        }
    }
}
