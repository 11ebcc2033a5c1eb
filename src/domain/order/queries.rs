use std::sync::Arc;

use uuid::Uuid;

use crate::identifiers::{is_valid_order_number, normalize_order_number};
use crate::persistence::OrderRepository;

use super::aggregate::Order;
use super::errors::OrderError;
use super::value_objects::{Actor, Role};

// ============================================================================
// Order Query Service
// ============================================================================
//
// Role-scoped reads. An order outside the caller's scope is reported exactly
// like a missing one, so lookups never reveal that an order exists.
//
// ============================================================================

pub struct OrderQueryService {
    repository: Arc<dyn OrderRepository>,
}

impl OrderQueryService {
    pub fn new(repository: Arc<dyn OrderRepository>) -> Self {
        Self { repository }
    }

    pub async fn get_by_id(&self, id: Uuid, actor: &Actor) -> Result<Order, OrderError> {
        let order = self
            .repository
            .find_by_id(id)
            .await
            .map_err(OrderError::Persistence)?;

        Self::visible(order, actor).ok_or_else(|| OrderError::NotFound(id.to_string()))
    }

    /// Case-insensitive lookup by human-facing order number.
    pub async fn get_by_order_number(&self, order_number: &str, actor: &Actor) -> Result<Order, OrderError> {
        let normalized = normalize_order_number(order_number);
        if !is_valid_order_number(&normalized) {
            return Err(OrderError::NotFound(normalized));
        }

        let order = self
            .repository
            .find_by_order_number(&normalized)
            .await
            .map_err(OrderError::Persistence)?;

        Self::visible(order, actor).ok_or(OrderError::NotFound(normalized))
    }

    /// Every order in scope for this role, newest first.
    pub async fn list_for(&self, role: Role, actor_id: Uuid) -> Result<Vec<Order>, OrderError> {
        let actor = Actor { id: actor_id, role };
        let orders = self
            .repository
            .list(actor.scope())
            .await
            .map_err(OrderError::Persistence)?;

        tracing::debug!(role = %role, actor_id = %actor_id, count = orders.len(), "Listed orders");
        Ok(orders)
    }

    fn visible(order: Option<Order>, actor: &Actor) -> Option<Order> {
        let order = order?;
        if actor.can_view(&order) {
            Some(order)
        } else {
            tracing::debug!(
                order_id = %order.id,
                actor_id = %actor.id,
                role = %actor.role,
                "Order outside caller scope"
            );
            None
        }
    }
}
