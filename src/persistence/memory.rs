use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{OrderRepository, RepositoryError};
use crate::domain::order::{Order, OrderScope, StatusTransition};

// ============================================================================
// In-Memory Order Repository
// ============================================================================
//
// Every aggregate sits behind one `RwLock`, so each write is atomic and
// readers only ever observe committed state. Used by tests, the demo and
// single-process deployments.
//
// ============================================================================

#[derive(Default)]
struct Tables {
    orders: HashMap<Uuid, Order>,
    /// Unique index on `order_number`.
    by_number: HashMap<String, Uuid>,
}

#[derive(Clone, Default)]
pub struct InMemoryOrderRepository {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.tables.read().await.orders.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn insert_order(&self, order: &Order) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;

        if tables.by_number.contains_key(&order.order_number) {
            return Err(RepositoryError::DuplicateOrderNumber(order.order_number.clone()));
        }
        if tables.orders.contains_key(&order.id) {
            return Err(RepositoryError::Corrupt(format!("duplicate order id {}", order.id)));
        }

        tables.by_number.insert(order.order_number.clone(), order.id);
        tables.orders.insert(order.id, order.clone());

        tracing::debug!(
            order_id = %order.id,
            order_number = %order.order_number,
            items = order.items.len(),
            "Inserted order aggregate"
        );
        Ok(())
    }

    async fn apply_transition(&self, transition: &StatusTransition) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;

        let order = tables
            .orders
            .get_mut(&transition.order_id)
            .ok_or(RepositoryError::NotFound)?;

        if order.version != transition.expected_version || order.status != transition.from {
            return Err(RepositoryError::VersionConflict {
                expected: transition.expected_version,
                actual: order.version,
            });
        }

        order.apply(transition);
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>, RepositoryError> {
        Ok(self.tables.read().await.orders.get(&id).cloned())
    }

    async fn find_by_order_number(&self, order_number: &str) -> Result<Option<Order>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables
            .by_number
            .get(order_number)
            .and_then(|id| tables.orders.get(id))
            .cloned())
    }

    async fn list(&self, scope: OrderScope) -> Result<Vec<Order>, RepositoryError> {
        let tables = self.tables.read().await;
        let mut orders: Vec<Order> = tables
            .orders
            .values()
            .filter(|order| order.in_scope(&scope))
            .cloned()
            .collect();

        // v7 ids break ties between orders created in the same instant.
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(orders)
    }
}
