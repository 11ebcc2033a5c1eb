use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::aggregate::Order;
use super::value_objects::OrderStatus;

// ============================================================================
// Order Change Events
// ============================================================================
//
// Events only say *which* order changed. Consumers re-read the order through
// the query service instead of merging deltas.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OrderChangeEvent {
    Created(OrderRef),
    StatusChanged {
        order: OrderRef,
        from: OrderStatus,
        to: OrderStatus,
    },
    /// The subscriber fell behind and dropped `missed` events. Refetch all.
    Resync { missed: u64 },
}

/// Routing data for an order event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRef {
    pub order_id: Uuid,
    pub order_number: String,
    pub buyer_id: Uuid,
    pub seller_ids: Vec<Uuid>,
    pub occurred_at: DateTime<Utc>,
}

impl OrderRef {
    pub fn of(order: &Order) -> Self {
        Self {
            order_id: order.id,
            order_number: order.order_number.clone(),
            buyer_id: order.buyer_id,
            seller_ids: order.seller_ids(),
            occurred_at: order.updated_at,
        }
    }
}

impl OrderChangeEvent {
    pub fn created(order: &Order) -> Self {
        OrderChangeEvent::Created(OrderRef::of(order))
    }

    pub fn status_changed(order: &Order, from: OrderStatus) -> Self {
        OrderChangeEvent::StatusChanged {
            order: OrderRef::of(order),
            from,
            to: order.status,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            OrderChangeEvent::Created(_) => "OrderCreated",
            OrderChangeEvent::StatusChanged { .. } => "OrderStatusChanged",
            OrderChangeEvent::Resync { .. } => "Resync",
        }
    }

    pub fn order_ref(&self) -> Option<&OrderRef> {
        match self {
            OrderChangeEvent::Created(order) => Some(order),
            OrderChangeEvent::StatusChanged { order, .. } => Some(order),
            OrderChangeEvent::Resync { .. } => None,
        }
    }

    pub fn order_id(&self) -> Option<Uuid> {
        self.order_ref().map(|order| order.order_id)
    }
}
