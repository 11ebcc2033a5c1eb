// ============================================================================
// Change Notification - fan-out of order events to live observers
// ============================================================================
//
// The write path publishes after commit and never waits on subscribers.
// A failed publish is logged and counted by the caller; the committed write
// stands.
//
// Delivery is at-least-once and best-effort. A subscriber either receives
// each matching event or, if it fell behind, a `Resync { missed }` that
// makes it re-read everything, so every change is observed through the
// query service at least once.
//
// ============================================================================

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::order::{Actor, OrderChangeEvent, Role};

pub mod broadcast;
pub mod fanout;

pub use broadcast::{BroadcastNotifier, Subscription};
pub use fanout::FanoutNotifier;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotifyError {
    #[error("notifier is closed")]
    Closed,
}

/// Sink for order change events. The engine always fans out to its own
/// `BroadcastNotifier`, which serves `subscribe`; hosts may add a networked
/// sink through `OrderEngine::with_notifier`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChangeNotifier: Send + Sync {
    async fn publish(&self, event: OrderChangeEvent) -> Result<(), NotifyError>;
}

pub type EventPredicate = Arc<dyn Fn(&OrderChangeEvent) -> bool + Send + Sync>;

/// Which events a subscriber wants. `Resync` always passes.
#[derive(Clone)]
pub enum EventFilter {
    All,
    Order(Uuid),
    Buyer(Uuid),
    Seller(Uuid),
    Custom(EventPredicate),
}

impl EventFilter {
    /// The events a dashboard for `actor` should see.
    pub fn for_actor(actor: &Actor) -> Self {
        match actor.role {
            Role::Buyer => EventFilter::Buyer(actor.id),
            Role::Seller => EventFilter::Seller(actor.id),
            Role::Admin => EventFilter::All,
        }
    }

    pub fn custom<F>(predicate: F) -> Self
    where
        F: Fn(&OrderChangeEvent) -> bool + Send + Sync + 'static,
    {
        EventFilter::Custom(Arc::new(predicate))
    }

    pub fn matches(&self, event: &OrderChangeEvent) -> bool {
        let Some(order) = event.order_ref() else {
            return true;
        };

        match self {
            EventFilter::All => true,
            EventFilter::Order(id) => order.order_id == *id,
            EventFilter::Buyer(id) => order.buyer_id == *id,
            EventFilter::Seller(id) => order.seller_ids.contains(id),
            EventFilter::Custom(predicate) => predicate(event),
        }
    }
}

impl fmt::Debug for EventFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventFilter::All => write!(f, "All"),
            EventFilter::Order(id) => write!(f, "Order({id})"),
            EventFilter::Buyer(id) => write!(f, "Buyer({id})"),
            EventFilter::Seller(id) => write!(f, "Seller({id})"),
            EventFilter::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}
