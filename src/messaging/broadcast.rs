use async_trait::async_trait;
use futures_util::Stream;
use tokio::sync::broadcast;

use super::{ChangeNotifier, EventFilter, NotifyError};
use crate::domain::order::OrderChangeEvent;

// ============================================================================
// In-process broadcast notifier
// ============================================================================
//
// Every subscriber gets its own bounded buffer. A subscriber that falls more
// than `capacity` events behind loses the oldest ones and is told to resync.
//
// ============================================================================

#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<OrderChangeEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
            filter,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl ChangeNotifier for BroadcastNotifier {
    async fn publish(&self, event: OrderChangeEvent) -> Result<(), NotifyError> {
        let event_type = event.event_type();
        match self.sender.send(event) {
            Ok(receivers) => {
                tracing::debug!(event_type, receivers, "Published order event");
            }
            Err(_) => {
                // No live subscribers; nothing to deliver.
                tracing::trace!(event_type, "No subscribers for order event");
            }
        }
        Ok(())
    }
}

/// A live feed of order events matching one filter.
pub struct Subscription {
    receiver: broadcast::Receiver<OrderChangeEvent>,
    filter: EventFilter,
}

impl Subscription {
    /// Next matching event, `Resync` after falling behind, or `None` once
    /// the notifier is gone.
    pub async fn next(&mut self) -> Option<OrderChangeEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Subscriber lagged, requesting resync");
                    return Some(OrderChangeEvent::Resync { missed });
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn filter(&self) -> &EventFilter {
        &self.filter
    }

    pub fn into_stream(self) -> impl Stream<Item = OrderChangeEvent> + Send {
        futures_util::stream::unfold(self, |mut subscription| async move {
            subscription
                .next()
                .await
                .map(|event| (event, subscription))
        })
    }
}
