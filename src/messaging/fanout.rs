use std::sync::Arc;

use async_trait::async_trait;

use super::{ChangeNotifier, NotifyError};
use crate::domain::order::OrderChangeEvent;

// ============================================================================
// Fan-out notifier
// ============================================================================
//
// Publishes every event to each sink in order. All sinks are attempted even
// when one fails; the first error is returned so the caller can count it.
//
// ============================================================================

#[derive(Clone, Default)]
pub struct FanoutNotifier {
    sinks: Vec<Arc<dyn ChangeNotifier>>,
}

impl FanoutNotifier {
    pub fn new(sinks: Vec<Arc<dyn ChangeNotifier>>) -> Self {
        Self { sinks }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ChangeNotifier>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl ChangeNotifier for FanoutNotifier {
    async fn publish(&self, event: OrderChangeEvent) -> Result<(), NotifyError> {
        let mut first_error = None;

        for (index, sink) in self.sinks.iter().enumerate() {
            if let Err(err) = sink.publish(event.clone()).await {
                tracing::warn!(
                    sink = index,
                    event_type = event.event_type(),
                    error = %err,
                    "Notifier sink failed"
                );
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::aggregate::tests::placed_order;
    use crate::messaging::{BroadcastNotifier, EventFilter, MockChangeNotifier};

    #[tokio::test]
    async fn test_every_sink_receives_the_event() {
        let local = BroadcastNotifier::new(4);
        let mut subscription = local.subscribe(EventFilter::All);
        let mut remote = MockChangeNotifier::new();
        remote.expect_publish().times(1).returning(|_| Ok(()));

        let fanout = FanoutNotifier::default()
            .with_sink(Arc::new(local.clone()))
            .with_sink(Arc::new(remote));
        let order = placed_order();

        assert_eq!(fanout.publish(OrderChangeEvent::created(&order)).await, Ok(()));
        assert_eq!(subscription.next().await, Some(OrderChangeEvent::created(&order)));
    }

    #[tokio::test]
    async fn test_failing_sink_does_not_starve_the_rest() {
        let mut closed = MockChangeNotifier::new();
        closed.expect_publish().times(1).returning(|_| Err(NotifyError::Closed));
        let local = BroadcastNotifier::new(4);
        let mut subscription = local.subscribe(EventFilter::All);

        let fanout = FanoutNotifier::new(vec![Arc::new(closed), Arc::new(local.clone())]);
        let order = placed_order();

        assert_eq!(
            fanout.publish(OrderChangeEvent::created(&order)).await,
            Err(NotifyError::Closed)
        );
        assert_eq!(subscription.next().await, Some(OrderChangeEvent::created(&order)));
        assert_eq!(fanout.len(), 2);
    }
}
