use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use crate::identifiers::IdentifierGenerator;
use crate::messaging::ChangeNotifier;
use crate::metrics::OrderMetrics;
use crate::persistence::{OrderRepository, RepositoryError};

use super::aggregate::Order;
use super::commands::NewOrder;
use super::errors::OrderError;
use super::events::OrderChangeEvent;

// ============================================================================
// Order Factory
// ============================================================================
//
// Validate → identifiers → one atomic insert → best-effort OrderCreated.
//
// A duplicate order number is only a collision when the stored row belongs
// to another order. If it carries our own id, an earlier attempt committed
// and its acknowledgement was lost, so that attempt is the result.
//
// Creation is not idempotent: two identical requests are two orders.
//
// ============================================================================

pub struct OrderFactory {
    repository: Arc<dyn OrderRepository>,
    identifiers: Arc<dyn IdentifierGenerator>,
    notifier: Arc<dyn ChangeNotifier>,
    metrics: Arc<OrderMetrics>,
    lead_time: chrono::Duration,
    identifier_attempts: u32,
}

impl OrderFactory {
    pub fn new(
        repository: Arc<dyn OrderRepository>,
        identifiers: Arc<dyn IdentifierGenerator>,
        notifier: Arc<dyn ChangeNotifier>,
        metrics: Arc<OrderMetrics>,
    ) -> Self {
        Self {
            repository,
            identifiers,
            notifier,
            metrics,
            lead_time: chrono::Duration::hours(72),
            identifier_attempts: 5,
        }
    }

    pub fn with_lead_time(mut self, lead_time: chrono::Duration) -> Self {
        self.lead_time = lead_time;
        self
    }

    pub fn with_identifier_attempts(mut self, attempts: u32) -> Self {
        self.identifier_attempts = attempts.max(1);
        self
    }

    pub async fn create_order(&self, request: NewOrder) -> Result<Order, OrderError> {
        let started = Instant::now();

        if let Err(err) = request.validate() {
            tracing::warn!(buyer_id = %request.buyer_id, error = %err, "Rejected order request");
            self.metrics.record_creation_failure("validation");
            return Err(err.into());
        }

        let mut attempt = 0;
        let order = loop {
            attempt += 1;

            let order = match Order::place(
                request.clone(),
                self.identifiers.generate(),
                Utc::now(),
                self.lead_time,
            ) {
                Ok(order) => order,
                Err(err) => {
                    tracing::error!(
                        buyer_id = %request.buyer_id,
                        error = %err,
                        "Identifier generator produced an unusable identifier"
                    );
                    self.metrics.record_creation_failure("identifiers");
                    return Err(err.into());
                }
            };

            let failure = match self.repository.insert_order(&order).await {
                Ok(()) => break order,
                // A timed-out attempt may have committed before the retry
                // hit our own unique number.
                Err(RepositoryError::DuplicateOrderNumber(number)) => {
                    match self.find_own_commit(&order).await {
                        Ok(Some(stored)) => {
                            tracing::info!(
                                order_id = %stored.id,
                                order_number = %stored.order_number,
                                attempt,
                                "Earlier insert attempt had committed"
                            );
                            break stored;
                        }
                        Ok(None) if attempt < self.identifier_attempts => {
                            tracing::warn!(
                                order_number = %number,
                                attempt,
                                "Order number collision, drawing a new one"
                            );
                            continue;
                        }
                        Ok(None) => RepositoryError::DuplicateOrderNumber(number),
                        Err(err) => err,
                    }
                }
                Err(err) => err,
            };

            tracing::error!(
                buyer_id = %request.buyer_id,
                attempt,
                error = %failure,
                "Failed to persist new order"
            );
            self.metrics.record_creation_failure("persistence");
            return Err(OrderError::Persistence(failure));
        };

        tracing::info!(
            order_id = %order.id,
            order_number = %order.order_number,
            buyer_id = %order.buyer_id,
            items = order.items.len(),
            total = %order.total_amount,
            "Order created"
        );
        self.metrics
            .record_order_created(started.elapsed().as_secs_f64());

        let event = OrderChangeEvent::created(&order);
        if let Err(err) = self.notifier.publish(event).await {
            tracing::warn!(order_id = %order.id, error = %err, "Failed to publish OrderCreated");
            self.metrics.record_publish_failure("OrderCreated");
        }

        Ok(order)
    }

    /// The stored order holding `order.order_number`, if it is this very order.
    async fn find_own_commit(&self, order: &Order) -> Result<Option<Order>, RepositoryError> {
        let stored = self
            .repository
            .find_by_order_number(&order.order_number)
            .await?;
        Ok(stored.filter(|stored| stored.id == order.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashSet, VecDeque};
    use std::sync::Mutex;

    use uuid::Uuid;

    use crate::domain::order::aggregate::tests::sample_request;
    use crate::domain::order::{OrderStatus, ValidationError};
    use crate::identifiers::RandomIdentifierGenerator;
    use crate::messaging::{BroadcastNotifier, EventFilter, MockChangeNotifier, NotifyError};
    use crate::persistence::resilient::tests::{fast_config, SlowAckRepository};
    use crate::persistence::{InMemoryOrderRepository, MockOrderRepository, ResilientRepository};

    /// Hands out scripted order numbers, then falls back to random ones.
    struct ScriptedIdentifiers {
        numbers: Mutex<VecDeque<String>>,
        delivery_code: &'static str,
    }

    impl ScriptedIdentifiers {
        fn new(numbers: &[&str]) -> Self {
            Self {
                numbers: Mutex::new(numbers.iter().map(|n| n.to_string()).collect()),
                delivery_code: "04217",
            }
        }

        fn with_delivery_code(mut self, code: &'static str) -> Self {
            self.delivery_code = code;
            self
        }
    }

    impl IdentifierGenerator for ScriptedIdentifiers {
        fn generate_order_number(&self) -> String {
            self.numbers
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| RandomIdentifierGenerator.generate_order_number())
        }

        fn generate_delivery_code(&self) -> String {
            self.delivery_code.to_string()
        }
    }

    fn factory_with(
        repository: Arc<dyn OrderRepository>,
        identifiers: Arc<dyn IdentifierGenerator>,
        notifier: Arc<dyn ChangeNotifier>,
    ) -> (OrderFactory, Arc<OrderMetrics>) {
        let metrics = Arc::new(OrderMetrics::new().unwrap());
        let factory = OrderFactory::new(repository, identifiers, notifier, metrics.clone());
        (factory, metrics)
    }

    #[tokio::test]
    async fn test_create_order_persists_confirmed_order() {
        let repo = InMemoryOrderRepository::new();
        let notifier = BroadcastNotifier::new(8);
        let mut subscription = notifier.subscribe(EventFilter::All);
        let (factory, metrics) = factory_with(
            Arc::new(repo.clone()),
            Arc::new(RandomIdentifierGenerator),
            Arc::new(notifier.clone()),
        );

        let buyer = Uuid::new_v4();
        let order = factory
            .create_order(sample_request(buyer, &[Uuid::new_v4(), Uuid::new_v4()]))
            .await
            .unwrap();

        assert_eq!(order.status, OrderStatus::Confirmed);
        assert_eq!(order.items.len(), 2);
        assert_eq!(order.history.len(), 1);
        assert_eq!(order.history[0].updated_by, Some(buyer));
        assert_eq!(order.estimated_delivery - order.created_at, chrono::Duration::hours(72));

        let stored = repo.find_by_id(order.id).await.unwrap().unwrap();
        assert_eq!(stored, order);

        let event = subscription.next().await.unwrap();
        assert_eq!(event, OrderChangeEvent::created(&order));
        assert_eq!(metrics.orders_created.get(), 1);
    }

    #[tokio::test]
    async fn test_identical_requests_create_distinct_orders() {
        let repo = InMemoryOrderRepository::new();
        let (factory, _) = factory_with(
            Arc::new(repo.clone()),
            Arc::new(RandomIdentifierGenerator),
            Arc::new(BroadcastNotifier::default()),
        );
        let request = sample_request(Uuid::new_v4(), &[Uuid::new_v4()]);

        let first = factory.create_order(request.clone()).await.unwrap();
        let second = factory.create_order(request).await.unwrap();

        assert_ne!(first.id, second.id);
        assert_ne!(first.order_number, second.order_number);
        assert_eq!(repo.len().await, 2);
    }

    #[tokio::test]
    async fn test_concurrent_creation_yields_unique_numbers() {
        let repo = InMemoryOrderRepository::new();
        let (factory, _) = factory_with(
            Arc::new(repo.clone()),
            Arc::new(RandomIdentifierGenerator),
            Arc::new(BroadcastNotifier::default()),
        );
        let factory = Arc::new(factory);

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let factory = factory.clone();
                tokio::spawn(async move {
                    factory
                        .create_order(sample_request(Uuid::new_v4(), &[Uuid::new_v4()]))
                        .await
                })
            })
            .collect();

        let mut numbers = HashSet::new();
        for handle in handles {
            let order = handle.await.unwrap().unwrap();
            assert!(numbers.insert(order.order_number));
        }
        assert_eq!(repo.len().await, 32);
    }

    #[tokio::test]
    async fn test_collision_draws_fresh_number() {
        let repo = InMemoryOrderRepository::new();
        let identifiers = Arc::new(ScriptedIdentifiers::new(&[
            "DJ-COLLIDE001",
            "DJ-COLLIDE001",
            "DJ-FRESH0002",
        ]));
        let (factory, _) = factory_with(
            Arc::new(repo.clone()),
            identifiers,
            Arc::new(BroadcastNotifier::default()),
        );

        let first = factory
            .create_order(sample_request(Uuid::new_v4(), &[Uuid::new_v4()]))
            .await
            .unwrap();
        let second = factory
            .create_order(sample_request(Uuid::new_v4(), &[Uuid::new_v4()]))
            .await
            .unwrap();

        assert_eq!(first.order_number, "DJ-COLLIDE001");
        assert_eq!(second.order_number, "DJ-FRESH0002");
    }

    #[tokio::test]
    async fn test_collisions_exhaust_attempts() {
        let repo = InMemoryOrderRepository::new();
        let identifiers = Arc::new(ScriptedIdentifiers::new(&[
            "DJ-TAKEN0001",
            "DJ-TAKEN0001",
            "DJ-TAKEN0001",
        ]));
        let (factory, metrics) = factory_with(
            Arc::new(repo.clone()),
            identifiers,
            Arc::new(BroadcastNotifier::default()),
        );
        let factory = factory.with_identifier_attempts(2);

        factory
            .create_order(sample_request(Uuid::new_v4(), &[Uuid::new_v4()]))
            .await
            .unwrap();
        let err = factory
            .create_order(sample_request(Uuid::new_v4(), &[Uuid::new_v4()]))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            OrderError::Persistence(RepositoryError::DuplicateOrderNumber(_))
        ));
        assert_eq!(repo.len().await, 1);
        assert_eq!(
            metrics
                .order_creation_failures
                .with_label_values(&["persistence"])
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn test_invalid_request_writes_nothing() {
        let mut repo = MockOrderRepository::new();
        repo.expect_insert_order().never();
        let mut notifier = MockChangeNotifier::new();
        notifier.expect_publish().never();

        let (factory, _) = factory_with(
            Arc::new(repo),
            Arc::new(RandomIdentifierGenerator),
            Arc::new(notifier),
        );

        let mut request = sample_request(Uuid::new_v4(), &[Uuid::new_v4()]);
        request.items.clear();

        let err = factory.create_order(request).await.unwrap_err();
        assert!(matches!(err, OrderError::Validation(ValidationError::EmptyItems)));
    }

    #[tokio::test]
    async fn test_persistence_failure_publishes_nothing() {
        let mut repo = MockOrderRepository::new();
        repo.expect_insert_order()
            .times(1)
            .returning(|_| Err(RepositoryError::Backend("permission denied".into())));
        let mut notifier = MockChangeNotifier::new();
        notifier.expect_publish().never();

        let (factory, _) = factory_with(
            Arc::new(repo),
            Arc::new(RandomIdentifierGenerator),
            Arc::new(notifier),
        );

        let err = factory
            .create_order(sample_request(Uuid::new_v4(), &[Uuid::new_v4()]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "persistence");
    }

    #[tokio::test]
    async fn test_publish_failure_does_not_fail_creation() {
        let repo = InMemoryOrderRepository::new();
        let mut notifier = MockChangeNotifier::new();
        notifier
            .expect_publish()
            .times(1)
            .returning(|_| Err(NotifyError::Closed));

        let (factory, metrics) = factory_with(
            Arc::new(repo.clone()),
            Arc::new(RandomIdentifierGenerator),
            Arc::new(notifier),
        );

        let order = factory
            .create_order(sample_request(Uuid::new_v4(), &[Uuid::new_v4()]))
            .await
            .unwrap();

        assert!(repo.find_by_id(order.id).await.unwrap().is_some());
        assert_eq!(
            metrics
                .publish_failures
                .with_label_values(&["OrderCreated"])
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn test_lost_insert_acknowledgement_returns_committed_order() {
        let repo = InMemoryOrderRepository::new();
        let resilient = ResilientRepository::new(
            SlowAckRepository::new(repo.clone(), std::time::Duration::from_millis(200)),
            &fast_config(3, 10),
        );
        let (factory, metrics) = factory_with(
            Arc::new(resilient),
            Arc::new(RandomIdentifierGenerator),
            Arc::new(BroadcastNotifier::default()),
        );

        let order = factory
            .create_order(sample_request(Uuid::new_v4(), &[Uuid::new_v4()]))
            .await
            .unwrap();

        assert_eq!(repo.len().await, 1);
        let stored = repo
            .find_by_order_number(&order.order_number)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.id, order.id);
        assert_eq!(metrics.orders_created.get(), 1);
        assert_eq!(
            metrics
                .order_creation_failures
                .with_label_values(&["persistence"])
                .get(),
            0
        );
    }

    #[tokio::test]
    async fn test_generated_order_number_is_stored_upper_case() {
        let repo = InMemoryOrderRepository::new();
        let identifiers = Arc::new(ScriptedIdentifiers::new(&["dj-abc123xyz"]).with_delivery_code("73510"));
        let (factory, _) = factory_with(
            Arc::new(repo.clone()),
            identifiers,
            Arc::new(BroadcastNotifier::default()),
        );

        let order = factory
            .create_order(sample_request(Uuid::new_v4(), &[Uuid::new_v4()]))
            .await
            .unwrap();

        assert_eq!(order.order_number, "DJ-ABC123XYZ");
        let stored = repo.find_by_order_number("DJ-ABC123XYZ").await.unwrap().unwrap();
        assert_eq!(stored.id, order.id);
    }

    #[tokio::test]
    async fn test_malformed_delivery_code_writes_nothing() {
        let mut repo = MockOrderRepository::new();
        repo.expect_insert_order().never();
        let mut notifier = MockChangeNotifier::new();
        notifier.expect_publish().never();
        let identifiers = Arc::new(ScriptedIdentifiers::new(&["DJ-ABC123XYZ"]).with_delivery_code("7x"));

        let (factory, metrics) = factory_with(Arc::new(repo), identifiers, Arc::new(notifier));

        let err = factory
            .create_order(sample_request(Uuid::new_v4(), &[Uuid::new_v4()]))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            OrderError::Validation(ValidationError::MalformedDeliveryCode(_))
        ));
        assert_eq!(
            metrics
                .order_creation_failures
                .with_label_values(&["identifiers"])
                .get(),
            1
        );
    }
}
