use std::sync::Arc;

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::config::{ConfigError, EngineConfig};
use crate::domain::order::{
    Actor, AdvanceStatus, NewOrder, Order, OrderAmounts, OrderError, OrderFactory, OrderQueryService,
    Role, StatusTransitionEngine,
};
use crate::identifiers::{IdentifierGenerator, RandomIdentifierGenerator};
use crate::messaging::{BroadcastNotifier, ChangeNotifier, EventFilter, FanoutNotifier, Subscription};
use crate::metrics::OrderMetrics;
use crate::persistence::{InMemoryOrderRepository, OrderRepository, ResilientRepository};

// ============================================================================
// Order Engine - wiring and operation surface
// ============================================================================
//
// Wraps the given repository in the resilience layer and shares it between
// the factory, the transition engine and the query service. Both write paths
// publish to the engine's own broadcast notifier (which backs `subscribe`)
// plus any injected sink.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to register metrics: {0}")]
    Metrics(#[from] prometheus::Error),
}

pub struct OrderEngine {
    factory: OrderFactory,
    transitions: StatusTransitionEngine,
    queries: OrderQueryService,
    notifier: BroadcastNotifier,
    metrics: Arc<OrderMetrics>,
    config: EngineConfig,
}

impl OrderEngine {
    pub fn new<R>(repository: R, config: EngineConfig) -> Result<Self, EngineError>
    where
        R: OrderRepository + 'static,
    {
        Self::with_identifier_generator(repository, Arc::new(RandomIdentifierGenerator), config)
    }

    /// Engine backed by the in-process repository.
    pub fn in_memory(config: EngineConfig) -> Result<Self, EngineError> {
        Self::new(InMemoryOrderRepository::new(), config)
    }

    pub fn with_identifier_generator<R>(
        repository: R,
        identifiers: Arc<dyn IdentifierGenerator>,
        config: EngineConfig,
    ) -> Result<Self, EngineError>
    where
        R: OrderRepository + 'static,
    {
        Self::build(repository, identifiers, None, config)
    }

    /// Engine that also publishes every event to `sink`, e.g. a networked
    /// notifier shared by several engine instances.
    pub fn with_notifier<R>(
        repository: R,
        identifiers: Arc<dyn IdentifierGenerator>,
        sink: Arc<dyn ChangeNotifier>,
        config: EngineConfig,
    ) -> Result<Self, EngineError>
    where
        R: OrderRepository + 'static,
    {
        Self::build(repository, identifiers, Some(sink), config)
    }

    fn build<R>(
        repository: R,
        identifiers: Arc<dyn IdentifierGenerator>,
        sink: Option<Arc<dyn ChangeNotifier>>,
        config: EngineConfig,
    ) -> Result<Self, EngineError>
    where
        R: OrderRepository + 'static,
    {
        config.validate()?;

        let metrics = Arc::new(OrderMetrics::new()?);
        let repository: Arc<dyn OrderRepository> = Arc::new(
            ResilientRepository::new(repository, &config.storage).with_metrics(metrics.clone()),
        );
        let notifier = BroadcastNotifier::new(config.notifier_capacity);
        let mut publisher = FanoutNotifier::default().with_sink(Arc::new(notifier.clone()));
        if let Some(sink) = sink {
            publisher = publisher.with_sink(sink);
        }
        let publisher: Arc<dyn ChangeNotifier> = Arc::new(publisher);

        let factory = OrderFactory::new(
            repository.clone(),
            identifiers,
            publisher.clone(),
            metrics.clone(),
        )
        .with_lead_time(config.delivery_lead_time())
        .with_identifier_attempts(config.identifier_attempts);

        let transitions = StatusTransitionEngine::new(repository.clone(), publisher, metrics.clone());
        let queries = OrderQueryService::new(repository);

        tracing::info!(
            lead_time_hours = config.delivery_lead_time_hours,
            notifier_capacity = config.notifier_capacity,
            storage_timeout_ms = config.storage.timeout_ms,
            "Order engine initialized"
        );

        Ok(Self {
            factory,
            transitions,
            queries,
            notifier,
            metrics,
            config,
        })
    }

    pub async fn create_order(&self, request: NewOrder) -> Result<Order, OrderError> {
        self.factory.create_order(request).await
    }

    pub async fn advance_status(&self, request: AdvanceStatus) -> Result<Order, OrderError> {
        self.transitions.advance_status(request).await
    }

    pub async fn get_by_id(&self, id: Uuid, actor: &Actor) -> Result<Order, OrderError> {
        self.queries.get_by_id(id, actor).await
    }

    pub async fn get_by_order_number(&self, order_number: &str, actor: &Actor) -> Result<Order, OrderError> {
        self.queries.get_by_order_number(order_number, actor).await
    }

    pub async fn list_for(&self, role: Role, actor_id: Uuid) -> Result<Vec<Order>, OrderError> {
        self.queries.list_for(role, actor_id).await
    }

    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        self.notifier.subscribe(filter)
    }

    /// Shipping and tax for `subtotal` under the configured charge policy.
    pub fn quote(&self, subtotal: Decimal) -> OrderAmounts {
        self.config.charges.quote(subtotal)
    }

    pub fn metrics(&self) -> &OrderMetrics {
        &self.metrics
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}
