use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};

use crate::domain::order::OrderStatus;

// ============================================================================
// Metrics Module - Prometheus metrics for the order engine
// ============================================================================
//
// Covers:
// - order creation (successes and failures by error kind)
// - status transitions (applied by target, rejected by reason)
// - change notification failures
// - storage retries and circuit breaker state
// - per-operation latency
//
// The registry is owned here; the host process decides how to expose it.
// ============================================================================

pub struct OrderMetrics {
    registry: Registry,

    // Lifecycle
    pub orders_created: IntCounter,
    pub order_creation_failures: IntCounterVec,
    pub transitions_applied: IntCounterVec,
    pub transitions_rejected: IntCounterVec,

    // Notification
    pub publish_failures: IntCounterVec,

    // Storage
    pub storage_retries: IntCounterVec,
    pub circuit_breaker_state: IntGauge,

    pub operation_duration: HistogramVec,
}

impl OrderMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let orders_created = IntCounter::new("orders_created_total", "Total orders created")?;
        registry.register(Box::new(orders_created.clone()))?;

        let order_creation_failures = IntCounterVec::new(
            Opts::new("order_creation_failures_total", "Order creations that failed"),
            &["reason"],
        )?;
        registry.register(Box::new(order_creation_failures.clone()))?;

        let transitions_applied = IntCounterVec::new(
            Opts::new("order_transitions_total", "Status transitions committed"),
            &["to_status"],
        )?;
        registry.register(Box::new(transitions_applied.clone()))?;

        let transitions_rejected = IntCounterVec::new(
            Opts::new("order_transitions_rejected_total", "Status transitions rejected"),
            &["reason"],
        )?;
        registry.register(Box::new(transitions_rejected.clone()))?;

        let publish_failures = IntCounterVec::new(
            Opts::new("order_event_publish_failures_total", "Change events that could not be delivered"),
            &["event_type"],
        )?;
        registry.register(Box::new(publish_failures.clone()))?;

        let storage_retries = IntCounterVec::new(
            Opts::new("storage_retry_attempts_total", "Storage calls retried after a transient failure"),
            &["operation"],
        )?;
        registry.register(Box::new(storage_retries.clone()))?;

        let circuit_breaker_state = IntGauge::new(
            "storage_circuit_breaker_state",
            "Storage circuit breaker state (0=Closed, 1=Open, 2=HalfOpen)",
        )?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;

        let operation_duration = HistogramVec::new(
            HistogramOpts::new("order_operation_duration_seconds", "Engine operation latency")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["operation"],
        )?;
        registry.register(Box::new(operation_duration.clone()))?;

        Ok(Self {
            registry,
            orders_created,
            order_creation_failures,
            transitions_applied,
            transitions_rejected,
            publish_failures,
            storage_retries,
            circuit_breaker_state,
            operation_duration,
        })
    }

    /// Get the Prometheus registry so the host can expose it
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_order_created(&self, duration_secs: f64) {
        self.orders_created.inc();
        self.operation_duration
            .with_label_values(&["create_order"])
            .observe(duration_secs);
    }

    pub fn record_creation_failure(&self, reason: &str) {
        self.order_creation_failures.with_label_values(&[reason]).inc();
    }

    pub fn record_transition(&self, to: OrderStatus, duration_secs: f64) {
        self.transitions_applied.with_label_values(&[to.as_str()]).inc();
        self.operation_duration
            .with_label_values(&["advance_status"])
            .observe(duration_secs);
    }

    pub fn record_transition_rejected(&self, reason: &str) {
        self.transitions_rejected.with_label_values(&[reason]).inc();
    }

    pub fn record_publish_failure(&self, event_type: &str) {
        self.publish_failures.with_label_values(&[event_type]).inc();
    }

    pub fn record_storage_retry(&self, operation: &str) {
        self.storage_retries.with_label_values(&[operation]).inc();
    }

    pub fn update_circuit_breaker_state(&self, state: i64) {
        self.circuit_breaker_state.set(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter_value(metrics: &OrderMetrics, name: &str) -> Vec<f64> {
        metrics
            .registry()
            .gather()
            .iter()
            .find(|m| m.name() == name)
            .map(|family| {
                family
                    .metric
                    .iter()
                    .map(|m| m.counter.value.unwrap_or_default())
                    .collect()
            })
            .unwrap_or_default()
    }

    #[test]
    fn test_metrics_creation() {
        let metrics = OrderMetrics::new().unwrap();
        metrics.record_order_created(0.01);
        assert!(!metrics.registry().gather().is_empty());
        assert_eq!(counter_value(&metrics, "orders_created_total"), vec![1.0]);
    }

    #[test]
    fn test_transitions_are_labelled_by_target() {
        let metrics = OrderMetrics::new().unwrap();
        metrics.record_transition(OrderStatus::PickedUp, 0.002);
        metrics.record_transition(OrderStatus::InTransit, 0.002);
        metrics.record_transition(OrderStatus::PickedUp, 0.002);

        let mut values = counter_value(&metrics, "order_transitions_total");
        values.sort_by(|a, b| a.total_cmp(b));
        assert_eq!(values, vec![1.0, 2.0]);
    }

    #[test]
    fn test_circuit_breaker_gauge() {
        let metrics = OrderMetrics::new().unwrap();
        metrics.update_circuit_breaker_state(1);
        assert_eq!(metrics.circuit_breaker_state.get(), 1);
    }
}
