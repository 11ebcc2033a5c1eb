use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use super::{OrderRepository, RepositoryError};
use crate::config::StorageConfig;
use crate::domain::order::{Order, OrderScope, StatusTransition};
use crate::metrics::OrderMetrics;
use crate::utils::{retry_on_transient, CircuitBreaker, CircuitBreakerError, RetryConfig};

// ============================================================================
// Resilient Repository - timeout, retry and circuit breaker around storage
// ============================================================================
//
// Each attempt runs under a timeout inside the circuit breaker; the retry
// loop sits outside both, so an open circuit ends retries immediately.
//
// A write that times out may still have committed. Retrying it then fails
// with `DuplicateOrderNumber` or `VersionConflict`. The factory and the
// transition engine re-read on those errors and recognise their own commit
// by order id or history entry id.
//
// ============================================================================

pub struct ResilientRepository<R> {
    inner: R,
    retry: RetryConfig,
    breaker: CircuitBreaker,
    timeout: Duration,
    metrics: Option<Arc<OrderMetrics>>,
}

impl<R: OrderRepository> ResilientRepository<R> {
    pub fn new(inner: R, config: &StorageConfig) -> Self {
        Self {
            inner,
            retry: config.retry.clone(),
            breaker: CircuitBreaker::new(config.circuit_breaker.clone()),
            timeout: config.timeout(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<OrderMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    async fn guarded<T, F, Fut>(&self, operation: &'static str, mut call: F) -> Result<T, RepositoryError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, RepositoryError>> + Send,
        T: Send,
    {
        let breaker = &self.breaker;
        let timeout = self.timeout;
        let metrics = self.metrics.as_deref();

        let result = retry_on_transient(&self.retry, operation, |attempt| {
            if attempt > 1 {
                if let Some(metrics) = metrics {
                    metrics.record_storage_retry(operation);
                }
            }

            let pending = call();
            async move {
                let bounded = async move {
                    match tokio::time::timeout(timeout, pending).await {
                        Ok(result) => result,
                        Err(_) => Err(RepositoryError::Timeout(timeout.as_millis() as u64)),
                    }
                };

                match breaker.call(bounded).await {
                    Ok(value) => Ok(value),
                    Err(CircuitBreakerError::CircuitOpen) => Err(RepositoryError::CircuitOpen),
                    Err(CircuitBreakerError::OperationFailed(err)) => Err(err),
                }
            }
        })
        .await;

        if let Some(metrics) = metrics {
            metrics.update_circuit_breaker_state(self.breaker.state().await.code());
        }

        if let Err(err) = &result {
            tracing::debug!(operation, error = %err, "Storage call failed");
        }
        result
    }
}

#[async_trait]
impl<R: OrderRepository> OrderRepository for ResilientRepository<R> {
    async fn insert_order(&self, order: &Order) -> Result<(), RepositoryError> {
        self.guarded("insert_order", || self.inner.insert_order(order)).await
    }

    async fn apply_transition(&self, transition: &StatusTransition) -> Result<(), RepositoryError> {
        self.guarded("apply_transition", || self.inner.apply_transition(transition))
            .await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>, RepositoryError> {
        self.guarded("find_by_id", || self.inner.find_by_id(id)).await
    }

    async fn find_by_order_number(&self, order_number: &str) -> Result<Option<Order>, RepositoryError> {
        self.guarded("find_by_order_number", || {
            self.inner.find_by_order_number(order_number)
        })
        .await
    }

    async fn list(&self, scope: OrderScope) -> Result<Vec<Order>, RepositoryError> {
        self.guarded("list", || self.inner.list(scope)).await
    }
}
