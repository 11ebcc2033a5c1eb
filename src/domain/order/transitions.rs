use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use crate::messaging::ChangeNotifier;
use crate::metrics::OrderMetrics;
use crate::persistence::{OrderRepository, RepositoryError};

use super::aggregate::{Order, StatusTransition};
use super::commands::AdvanceStatus;
use super::errors::OrderError;
use super::events::OrderChangeEvent;

// ============================================================================
// Status Transition Engine
// ============================================================================
//
// Load → plan (one step forward, delivery code on the last step) →
// conditional write on (version, status) → OrderStatusChanged.
//
// Two writers racing on the same order both plan against the same version;
// the storage condition lets exactly one of them commit. A conflict whose
// stored history already holds our own entry means an earlier timed-out
// attempt won, and is reported as success.
//
// ============================================================================

pub struct StatusTransitionEngine {
    repository: Arc<dyn OrderRepository>,
    notifier: Arc<dyn ChangeNotifier>,
    metrics: Arc<OrderMetrics>,
}

impl StatusTransitionEngine {
    pub fn new(
        repository: Arc<dyn OrderRepository>,
        notifier: Arc<dyn ChangeNotifier>,
        metrics: Arc<OrderMetrics>,
    ) -> Self {
        Self {
            repository,
            notifier,
            metrics,
        }
    }

    pub async fn advance_status(&self, request: AdvanceStatus) -> Result<Order, OrderError> {
        let started = Instant::now();
        let order_id = request.order_id;

        let mut order = self
            .repository
            .find_by_id(order_id)
            .await
            .map_err(|err| OrderError::from_repository(order_id, err))?
            .ok_or_else(|| OrderError::NotFound(order_id.to_string()))?;

        let transition = order
            .plan_transition(&request, Utc::now())
            .map_err(|err| self.rejected(&request, err))?;

        if let Err(err) = self.repository.apply_transition(&transition).await {
            if !self.committed_earlier(&transition, &err).await {
                return Err(self.rejected(&request, OrderError::from_repository(order_id, err)));
            }
            tracing::info!(
                order_id = %order_id,
                to = %transition.to,
                "Earlier transition attempt had committed"
            );
        }

        order.apply(&transition);

        tracing::info!(
            order_id = %order.id,
            order_number = %order.order_number,
            from = %transition.from,
            to = %transition.to,
            version = order.version,
            actor_id = %request.actor_id,
            "Order status advanced"
        );
        self.metrics
            .record_transition(transition.to, started.elapsed().as_secs_f64());

        let event = OrderChangeEvent::status_changed(&order, transition.from);
        if let Err(err) = self.notifier.publish(event).await {
            tracing::warn!(order_id = %order.id, error = %err, "Failed to publish OrderStatusChanged");
            self.metrics.record_publish_failure("OrderStatusChanged");
        }

        Ok(order)
    }

    /// A version conflict caused by our own timed-out attempt leaves this
    /// transition's history entry in storage.
    async fn committed_earlier(&self, transition: &StatusTransition, err: &RepositoryError) -> bool {
        if !matches!(err, RepositoryError::VersionConflict { .. }) {
            return false;
        }

        match self.repository.find_by_id(transition.order_id).await {
            Ok(Some(stored)) => stored
                .history
                .iter()
                .any(|entry| entry.id == transition.entry.id),
            Ok(None) => false,
            Err(lookup) => {
                tracing::warn!(
                    order_id = %transition.order_id,
                    error = %lookup,
                    "Could not re-read order after conflict"
                );
                false
            }
        }
    }

    fn rejected(&self, request: &AdvanceStatus, err: OrderError) -> OrderError {
        let reason = match &err {
            OrderError::Conflict { reason, .. } => reason.label(),
            other => other.kind(),
        };

        tracing::warn!(
            order_id = %request.order_id,
            target = %request.target_status,
            actor_id = %request.actor_id,
            reason,
            error = %err,
            "Status transition rejected"
        );
        self.metrics.record_transition_rejected(reason);
        err
    }
}
