// ============================================================================
// Order Lifecycle & Fulfillment Tracking Engine
// ============================================================================
//
// Creates marketplace orders, moves them one step at a time through
// confirmed → picked_up → in_transit → out_for_delivery → delivered, keeps an
// append-only audit trail of every step, and tells live observers which
// orders changed.
//
// ============================================================================

pub mod config;
pub mod domain;
pub mod engine;
pub mod identifiers;
pub mod messaging;
pub mod metrics;
pub mod persistence;
pub mod utils;

pub use config::{ConfigError, EngineConfig, StorageConfig};
pub use domain::order::{
    Actor, AdvanceStatus, ChargePolicy, ConflictReason, NewOrder, NewOrderItem, Order, OrderAmounts,
    OrderChangeEvent, OrderError, OrderItem, OrderRef, OrderScope, OrderStatus, Role,
    StatusHistoryEntry, ValidationError,
};
pub use engine::{EngineError, OrderEngine};
pub use identifiers::{IdentifierGenerator, RandomIdentifierGenerator};
pub use messaging::{
    BroadcastNotifier, ChangeNotifier, EventFilter, FanoutNotifier, NotifyError, Subscription,
};
pub use metrics::OrderMetrics;
pub use persistence::{
    InMemoryOrderRepository, OrderRepository, PgOrderRepository, RepositoryError, ResilientRepository,
};
