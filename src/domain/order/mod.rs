// ============================================================================
// Order Domain - Lifecycle and fulfillment tracking
// ============================================================================
//
// - Value objects (OrderStatus, Role, Actor, ChargePolicy)
// - Commands (NewOrder, AdvanceStatus) and their validation
// - Aggregate (Order with its items and status history)
// - Events (OrderChangeEvent)
// - Errors (OrderError, ValidationError, ConflictReason)
// - Services: OrderFactory, StatusTransitionEngine, OrderQueryService
//
// ============================================================================

pub mod value_objects;
pub mod events;
pub mod commands;
pub mod errors;
pub mod aggregate;
pub mod factory;
pub mod transitions;
pub mod queries;

// Re-export for convenience
pub use value_objects::*;
pub use events::*;
pub use commands::*;
pub use errors::*;
pub use aggregate::*;
pub use factory::OrderFactory;
pub use transitions::StatusTransitionEngine;
pub use queries::OrderQueryService;
