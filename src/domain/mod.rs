// ============================================================================
// Domain Layer - Business Logic
// ============================================================================
//
// Storage and notification are reached only through the traits in
// `persistence` and `messaging`.
//
// ============================================================================

pub mod order;
