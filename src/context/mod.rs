// ============================================================================
// Ambient Session Context
// ============================================================================
//
// - scope:   explicit execution scope holding at most one ambient session
// - service: init / current / clear and scoped acquisition with release
//
// ============================================================================

pub mod scope;
pub mod service;

pub use scope::{FlowSuppression, Scope};
pub use service::{ContextService, ScopedSession};
