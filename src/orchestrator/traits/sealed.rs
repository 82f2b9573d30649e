// ABOUTME: Sealed trait pattern for orchestrator traits.
// ABOUTME: Only adapters defined in this crate may implement the adapter and capability traits.

/// Sealed trait to prevent external implementations.
///
/// New operations can be added to the adapter traits without breaking
/// downstream code, because only crate-internal adapters implement them.
pub trait Sealed {}
