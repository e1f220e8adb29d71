use shardline_core::Timestamp;

/// Port for time abstraction
///
/// Stores read the time through this trait so that counter expiry and claim
/// TTLs can be driven by:
/// - Real system time for production
/// - Tokio's (pausable) instant for single-process deployments and tests
/// - A manually advanced time for deterministic tests
pub trait Clock: Send + Sync {
    /// Get the current time according to this clock
    fn now(&self) -> Timestamp;

    /// Get the clock's name/identifier for debugging
    fn name(&self) -> &str {
        "Clock"
    }
}
