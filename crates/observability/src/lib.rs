//! Process-wide logging setup shared by every ticketeer binary and test harness.

/// Initialize tracing from the environment.
///
/// Safe to call multiple times; once a subscriber is installed later calls do nothing.
pub fn init() {
    tracing::init();
}

/// Subscriber configuration (filter, output format).
pub mod tracing;

pub use self::tracing::{LogConfig, LogFormat, ObservabilityError};
