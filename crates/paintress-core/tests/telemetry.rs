//! Runs in its own process: `init_tracing` installs the process-global
//! subscriber, which would race `tracing-test` inside the lib unit tests.

use paintress_core::telemetry::init_tracing;
use tracing::Level;

#[test]
fn test_init_twice_is_harmless() {
    init_tracing(false, Level::WARN);
    init_tracing(true, Level::DEBUG);
    tracing::info!("still logging");
}
