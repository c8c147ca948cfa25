use std::sync::Once;

use tracing::info;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Installs the `RUST_LOG`-filtered subscriber once (default `info`).
pub fn init(role: &str) {
    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .init();
    });

    info!(role, "telemetry initialized");
}
