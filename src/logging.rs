//! Tracing subscriber setup for binaries embedding this crate

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initializes the global subscriber with an env-driven filter.
/// `RUST_LOG` takes precedence over `default_filter`. Call once at startup.
pub fn init(default_filter: &str) {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// `init` with the crate's usual `info` level.
pub fn init_default() {
    init("info");
}
