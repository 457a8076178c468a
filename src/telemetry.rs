//! Structured logging bootstrap via `tracing-subscriber`'s env-filter,
//! defaulting to `info` so a bare `RUST_LOG` is optional in production.

use tracing_subscriber::{EnvFilter, FmtSubscriber};

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        // Already initialized (e.g. from a test harness) — not an error.
    }
}
