//! Tracing subscriber bootstrap.

use tracing_subscriber::EnvFilter;

pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("crowdmon=info,warn")),
        )
        .compact()
        .init();
}
