use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::prelude::*;

/// `RUST_LOG` wins when set; otherwise log at `INFO` rather than `ERROR`.
pub fn default_env_filter() -> EnvFilter {
    if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .parse_lossy("")
    }
}

/// Logs go to stderr so that measurement output on stdout stays clean.
pub fn setup_logging() {
    let fmt = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .compact()
        .with_target(false);
    // a second call, e.g. from tests, keeps the first subscriber
    let _ = tracing_subscriber::registry()
        .with(fmt)
        .with(default_env_filter())
        .try_init();
}
