use tracing_subscriber::{fmt, EnvFilter};

/// Install the global fmt subscriber.
///
/// `RUST_LOG` overrides the default filter, which is `info` for everything and `debug` for
/// this crate's harness.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,edmd_analysis::harness=debug"));

    fmt().with_env_filter(filter).with_target(false).init();
}
