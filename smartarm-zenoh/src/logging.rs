use tracing_subscriber::{fmt, prelude::*, EnvFilter, Registry};

/// Install the global subscriber
///
/// `RUST_LOG` takes precedence over `verbosity`.
pub fn setup_tracing(verbosity: u8, json: bool) {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},zenoh=warn", level)));

    let registry = Registry::default().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().with_target(false)).init();
    }
}
