// Process-wide tracing setup for the binary.

use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;

static LOGGING_INIT: OnceLock<()> = OnceLock::new();

/// Filter directive for a `--verbose` level: 0=error, 1=warn, 2=info, 3+=debug.
///
/// Debug output is limited to this crate so HTTP internals stay quiet.
pub fn filter_for_verbosity(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "error",
        1 => "warn",
        2 => "info",
        _ => "info,gsharer=debug",
    }
}

/// Installs a stderr subscriber (if one is not already active).
///
/// `RUST_LOG` wins over `verbosity` when it is set. Calling this more than
/// once is harmless.
pub fn init_logging(verbosity: u8) {
    if LOGGING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_for_verbosity(verbosity)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(verbosity >= 3)
        .try_init();

    let _ = LOGGING_INIT.set(());
}
