//! Subscriber setup for applications embedding the connector
//!
//! The crate only emits `tracing` events. Binaries and tests that want them
//! printed call [`init_logging`] once at startup.

use tracing_subscriber::EnvFilter;

/// Filter used when neither `RUST_LOG` nor explicit directives are given.
pub const DEFAULT_DIRECTIVES: &str = "ledger_connector=info";

/// Install a formatting subscriber filtered by `directives` (for example
/// `"ledger_connector::commit=debug,warn"`), falling back to `RUST_LOG` and
/// then [`DEFAULT_DIRECTIVES`].
///
/// Returns false if a global subscriber was already installed, in which case
/// nothing changes.
pub fn init_logging(directives: Option<&str>) -> bool {
    let filter = match directives {
        Some(directives) => EnvFilter::new(directives),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES)),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
