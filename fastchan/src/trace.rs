//! Logging shim.
//!
//! Enable with `--features tracing`. Without the feature every macro below
//! expands to nothing, so the queue hot paths carry no logging cost.

/// Installs a `tracing-subscriber` fmt layer filtered by `RUST_LOG`
/// (default `fastchan=trace`).
///
/// Intended for tests and benchmark binaries. Calling it twice is harmless;
/// the second install attempt is ignored.
#[cfg(feature = "tracing")]
pub fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("fastchan=trace"));

    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_timer(fmt::time::uptime()),
        )
        .with(filter)
        .try_init();
}

/// Stand-in for the subscriber installer when logging is compiled out.
///
/// Keeps `init_tracing()` callable from tests and benches in every build;
/// there is nothing to install, so it returns at once.
#[cfg(not(feature = "tracing"))]
pub const fn init_tracing() {}

#[cfg(feature = "tracing")]
pub(crate) use tracing::{debug, trace};

// Swallows its arguments; every log call site expands to nothing.
#[cfg(not(feature = "tracing"))]
macro_rules! discard {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
pub(crate) use discard as debug;
#[cfg(not(feature = "tracing"))]
pub(crate) use discard as trace;
