//! Sets up a tracing layer that writes to stderr, which the linker passes through to the user.

use crate::error::AlreadyInitialised;
use tracing_subscriber::EnvFilter;

/// Environment variable that, if set, overrides the default filter. It uses the same syntax as
/// `RUST_LOG`.
pub(crate) const LOG_ENV: &str = "LTO_PLUGIN_LOG";

pub(crate) fn init(verbose: bool) -> Result<(), AlreadyInitialised> {
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_filter(filter),
        )
        .try_init()
        .map_err(|_| AlreadyInitialised)
}

fn default_directive(verbose: bool) -> &'static str {
    if verbose { "debug" } else { "warn" }
}
