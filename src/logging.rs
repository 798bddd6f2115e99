//! tracing subscriber setup: fmt layer to stderr, filtered by `BRANCHENV_LOG`.

use std::env;

use once_cell::sync::OnceCell;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

static INIT: OnceCell<()> = OnceCell::new();

pub const LOG_ENV: &str = "BRANCHENV_LOG";

/// Filter directive: `$BRANCHENV_LOG` when set, else `debug` with `verbose`, else `info`.
pub fn default_directive(verbose: bool) -> String {
    match env::var(LOG_ENV) {
        Ok(v) if !v.trim().is_empty() => v,
        _ if verbose => "branchenv=debug,info".to_string(),
        _ => "info".to_string(),
    }
}

/// Install the global subscriber once. Later calls are no-ops.
pub fn init_logging(verbose: bool, use_color: bool) {
    INIT.get_or_init(|| {
        let filter = EnvFilter::try_new(default_directive(verbose))
            .unwrap_or_else(|_| EnvFilter::new("info"));
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(use_color)
            .with_target(verbose);
        // try_init: a test harness or embedding application may already own the global default
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init();
    });
}
