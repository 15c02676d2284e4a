//! Tracing/logging bootstrap for the console client.

use std::env;

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,swoon_console=debug,backend_wp=debug,backend_core=info";

/// Initialize the global tracing subscriber, writing to stderr so log lines
/// stay out of the chat transcript on stdout.
///
/// Precedence:
/// 1) `RUST_LOG`
/// 2) `SWOON_CONSOLE_LOG`
/// 3) `SWOON_LOG`
/// 4) internal default filter
pub fn init() {
    let env_filter = filter_from_env();
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(true)
        .with_env_filter(env_filter)
        .try_init();
}

fn filter_from_env() -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    for key in ["SWOON_CONSOLE_LOG", "SWOON_LOG"] {
        if let Some(value) = env::var(key).ok().filter(|v| !v.trim().is_empty())
            && let Ok(filter) = EnvFilter::try_new(value)
        {
            return filter;
        }
    }

    EnvFilter::new(DEFAULT_FILTER)
}
