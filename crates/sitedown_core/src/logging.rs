use std::env;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

/// Overrides the log filter, e.g. `SITEDOWN_LOG=sitedown_core=trace`.
pub const LOG_ENV: &str = "SITEDOWN_LOG";

/// Installs a stderr subscriber so log lines never mix with the report on stdout.
pub fn init_logging(verbose: bool) -> Result<()> {
    let filter = build_filter(env::var(LOG_ENV).ok(), verbose)?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .try_init()
        .map_err(|error| anyhow::anyhow!("failed to initialize logging: {error}"))
}

fn build_filter(env_value: Option<String>, verbose: bool) -> Result<EnvFilter> {
    match env_value.as_deref().map(str::trim) {
        Some(directives) if !directives.is_empty() => EnvFilter::try_new(directives)
            .with_context(|| format!("invalid {LOG_ENV} filter: {directives}")),
        _ => Ok(EnvFilter::new(if verbose { "debug" } else { "warn" })),
    }
}
