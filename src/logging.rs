//! Tracing subscriber setup for the command-line front end.
//!
//! Logs go to stderr so stdout stays reserved for JSON responses. `RUST_LOG`
//! overrides the level passed on the command line.

use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Directive used when `RUST_LOG` is unset.
pub fn default_directive(level: &str) -> String {
  format!("frontier_alpha={level},warn")
}

/// Install the global subscriber. Fails if one is already set.
pub fn init_logging(level: &str) -> anyhow::Result<()> {
  let env_filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(level)));

  tracing_subscriber::registry()
    .with(env_filter)
    .with(
      fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false),
    )
    .try_init()?;

  tracing::debug!(level, "logging initialized");
  Ok(())
}
