//! Tracing subscriber for the loader binary.
//!
//! The subscriber is installed as the scoped default for the run (see
//! [`tracing::subscriber::set_default`]); library code only uses the
//! `tracing` macros and never installs anything itself.

use tracing::Subscriber;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Filter from `RUST_LOG` when set, otherwise `level` for this workspace's
/// crates and `warn` for dependencies.
pub fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives(level)))
}

fn default_directives(level: &str) -> String {
    format!("warn,ida_etl={level},ida_collector={level}")
}

pub fn subscriber(level: &str) -> impl Subscriber + Send + Sync {
    FmtSubscriber::builder()
        .with_env_filter(env_filter(level))
        .with_target(false)
        .finish()
}
