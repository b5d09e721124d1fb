//! StreamLua Core - Worker-Init Bootstrap for Embedded Lua
//!
//! Runs a user-supplied Lua hook once per worker process, before any client
//! connection is accepted, inside a context that looks like a real stream
//! session to every configuration module and to the script itself.
//!
//! # Layout:
//! - [`engine`]: pools, pool-charged tables, worker state and its duplicate
//! - [`module`]: module registry, built-in modules, server config replication
//! - [`session`]: placeholder connection and session, connection logging
//! - [`lua`]: script engine, `ngx` API, hook invoker
//! - [`bootstrap`]: the orchestrator

pub mod bootstrap;
pub mod config;
pub mod engine;
pub mod error;
pub mod lua;
pub mod module;
pub mod session;

pub use bootstrap::{init_worker, init_worker_with, BootstrapOptions, BootstrapReporter, Stage, TracingReporter};
pub use config::WorkerConfig;
pub use engine::{DuplicateCycle, Pool, WorkerState};
pub use error::{BootstrapError, ConfigError};
pub use lua::ScriptEngine;

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter.
pub const LOG_ENV: &str = "STREAMLUA_LOG";

/// Install the global `tracing` subscriber.
///
/// The filter is read from `STREAMLUA_LOG` and defaults to `info`.
pub fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;

    info!("Initializing StreamLua worker v{}", env!("CARGO_PKG_VERSION"));
    Ok(())
}

/// Load the configuration at `path`, build the worker and run the
/// worker-init hook.
pub async fn start_worker(path: impl AsRef<Path>) -> Result<WorkerState> {
    let path = path.as_ref();
    let config = WorkerConfig::load(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))?;
    let mut state = WorkerState::from_config(path, &config).context("failed to build worker state")?;

    init_worker_with(&mut state, &config.bootstrap_options(), &TracingReporter)
        .context("worker-init bootstrap failed")?;
    info!(conf_file = %path.display(), "Worker initialized");
    Ok(state)
}
