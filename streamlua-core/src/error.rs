//! Error types raised while bootstrapping a worker.
//!
//! Every stage of the bootstrap reports a typed error; the host only cares
//! whether [`BootstrapError`] was returned, but the variants keep enough
//! structure for logs and tests to tell the stages apart.

use std::path::PathBuf;

use thiserror::Error;

use crate::bootstrap::Stage;

/// Pool accounting failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PoolError {
    /// The pool limit would be exceeded.
    #[error("pool '{pool}' exhausted: requested {requested} bytes, {available} available")]
    Exhausted {
        /// Pool label.
        pool: String,
        /// Bytes requested by the failed allocation.
        requested: usize,
        /// Bytes still available when the request was refused.
        available: usize,
    },
}

/// Failures reported by a module's configuration hooks.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfError {
    /// The configuration object could not be allocated.
    #[error(transparent)]
    Alloc(#[from] PoolError),

    /// The merge step rejected the configuration.
    #[error("{0}")]
    Invalid(String),
}

/// Script load and call failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScriptError {
    /// The chunk could not be loaded (syntax error or unreadable file).
    #[error("failed to load {label}: {message}")]
    Load {
        /// Hook source label (`init_worker_by_lua` or `init_worker_by_lua_file`).
        label: &'static str,
        /// Engine message.
        message: String,
    },

    /// The chunk raised an error while running.
    #[error("failed to run {label}: {message}")]
    Runtime {
        /// Hook source label.
        label: &'static str,
        /// Engine message.
        message: String,
    },

    /// The engine itself could not be set up.
    #[error("script engine error: {0}")]
    Engine(String),
}

impl ScriptError {
    /// Label of the hook form that failed, if any.
    pub fn label(&self) -> Option<&'static str> {
        match self {
            Self::Load { label, .. } | Self::Runtime { label, .. } => Some(label),
            Self::Engine(_) => None,
        }
    }
}

/// Worker configuration problems.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read configuration {path:?}: {source}")]
    Read {
        /// Path that was read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON for [`crate::config::WorkerConfig`].
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// A worker table could not be filled.
    #[error("failed to allocate worker tables: {0}")]
    Alloc(#[from] PoolError),

    /// Both hook directives were configured.
    #[error("\"init_worker_by_lua\" and \"init_worker_by_lua_file\" are mutually exclusive")]
    DuplicateHook,

    /// A module required by the worker is not registered.
    #[error("module '{0}' is not registered")]
    MissingModule(&'static str),

    /// The script engine could not be created.
    #[error(transparent)]
    Script(#[from] ScriptError),
}

/// Errors surfaced by [`crate::bootstrap::init_worker`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BootstrapError {
    /// The duplicate cycle or the configuration slot table could not be allocated.
    #[error("failed to build duplicate cycle: {0}")]
    Cycle(#[source] PoolError),

    /// A module's server configuration constructor failed.
    #[error("failed to create server configuration for module '{module}': {source}")]
    CreateConf {
        /// Module name.
        module: String,
        /// Constructor failure.
        #[source]
        source: ConfError,
    },

    /// A module's merge step failed.
    #[error("failed to merge server configuration for module '{module}': {source}")]
    MergeConf {
        /// Module name.
        module: String,
        /// Merge failure.
        #[source]
        source: ConfError,
    },

    /// The placeholder connection could not be created.
    #[error("failed to create fake connection: {0}")]
    Connection(#[source] PoolError),

    /// The placeholder session could not be created.
    #[error("failed to create fake session: {0}")]
    Session(#[source] PoolError),

    /// The script execution context could not be created.
    #[error("failed to create lua context: {0}")]
    Context(#[source] PoolError),

    /// A module configuration expected on the session is missing.
    #[error("server configuration of module '{0}' missing from session")]
    MissingConf(&'static str),

    /// The worker-init hook failed to load or run.
    #[error(transparent)]
    Hook(#[from] ScriptError),
}

impl BootstrapError {
    /// Stage that produced this error.
    pub fn stage(&self) -> Stage {
        match self {
            Self::Cycle(_) => Stage::BuildingCycle,
            Self::CreateConf { .. } | Self::MergeConf { .. } => Stage::ReplicatingModules,
            Self::Connection(_) | Self::Session(_) | Self::Context(_) | Self::MissingConf(_) => {
                Stage::SynthesizingContext
            }
            Self::Hook(_) => Stage::InvokingHook,
        }
    }
}
