//! Worker Configuration
//!
//! The worker is configured from a JSON document.  Everything is optional;
//! an empty object yields a worker with the built-in modules, an empty
//! set of tables and no Lua hook.
//!
//! ```json
//! {
//!   "error_log": { "file": "logs/error.log", "level": "warn" },
//!   "listen": [{ "addr": "0.0.0.0:1935" }],
//!   "lua": {
//!     "init_worker_by_lua_file": "lua/init_worker.lua",
//!     "resolver": { "addresses": ["127.0.0.53"] },
//!     "lua_socket_log_errors": false
//!   }
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::bootstrap::BootstrapOptions;
use crate::engine::cycle::{ListeningSocket, OpenFile, PathEntry, ShmZone, StreamConf, WorkerState};
use crate::engine::pool::{Pool, FAKE_CONNECTION_POOL_SIZE, TEMP_POOL_SIZE};
use crate::error::ConfigError;
use crate::lua::hook::InitWorkerHook;
use crate::lua::ScriptEngine;
use crate::module::core_conf::CoreSrvConf;
use crate::module::lua_conf::{LuaMainConf, LuaSrvConf, Resolver};
use crate::module::{ConfSlots, ModuleRegistry, CORE_MODULE, LUA_MODULE};
use crate::session::log::ErrorLog;

/// Pool budgets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Limit of the worker's long-lived pool; unbounded when absent.
    pub cycle_pool_size: Option<usize>,
    /// Budget of the worker-init temporary pool.
    pub temp_pool_size: usize,
    /// Budget of the worker-init placeholder connection pool.
    pub connection_pool_size: Option<usize>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            cycle_pool_size: None,
            temp_pool_size: TEMP_POOL_SIZE,
            connection_pool_size: Some(FAKE_CONNECTION_POOL_SIZE),
        }
    }
}

/// The `lua` block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LuaConfig {
    /// Inline worker-init hook.
    pub init_worker_by_lua: Option<String>,
    /// Worker-init hook file; relative paths are resolved against the
    /// configuration file's directory.
    pub init_worker_by_lua_file: Option<PathBuf>,
    /// Resolver used by cosockets.
    pub resolver: Option<Resolver>,
    /// Log cosocket errors.
    pub lua_socket_log_errors: Option<bool>,
}

/// Worker configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Default error log.
    pub error_log: ErrorLog,
    /// Listening sockets.
    pub listen: Vec<ListeningSocket>,
    /// Managed paths.
    pub paths: Vec<PathEntry>,
    /// Files kept open by the worker.
    pub open_files: Vec<OpenFile>,
    /// Shared memory zones.
    pub shared_memory: Vec<ShmZone>,
    /// Pool budgets.
    pub pools: PoolConfig,
    /// Lua settings; Lua is disabled without this block.
    pub lua: Option<LuaConfig>,
}

impl WorkerConfig {
    /// Read and validate the configuration file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json(&raw)?;
        info!(path = %path.display(), lua = config.lua.is_some(), "Loaded worker configuration");
        Ok(config)
    }

    /// Parse and validate a configuration document.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject contradictory settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(lua) = &self.lua {
            if lua.init_worker_by_lua.is_some() && lua.init_worker_by_lua_file.is_some() {
                return Err(ConfigError::DuplicateHook);
            }
        }
        Ok(())
    }

    /// The configured worker-init hook.
    ///
    /// A relative hook file is resolved against `base_dir` when given.
    pub fn hook(&self, base_dir: Option<&Path>) -> Option<InitWorkerHook> {
        let lua = self.lua.as_ref()?;
        if let Some(src) = &lua.init_worker_by_lua {
            return Some(InitWorkerHook::Inline(src.clone()));
        }
        let file = lua.init_worker_by_lua_file.as_ref()?;
        let path = match base_dir {
            Some(dir) if file.is_relative() => dir.join(file),
            _ => file.clone(),
        };
        Some(InitWorkerHook::File(path))
    }

    /// Bootstrap options derived from the pool budgets.
    pub fn bootstrap_options(&self) -> BootstrapOptions {
        BootstrapOptions {
            temp_pool_size: self.pools.temp_pool_size,
            connection_pool_size: self.pools.connection_pool_size,
        }
    }
}

impl WorkerState {
    /// Build the worker state described by `config`, loaded from `conf_file`.
    ///
    /// Registers the built-in modules, fills the worker tables, creates the
    /// script engine when a `lua` block exists and finalizes the top-level
    /// stream configuration.
    pub fn from_config(conf_file: impl AsRef<Path>, config: &WorkerConfig) -> Result<Self, ConfigError> {
        let conf_file = conf_file.as_ref();
        config.validate()?;

        let pool = match config.pools.cycle_pool_size {
            Some(limit) => Pool::with_limit("cycle", limit),
            None => Pool::new("cycle"),
        };
        let modules = ModuleRegistry::with_builtin();
        let lua_index = modules
            .ctx_index(LUA_MODULE)
            .ok_or(ConfigError::MissingModule(LUA_MODULE))?;
        let core_index = modules
            .ctx_index(CORE_MODULE)
            .ok_or(ConfigError::MissingModule(CORE_MODULE))?;
        let slots = modules.max_stream_index();

        let mut state = WorkerState::new(pool, conf_file, config.error_log.clone(), modules);
        for socket in &config.listen {
            state.listening.push(&mut state.pool, socket.clone())?;
        }
        for path in &config.paths {
            state.paths.push(&mut state.pool, path.clone())?;
        }
        for file in &config.open_files {
            state.open_files.push(&mut state.pool, file.clone())?;
        }
        for zone in &config.shared_memory {
            state.shared_memory.push(&mut state.pool, zone.clone())?;
        }

        let lua = match &config.lua {
            Some(_) => Some(ScriptEngine::new()?),
            None => None,
        };
        let mut main_conf = ConfSlots::alloc(&mut state.pool, slots)?;
        main_conf.set(
            lua_index,
            Box::new(LuaMainConf {
                lua,
                init_worker: config.hook(conf_file.parent()),
            }),
        );

        let lua_block = config.lua.clone().unwrap_or_default();
        let mut srv_conf = ConfSlots::alloc(&mut state.pool, slots)?;
        srv_conf.set(
            lua_index,
            Box::new(LuaSrvConf {
                resolver: lua_block.resolver.map(Arc::new),
                log_socket_errors: lua_block.lua_socket_log_errors,
                ..LuaSrvConf::default()
            }),
        );
        srv_conf.set(
            core_index,
            Box::new(CoreSrvConf {
                error_log: Some(config.error_log.clone()),
                ..CoreSrvConf::default()
            }),
        );

        state.stream = Some(StreamConf {
            main_conf: Arc::new(main_conf),
            srv_conf,
        });
        debug!(
            conf_file = %conf_file.display(),
            listening = state.listening.len(),
            used = state.pool.stats().used,
            "Worker state built"
        );
        Ok(state)
    }
}
