//! Worker State and Its Disposable Duplicate
//!
//! [`WorkerState`] is the long-lived, process-wide state of a worker: its
//! module registry, the finalized stream configuration and the tables that
//! configuration modules are allowed to extend while merging (listening
//! sockets, paths, open files, shared memory zones).
//!
//! Merge logic belongs to arbitrary modules and is not vetted for purity, so
//! the worker-init bootstrap never hands it the live tables.  Instead it
//! builds a [`DuplicateCycle`]: a structural copy whose tables are sized like
//! the originals and charged against the worker's permanent pool.  Whatever
//! a module pushes while merging lands in the duplicate.
//!
//! # Pattern: Shared Base, Private Overlay
//! ```text
//! WorkerState ──(read)──▶ DuplicateCycle ◀──(write)── merge_srv_conf
//!      │                        │
//!      └── pool ◀──(charged)────┘   never refunded during bootstrap
//! ```

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::engine::pool::Pool;
use crate::engine::table::Table;
use crate::error::PoolError;
use crate::module::{ConfSlots, ModuleRegistry};
use crate::session::log::ErrorLog;

/// A configured listening socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListeningSocket {
    /// `host:port` the socket is bound to.
    pub addr: String,
    /// Accept backlog.
    #[serde(default = "default_backlog")]
    pub backlog: u32,
}

fn default_backlog() -> u32 {
    511
}

/// A directory the worker manages (temp paths and the like).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathEntry {
    /// Directory name.
    pub name: PathBuf,
    /// Hashed subdirectory levels.
    #[serde(default)]
    pub levels: Vec<u8>,
}

/// A file kept open for the lifetime of the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenFile {
    /// File path.
    pub name: PathBuf,
    /// Descriptor, once opened.
    #[serde(default)]
    pub fd: Option<i32>,
}

/// A shared memory zone declared by a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShmZone {
    /// Zone name.
    pub name: String,
    /// Zone size in bytes.
    pub size: usize,
    /// Owning module.
    #[serde(default)]
    pub tag: String,
}

/// Finalized configuration of the top-level stream block.
#[derive(Debug)]
pub struct StreamConf {
    /// Main-level configuration, shared by reference with every derived context.
    pub main_conf: Arc<ConfSlots>,
    /// Server-level configuration of the top-level block.
    pub srv_conf: ConfSlots,
}

/// Process-wide worker state.
#[derive(Debug)]
pub struct WorkerState {
    /// The worker's long-lived pool.
    pub pool: Pool,
    /// Path of the configuration file the worker was started from.
    pub conf_file: PathBuf,
    /// The worker's default error log.
    pub new_log: ErrorLog,
    /// Registered modules, in load order.
    pub modules: ModuleRegistry,
    /// Listening sockets.
    pub listening: Table<ListeningSocket>,
    /// Managed paths.
    pub paths: Table<PathEntry>,
    /// Open files.
    pub open_files: Table<OpenFile>,
    /// Shared memory zones.
    pub shared_memory: Table<ShmZone>,
    /// Ids of idle connections that may be reclaimed.
    pub reusable_connections: VecDeque<u64>,
    /// Finalized stream configuration, absent when no stream block exists.
    pub stream: Option<StreamConf>,
}

impl WorkerState {
    /// Create an empty worker state around `pool`.
    pub fn new(pool: Pool, conf_file: impl Into<PathBuf>, new_log: ErrorLog, modules: ModuleRegistry) -> Self {
        Self {
            pool,
            conf_file: conf_file.into(),
            new_log,
            modules,
            listening: Table::default(),
            paths: Table::default(),
            open_files: Table::default(),
            shared_memory: Table::default(),
            reusable_connections: VecDeque::new(),
            stream: None,
        }
    }
}

/// Disposable copy of the worker tables handed to configuration modules.
#[derive(Debug, Clone)]
pub struct DuplicateCycle {
    /// Configuration file name, as seen by modules.
    pub conf_file: PathBuf,
    /// Copy of the worker's default error log.
    pub new_log: ErrorLog,
    /// Empty, sized like the worker's listening table.
    pub listening: Table<ListeningSocket>,
    /// Empty, sized like the worker's path table.
    pub paths: Table<PathEntry>,
    /// Element-wise copy of the worker's open files.
    pub open_files: Table<OpenFile>,
    /// Empty, sized like the worker's shared memory table.
    pub shared_memory: Table<ShmZone>,
    /// Always starts empty.
    pub reusable_connections: VecDeque<u64>,
}

impl DuplicateCycle {
    /// Build the duplicate, charging every table to the worker's pool.
    ///
    /// Each table gets at least one slot so empty originals still yield a
    /// usable table.
    pub fn build(state: &mut WorkerState) -> Result<Self, PoolError> {
        debug!(
            listening = state.listening.len(),
            paths = state.paths.len(),
            open_files = state.open_files.len(),
            shared_memory = state.shared_memory.len(),
            "Duplicating worker cycle"
        );

        let listening = Table::init(&mut state.pool, state.listening.len().max(1))?;
        let paths = Table::init(&mut state.pool, state.paths.len().max(1))?;
        let open_files = state.open_files.duplicate(&mut state.pool)?;
        let shared_memory = Table::init(&mut state.pool, state.shared_memory.len().max(1))?;

        info!(pool = %state.pool.name(), "Duplicate cycle built");
        Ok(Self {
            conf_file: state.conf_file.clone(),
            new_log: state.new_log.clone(),
            listening,
            paths,
            open_files,
            shared_memory,
            reusable_connections: VecDeque::new(),
        })
    }
}
