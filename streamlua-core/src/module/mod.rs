//! Module Registry - Configuration-Owning Subsystems
//!
//! Every subsystem that contributes server-level settings registers a
//! [`Module`] here.  Stream modules receive a stable `ctx_index` in
//! registration order; that index addresses the module's slot in every
//! [`ConfSlots`] table (main-level and server-level alike).
//!
//! Configuration objects are type-erased ([`ConfObject`]) because the
//! registry is open to third-party modules.  Each module downcasts its own
//! objects back to the concrete type.
//!
//! # Pattern: Optional Hooks
//! A module may register a constructor, a merge step, both, or neither:
//! ```rust,no_run
//! # use streamlua_core::module::{Module, ModuleRegistry};
//! let mut registry = ModuleRegistry::new();
//! registry.register(
//!     Module::stream("stream_limit").with_create_srv_conf(|cf| Ok(cf.temp_pool.alloc(0u32)?)),
//! );
//! ```

pub mod core_conf;
pub mod lua_conf;
pub mod replicate;

use std::any::Any;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::engine::cycle::DuplicateCycle;
use crate::engine::pool::Pool;
use crate::error::{ConfError, PoolError};

pub use replicate::replicate_srv_conf;

/// Name of the core stream settings module.
pub const CORE_MODULE: &str = "stream_core";

/// Name of the Lua scripting module.
pub const LUA_MODULE: &str = "stream_lua";

/// Name of the process-level module that owns the stream block.
pub const STREAM_MODULE: &str = "stream";

/// A type-erased configuration object.
pub type ConfObject = Box<dyn Any>;

/// Server configuration constructor.
pub type CreateSrvConf = Box<dyn Fn(&mut ConfContext<'_>) -> Result<ConfObject, ConfError>>;

/// Server configuration merge step: `(cf, prev, cur)`.
pub type MergeSrvConf =
    Box<dyn Fn(&mut ConfContext<'_>, &mut dyn Any, &mut dyn Any) -> Result<(), ConfError>>;

/// Table of configuration objects indexed by module `ctx_index`.
#[derive(Default)]
pub struct ConfSlots {
    slots: Vec<Option<ConfObject>>,
}

impl ConfSlots {
    /// Create a table with `len` empty slots.
    pub fn new(len: usize) -> Self {
        let mut slots = Vec::with_capacity(len);
        slots.resize_with(len, || None);
        Self { slots }
    }

    /// Create a table with `len` empty slots, charging the slot array to `pool`.
    pub fn alloc(pool: &mut Pool, len: usize) -> Result<Self, PoolError> {
        pool.reserve(len.saturating_mul(std::mem::size_of::<Option<ConfObject>>()))?;
        Ok(Self::new(len))
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` when the table has no slots.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Store `conf` at `index`, growing the table if needed.
    pub fn set(&mut self, index: usize, conf: ConfObject) {
        if index >= self.slots.len() {
            self.slots.resize_with(index + 1, || None);
        }
        self.slots[index] = Some(conf);
    }

    /// Returns `true` when slot `index` holds an object.
    pub fn is_set(&self, index: usize) -> bool {
        matches!(self.slots.get(index), Some(Some(_)))
    }

    /// Typed view of slot `index`.
    pub fn get<T: 'static>(&self, index: usize) -> Option<&T> {
        self.slots.get(index)?.as_ref()?.downcast_ref::<T>()
    }

    /// Mutable typed view of slot `index`.
    pub fn get_mut<T: 'static>(&mut self, index: usize) -> Option<&mut T> {
        self.slots.get_mut(index)?.as_mut()?.downcast_mut::<T>()
    }
}

impl fmt::Debug for ConfSlots {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let filled: Vec<usize> = (0..self.slots.len()).filter(|&i| self.is_set(i)).collect();
        f.debug_struct("ConfSlots")
            .field("len", &self.slots.len())
            .field("filled", &filled)
            .finish()
    }
}

/// Location reported to modules as the origin of the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfFile {
    /// Configuration file name.
    pub name: PathBuf,
    /// Line being parsed; always 0 outside the parser.
    pub line: usize,
}

/// What a module sees while its server configuration is built.
pub struct ConfContext<'a> {
    /// The worker's long-lived pool.
    pub pool: &'a mut Pool,
    /// Scratch pool, destroyed once every module has been processed.
    pub temp_pool: &'a mut Pool,
    /// Tables a module may extend while merging.
    pub cycle: &'a mut DuplicateCycle,
    /// Finalized main-level configuration.
    pub main_conf: &'a Arc<ConfSlots>,
    /// Origin reported in diagnostics.
    pub conf_file: ConfFile,
}

/// Kind of a registered module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    /// Process-level module; never receives a stream `ctx_index`.
    Core,
    /// Stream module with server-level configuration slots.
    Stream,
}

/// A registered configuration-owning subsystem.
pub struct Module {
    name: String,
    kind: ModuleKind,
    ctx_index: usize,
    create_srv_conf: Option<CreateSrvConf>,
    merge_srv_conf: Option<MergeSrvConf>,
}

impl Module {
    /// Declare a process-level module.
    pub fn core(name: impl Into<String>) -> Self {
        Self::new(name, ModuleKind::Core)
    }

    /// Declare a stream module.
    pub fn stream(name: impl Into<String>) -> Self {
        Self::new(name, ModuleKind::Stream)
    }

    fn new(name: impl Into<String>, kind: ModuleKind) -> Self {
        Self {
            name: name.into(),
            kind,
            ctx_index: 0,
            create_srv_conf: None,
            merge_srv_conf: None,
        }
    }

    /// Attach a server configuration constructor.
    pub fn with_create_srv_conf<F>(mut self, create: F) -> Self
    where
        F: Fn(&mut ConfContext<'_>) -> Result<ConfObject, ConfError> + 'static,
    {
        self.create_srv_conf = Some(Box::new(create));
        self
    }

    /// Attach a server configuration merge step.
    pub fn with_merge_srv_conf<F>(mut self, merge: F) -> Self
    where
        F: Fn(&mut ConfContext<'_>, &mut dyn Any, &mut dyn Any) -> Result<(), ConfError> + 'static,
    {
        self.merge_srv_conf = Some(Box::new(merge));
        self
    }

    /// Module name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Module kind.
    pub fn kind(&self) -> ModuleKind {
        self.kind
    }

    /// Slot index among stream modules.
    pub fn ctx_index(&self) -> usize {
        self.ctx_index
    }

    /// The server configuration constructor, if registered.
    pub fn create_srv_conf(&self) -> Option<&CreateSrvConf> {
        self.create_srv_conf.as_ref()
    }

    /// The merge step, if registered.
    pub fn merge_srv_conf(&self) -> Option<&MergeSrvConf> {
        self.merge_srv_conf.as_ref()
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("ctx_index", &self.ctx_index)
            .field("create_srv_conf", &self.create_srv_conf.is_some())
            .field("merge_srv_conf", &self.merge_srv_conf.is_some())
            .finish()
    }
}

/// Ordered registry of modules.
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    modules: Vec<Module>,
    stream_modules: usize,
}

impl ModuleRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the built-in modules.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Module::core(STREAM_MODULE));
        registry.register(core_conf::module());
        registry.register(lua_conf::module());
        registry
    }

    /// Register a module and return its `ctx_index`.
    ///
    /// Registering a name twice keeps the first module.
    pub fn register(&mut self, mut module: Module) -> usize {
        if let Some(existing) = self.get(module.name()) {
            warn!(module = %module.name(), "Module already registered, skipping");
            return existing.ctx_index;
        }
        if module.kind == ModuleKind::Stream {
            module.ctx_index = self.stream_modules;
            self.stream_modules += 1;
        }
        debug!(module = %module.name, kind = ?module.kind, index = module.ctx_index, "Registering module");
        self.modules.push(module);
        self.modules[self.modules.len() - 1].ctx_index
    }

    /// Look up a module by name.
    pub fn get(&self, name: &str) -> Option<&Module> {
        self.modules.iter().find(|m| m.name == name)
    }

    /// `ctx_index` of the named stream module.
    pub fn ctx_index(&self, name: &str) -> Option<usize> {
        self.get(name)
            .filter(|m| m.kind() == ModuleKind::Stream)
            .map(|m| m.ctx_index)
    }

    /// Stream modules in registration order.
    pub fn stream_modules(&self) -> impl Iterator<Item = &Module> {
        self.modules.iter().filter(|m| m.kind() == ModuleKind::Stream)
    }

    /// Number of stream modules, i.e. the slot count of a [`ConfSlots`] table.
    pub fn max_stream_index(&self) -> usize {
        self.stream_modules
    }

    /// Number of registered modules.
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Returns `true` when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

/// Downcast a merge step's `(prev, cur)` pair to the module's concrete type.
pub fn downcast_pair<'c, T: 'static>(
    module: &str,
    prev: &'c mut dyn Any,
    cur: &'c mut dyn Any,
) -> Result<(&'c T, &'c mut T), ConfError> {
    match (prev.downcast_ref::<T>(), cur.downcast_mut::<T>()) {
        (Some(prev), Some(cur)) => Ok((prev, cur)),
        _ => Err(ConfError::Invalid(format!(
            "unexpected server configuration type for module \"{module}\""
        ))),
    }
}

/// Keep `conf` if set, otherwise inherit `prev`, otherwise use `default`.
pub fn merge_value<T: Clone>(conf: &mut Option<T>, prev: &Option<T>, default: T) {
    if conf.is_none() {
        *conf = Some(prev.clone().unwrap_or(default));
    }
}
