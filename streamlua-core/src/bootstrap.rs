//! Worker-Init Bootstrap Orchestrator
//!
//! Runs the configured worker-init hook exactly once per worker, before any
//! client traffic exists.  The hook gets a context indistinguishable from a
//! real session: every stream module's server configuration is re-created
//! and re-merged on a duplicate of the worker tables, then bound to a
//! placeholder connection and session.
//!
//! # Stages:
//! ```text
//! Idle -> BuildingCycle -> ReplicatingModules -> SynthesizingContext -> InvokingHook -> Done
//!              \________________________\_________________\_______________\-> Failed
//! ```
//!
//! # Cleanup Guarantees:
//! - The temporary pool is gone before the hook runs, and on every failure
//! - After the placeholder connection exists, any failure closes it exactly once
//! - On success only the connection pool is destroyed; the session lives in it
//! - Duplicate cycle storage stays charged to the worker pool

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::engine::cycle::{DuplicateCycle, WorkerState};
use crate::engine::pool::{Pool, FAKE_CONNECTION_POOL_SIZE, TEMP_POOL_SIZE};
use crate::error::BootstrapError;
use crate::lua::hook::InitWorkerHook;
use crate::lua::{ActiveSession, ScriptEngine};
use crate::module::core_conf::CoreSrvConf;
use crate::module::lua_conf::{inherit_settings, LuaMainConf, LuaSrvConf};
use crate::module::{replicate_srv_conf, ConfContext, ConfFile, ConfSlots, CORE_MODULE, LUA_MODULE};
use crate::session::log::log_init_worker_error;
use crate::session::{
    block_reading, close_fake_connection, create_fake_connection, create_fake_session, Connection, Phase,
};

/// Bootstrap progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Nothing has happened yet.
    Idle,
    /// Duplicating the worker tables.
    BuildingCycle,
    /// Re-creating and merging module server configuration.
    ReplicatingModules,
    /// Building the placeholder connection and session.
    SynthesizingContext,
    /// Running the hook.
    InvokingHook,
    /// The hook ran successfully.
    Done,
    /// A stage failed; everything releasable has been released.
    Failed,
}

/// Observer of bootstrap progress.
///
/// Every method has a no-op default so implementors only override what they
/// care about.
pub trait BootstrapReporter {
    /// A new stage was entered.
    fn stage_entered(&self, _stage: Stage) {}

    /// The temporary pool was destroyed.
    fn temp_pool_released(&self) {}

    /// The placeholder connection and its session are configured and about
    /// to be handed to the hook.
    fn context_ready(&self, _connection: &Connection) {}

    /// The placeholder connection was closed on a failure path.
    fn connection_closed(&self, _connection: u64) {}

    /// The placeholder connection pool was destroyed after a successful run.
    fn connection_released(&self, _connection: u64) {}

    /// The bootstrap failed.
    fn bootstrap_failed(&self, _error: &BootstrapError) {}

    /// The bootstrap finished successfully.
    fn bootstrap_completed(&self) {}
}

/// Reporter that logs progress through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl BootstrapReporter for TracingReporter {
    fn stage_entered(&self, stage: Stage) {
        debug!(?stage, "Worker-init stage");
    }

    fn temp_pool_released(&self) {
        debug!("Worker-init temporary pool released");
    }

    fn context_ready(&self, connection: &Connection) {
        debug!(connection = connection.id, log = %connection.log.error_log.file.display(), "Worker-init context ready");
    }

    fn connection_closed(&self, connection: u64) {
        debug!(connection, "Worker-init connection closed");
    }

    fn connection_released(&self, connection: u64) {
        debug!(connection, "Worker-init connection released");
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        error!(stage = ?error.stage(), %error, "Worker-init bootstrap failed");
    }

    fn bootstrap_completed(&self) {
        info!("Worker-init bootstrap complete");
    }
}

/// Pool budgets used by the bootstrap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapOptions {
    /// Budget of the temporary pool used while replicating module settings.
    pub temp_pool_size: usize,
    /// Budget of the placeholder connection pool; `None` is unbounded.
    pub connection_pool_size: Option<usize>,
}

impl Default for BootstrapOptions {
    fn default() -> Self {
        Self {
            temp_pool_size: TEMP_POOL_SIZE,
            connection_pool_size: Some(FAKE_CONNECTION_POOL_SIZE),
        }
    }
}

/// Run the worker-init hook with default options.
///
/// ```rust,no_run
/// # use streamlua_core::config::WorkerConfig;
/// # use streamlua_core::engine::WorkerState;
/// let config = WorkerConfig::load("streamlua.json").unwrap();
/// let mut state = WorkerState::from_config("streamlua.json", &config).unwrap();
/// streamlua_core::bootstrap::init_worker(&mut state).unwrap();
/// ```
pub fn init_worker(state: &mut WorkerState) -> Result<(), BootstrapError> {
    init_worker_with(state, &BootstrapOptions::default(), &TracingReporter)
}

/// Run the worker-init hook.
///
/// Succeeds without doing anything when no stream configuration, no Lua
/// module, no script engine or no hook is present.
pub fn init_worker_with(
    state: &mut WorkerState,
    options: &BootstrapOptions,
    reporter: &dyn BootstrapReporter,
) -> Result<(), BootstrapError> {
    let Some(main_conf) = state.stream.as_ref().map(|stream| Arc::clone(&stream.main_conf)) else {
        debug!("No stream configuration, skipping worker-init");
        return Ok(());
    };
    let Some(lua_index) = state.modules.ctx_index(LUA_MODULE) else {
        debug!("Lua module not registered, skipping worker-init");
        return Ok(());
    };
    let Some(LuaMainConf {
        lua: Some(engine),
        init_worker: Some(hook),
    }) = main_conf.get::<LuaMainConf>(lua_index)
    else {
        debug!("No worker-init hook configured");
        return Ok(());
    };

    info!(hook = hook.label(), "Running worker-init bootstrap");
    let mut resources = Resources::new(reporter);
    let target = HookTarget {
        main_conf: &main_conf,
        lua_index,
        engine,
        hook,
    };

    match run(state, &target, options, &mut resources) {
        Ok(()) => {
            resources.finish();
            reporter.stage_entered(Stage::Done);
            reporter.bootstrap_completed();
            Ok(())
        }
        Err(err) => {
            resources.release();
            reporter.stage_entered(Stage::Failed);
            reporter.bootstrap_failed(&err);
            Err(err)
        }
    }
}

struct HookTarget<'a> {
    main_conf: &'a Arc<ConfSlots>,
    lua_index: usize,
    engine: &'a ScriptEngine,
    hook: &'a InitWorkerHook,
}

/// What the bootstrap still owns; released on every exit path.
struct Resources<'r> {
    temp_pool: Option<Pool>,
    connection: Option<Connection>,
    reporter: &'r dyn BootstrapReporter,
}

impl<'r> Resources<'r> {
    fn new(reporter: &'r dyn BootstrapReporter) -> Self {
        Self {
            temp_pool: None,
            connection: None,
            reporter,
        }
    }

    fn release_temp_pool(&mut self) {
        if let Some(pool) = self.temp_pool.take() {
            pool.destroy();
            self.reporter.temp_pool_released();
        }
    }

    fn close_connection(&mut self) {
        if let Some(c) = self.connection.take() {
            let id = c.id;
            close_fake_connection(c);
            self.reporter.connection_closed(id);
        }
    }

    /// Failure path.
    fn release(&mut self) {
        self.release_temp_pool();
        self.close_connection();
    }

    /// Success path.
    fn finish(&mut self) {
        self.release_temp_pool();
        if let Some(c) = self.connection.take() {
            let id = c.id;
            c.destroy_pool();
            self.reporter.connection_released(id);
        }
    }
}

impl Drop for Resources<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

fn run(
    state: &mut WorkerState,
    target: &HookTarget<'_>,
    options: &BootstrapOptions,
    resources: &mut Resources<'_>,
) -> Result<(), BootstrapError> {
    let reporter = resources.reporter;

    reporter.stage_entered(Stage::BuildingCycle);
    let temp_pool = resources
        .temp_pool
        .insert(Pool::with_limit("init_worker_temp", options.temp_pool_size));
    let mut cycle = DuplicateCycle::build(state).map_err(BootstrapError::Cycle)?;
    let mut srv_conf =
        ConfSlots::alloc(&mut state.pool, state.modules.max_stream_index()).map_err(BootstrapError::Cycle)?;

    reporter.stage_entered(Stage::ReplicatingModules);
    let mut cf = ConfContext {
        pool: &mut state.pool,
        temp_pool,
        cycle: &mut cycle,
        main_conf: target.main_conf,
        conf_file: ConfFile {
            name: state.conf_file.clone(),
            line: 0,
        },
    };
    replicate_srv_conf(&state.modules, &mut cf, &mut srv_conf)?;
    resources.release_temp_pool();

    reporter.stage_entered(Stage::SynthesizingContext);
    let c = resources.connection.insert(
        create_fake_connection(options.connection_pool_size).map_err(BootstrapError::Connection)?,
    );
    c.log.handler = Some(log_init_worker_error);

    let mut session = create_fake_session(c).map_err(BootstrapError::Session)?;
    session.main_conf = Some(Arc::clone(target.main_conf));
    session.srv_conf = srv_conf;

    let top = state
        .stream
        .as_ref()
        .and_then(|stream| stream.srv_conf.get::<LuaSrvConf>(target.lua_index));
    if let (Some(top), Some(conf)) = (top, session.srv_conf_mut::<LuaSrvConf>(target.lua_index)) {
        inherit_settings(top, conf);
    }

    let error_log = state
        .modules
        .ctx_index(CORE_MODULE)
        .and_then(|index| session.srv_conf::<CoreSrvConf>(index))
        .and_then(|core| core.error_log.clone())
        .ok_or(BootstrapError::MissingConf(CORE_MODULE))?;
    c.log.set_error_log(&error_log);

    let ctx = session.create_ctx(&mut c.pool).map_err(BootstrapError::Context)?;
    ctx.context = Phase::InitWorker;
    ctx.cur_co_ctx = None;
    ctx.read_event_handler = block_reading;
    c.attach_session(session);
    reporter.context_ready(c);

    reporter.stage_entered(Stage::InvokingHook);
    let _active = target.engine.set_session(ActiveSession {
        connection: c.id,
        phase: Phase::InitWorker,
        log: c.log.clone(),
    });
    target.hook.run(&c.log, target.engine)?;
    Ok(())
}
