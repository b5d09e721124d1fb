//! End-to-end tests of the worker-init bootstrap.

use std::cell::{Cell, RefCell};
use std::fs;
use std::io;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use streamlua_core::engine::cycle::ShmZone;
use streamlua_core::error::{ConfError, PoolError, ScriptError};
use streamlua_core::lua::hook::{FILE_LABEL, INLINE_LABEL};
use streamlua_core::module::lua_conf::{LuaMainConf, LuaSrvConf};
use streamlua_core::module::{Module, ModuleRegistry, LUA_MODULE};
use streamlua_core::session::{Connection, ConnectionLog, ErrorLog, LogLevel, Phase};
use streamlua_core::{
    init_worker, init_worker_with, BootstrapError, BootstrapOptions, BootstrapReporter, ScriptEngine, Stage,
    WorkerConfig, WorkerState,
};

/// What the hook is about to see.
struct Context {
    log: ConnectionLog,
    lua_srv_conf: Option<LuaSrvConf>,
    sees_main_conf: bool,
    phase: Option<Phase>,
}

#[derive(Default)]
struct Events {
    log: RefCell<Vec<String>>,
    context: RefCell<Option<Context>>,
}

impl Events {
    fn push(&self, event: impl Into<String>) {
        self.log.borrow_mut().push(event.into());
    }

    fn count(&self, event: &str) -> usize {
        self.log.borrow().iter().filter(|e| *e == event).count()
    }

    fn position(&self, event: &str) -> Option<usize> {
        self.log.borrow().iter().position(|e| e == event)
    }
}

impl BootstrapReporter for Events {
    fn stage_entered(&self, stage: Stage) {
        self.push(format!("stage:{stage:?}"));
    }

    fn temp_pool_released(&self) {
        self.push("temp_pool_released");
    }

    fn context_ready(&self, c: &Connection) {
        self.push("context_ready");
        let lua_index = ModuleRegistry::with_builtin().ctx_index(LUA_MODULE).unwrap();
        let session = c.session.as_ref().unwrap();
        *self.context.borrow_mut() = Some(Context {
            log: c.log.clone(),
            lua_srv_conf: session.srv_conf::<LuaSrvConf>(lua_index).cloned(),
            sees_main_conf: session.main_conf::<LuaMainConf>(lua_index).is_some(),
            phase: session.ctx().map(|ctx| ctx.context),
        });
    }

    fn connection_closed(&self, _connection: u64) {
        self.push("connection_closed");
    }

    fn connection_released(&self, _connection: u64) {
        self.push("connection_released");
    }

    fn bootstrap_failed(&self, _error: &BootstrapError) {
        self.push("failed");
    }

    fn bootstrap_completed(&self) {
        self.push("completed");
    }
}

fn worker(json: &str) -> WorkerState {
    let config = WorkerConfig::from_json(json).unwrap();
    WorkerState::from_config("/etc/streamlua/streamlua.json", &config).unwrap()
}

fn inline_worker(src: &str) -> WorkerState {
    let json = serde_json::json!({ "lua": { "init_worker_by_lua": src } });
    worker(&json.to_string())
}

fn engine(state: &WorkerState) -> &ScriptEngine {
    let lua_index = state.modules.ctx_index(LUA_MODULE).unwrap();
    let stream = state.stream.as_ref().unwrap();
    let lmcf = stream.main_conf.get::<LuaMainConf>(lua_index).unwrap();
    lmcf.lua.as_ref().unwrap()
}

fn run(state: &mut WorkerState, events: &Events) -> Result<(), BootstrapError> {
    init_worker_with(state, &BootstrapOptions::default(), events)
}

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Run `f` with a fmt subscriber installed and return what it printed.
fn capture_logs<T>(f: impl FnOnce() -> T) -> (T, String) {
    let out = Captured::default();
    let writer = out.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .finish();
    let result = tracing::subscriber::with_default(subscriber, f);
    let text = String::from_utf8_lossy(&out.0.lock().unwrap()).into_owned();
    (result, text)
}

#[test]
fn test_inline_return_one_succeeds() {
    let mut state = inline_worker("return 1");
    let events = Events::default();
    run(&mut state, &events).unwrap();

    assert_eq!(events.count("completed"), 1);
    assert_eq!(events.count("connection_released"), 1);
    assert_eq!(events.count("connection_closed"), 0);
    assert_eq!(events.count("temp_pool_released"), 1);
    assert!(engine(&state).active_session().is_none());
}

#[test]
fn test_inline_syntax_error_never_calls() {
    let mut state = inline_worker("called = true; return (");
    let events = Events::default();
    let err = run(&mut state, &events).unwrap_err();

    match err {
        BootstrapError::Hook(ScriptError::Load { label, .. }) => assert_eq!(label, INLINE_LABEL),
        other => panic!("unexpected error: {other}"),
    }
    let called: Option<bool> = engine(&state).lua().globals().get("called").unwrap();
    assert_eq!(called, None);
    assert_eq!(events.count("connection_closed"), 1);
    assert_eq!(events.count("failed"), 1);
}

#[test]
fn test_missing_file_fails_with_file_label() {
    let mut state = worker(r#"{"lua": {"init_worker_by_lua_file": "/nonexistent/streamlua/init.lua"}}"#);
    let err = init_worker(&mut state).unwrap_err();
    match err {
        BootstrapError::Hook(ScriptError::Load { label, message }) => {
            assert_eq!(label, FILE_LABEL);
            assert!(message.contains("/nonexistent/streamlua/init.lua"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_relative_file_hook_runs_in_init_worker_phase() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("init.lua"), "file_phase = ngx.get_phase()\n").unwrap();
    let conf_path = dir.path().join("streamlua.json");
    fs::write(&conf_path, r#"{"lua": {"init_worker_by_lua_file": "init.lua"}}"#).unwrap();

    let config = WorkerConfig::load(&conf_path).unwrap();
    let mut state = WorkerState::from_config(&conf_path, &config).unwrap();
    init_worker(&mut state).unwrap();

    let phase: String = engine(&state).lua().globals().get("file_phase").unwrap();
    assert_eq!(phase, "init_worker");
}

#[test]
fn test_hook_can_log_through_connection() {
    let mut state = inline_worker(r#"ngx.log(ngx.ERR, "hello from ", ngx.get_phase())"#);
    let (result, logs) = capture_logs(|| init_worker(&mut state));
    result.unwrap();
    assert!(
        logs.contains("[lua] hello from init_worker, context: init_worker_by_lua*"),
        "{logs}"
    );
}

#[test]
fn test_hook_error_carries_init_worker_context() {
    let mut state = inline_worker("error('kaboom')");
    let (result, logs) = capture_logs(|| init_worker(&mut state));
    assert!(matches!(result, Err(BootstrapError::Hook(ScriptError::Runtime { .. }))));

    let start = logs.find("init_worker_by_lua error: ").unwrap();
    let diagnostic = &logs[start..];
    let suffix = diagnostic.find(", context: init_worker_by_lua*").unwrap();
    assert!(diagnostic[..suffix].contains("kaboom"));
}

#[test]
fn test_placeholder_connection_is_tagged_for_init_worker() {
    let mut state = inline_worker("return 1");
    let events = Events::default();
    run(&mut state, &events).unwrap();

    let context = events.context.borrow_mut().take().unwrap();
    assert_eq!(context.log.render("boom"), "boom, context: init_worker_by_lua*");
    assert_eq!(context.phase, Some(Phase::InitWorker));
    assert!(context.sees_main_conf);
    assert!(events.position("context_ready").unwrap() < events.position("stage:InvokingHook").unwrap());
}

#[test]
fn test_session_inherits_top_level_lua_settings() {
    let mut state = worker(
        r#"{"lua": {
            "init_worker_by_lua": "return 1",
            "resolver": {"addresses": ["127.0.0.53"], "ipv6": true},
            "lua_socket_log_errors": false
        }}"#,
    );
    let events = Events::default();
    run(&mut state, &events).unwrap();

    let context = events.context.borrow_mut().take().unwrap();
    let lscf = context.lua_srv_conf.unwrap();
    assert_eq!(lscf.log_socket_errors, Some(false));
    let resolver = lscf.resolver.unwrap();
    assert_eq!(resolver.addresses, vec!["127.0.0.53".to_owned()]);
    assert!(resolver.ipv6);
}

#[test]
fn test_session_without_top_level_lua_settings_keeps_defaults() {
    let mut state = inline_worker("return 1");
    let events = Events::default();
    run(&mut state, &events).unwrap();

    let context = events.context.borrow_mut().take().unwrap();
    let lscf = context.lua_srv_conf.unwrap();
    assert_eq!(lscf.log_socket_errors, Some(true));
    assert!(lscf.resolver.is_some_and(|r| r.addresses.is_empty()));
}

#[test]
fn test_connection_log_bound_to_core_error_log() {
    let mut state = worker(
        r#"{
            "error_log": {"file": "logs/worker.log", "level": "debug"},
            "lua": {"init_worker_by_lua": "return 1"}
        }"#,
    );
    let events = Events::default();
    run(&mut state, &events).unwrap();

    let context = events.context.borrow_mut().take().unwrap();
    let expected = ErrorLog {
        file: "logs/worker.log".into(),
        level: LogLevel::Debug,
    };
    assert_ne!(expected, ErrorLog::default());
    assert_eq!(context.log.error_log, expected);
    assert!(context.log.log(LogLevel::Debug, "visible").is_some());
}

#[test]
fn test_session_failure_closes_connection_once() {
    let mut state = inline_worker("ran = true");
    let options = BootstrapOptions {
        connection_pool_size: Some(std::mem::size_of::<ConnectionLog>()),
        ..BootstrapOptions::default()
    };
    let events = Events::default();
    let err = init_worker_with(&mut state, &options, &events).unwrap_err();

    assert!(matches!(err, BootstrapError::Session(PoolError::Exhausted { .. })));
    assert_eq!(err.stage(), Stage::SynthesizingContext);
    assert_eq!(events.count("connection_closed"), 1);
    assert_eq!(events.count("connection_released"), 0);
    assert_eq!(events.count("context_ready"), 0);
    let ran: Option<bool> = engine(&state).lua().globals().get("ran").unwrap();
    assert_eq!(ran, None);
}

#[test]
fn test_runtime_error_closes_connection_once() {
    let mut state = inline_worker("error('init failed')");
    let events = Events::default();
    let err = run(&mut state, &events).unwrap_err();

    assert!(matches!(err, BootstrapError::Hook(ScriptError::Runtime { .. })));
    assert_eq!(err.stage(), Stage::InvokingHook);
    assert_eq!(events.count("connection_closed"), 1);
    assert_eq!(events.count("connection_released"), 0);
    assert_eq!(events.count("temp_pool_released"), 1);
    assert!(engine(&state).active_session().is_none());
}

#[test]
fn test_temp_pool_released_before_hook_runs() {
    let mut state = inline_worker(r#"assert(temp_pool_gone(), "temp pool still alive")"#);

    let released = Rc::new(Cell::new(false));
    let flag = released.clone();
    state.modules.register(Module::stream("temp_watcher").with_create_srv_conf(move |cf| {
        let flag = flag.clone();
        cf.temp_pool.add_cleanup(move || flag.set(true));
        Ok(cf.temp_pool.alloc(())?)
    }));

    let check = released.clone();
    let lua = engine(&state).lua();
    let gone = lua.create_function(move |_, ()| Ok(check.get())).unwrap();
    lua.globals().set("temp_pool_gone", gone).unwrap();

    let events = Events::default();
    run(&mut state, &events).unwrap();
    assert!(released.get());
    let released_at = events.position("temp_pool_released").unwrap();
    let hook_at = events.position("stage:InvokingHook").unwrap();
    assert!(released_at < hook_at);
}

#[test]
fn test_create_failure_stops_before_connection() {
    let mut state = inline_worker("return 1");
    let options = BootstrapOptions {
        temp_pool_size: 1,
        ..BootstrapOptions::default()
    };
    let events = Events::default();
    let err = init_worker_with(&mut state, &options, &events).unwrap_err();

    match &err {
        BootstrapError::CreateConf { module, source } => {
            assert_eq!(module, "stream_core");
            assert!(matches!(source, ConfError::Alloc(_)));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(events.count("temp_pool_released"), 1);
    assert_eq!(events.count("stage:SynthesizingContext"), 0);
    assert_eq!(events.count("connection_closed"), 0);
    assert_eq!(events.count("connection_released"), 0);
}

#[test]
fn test_merge_failure_aborts_replication() {
    let mut state = inline_worker("ran = true");
    state.modules.register(
        Module::stream("picky")
            .with_create_srv_conf(|cf| Ok(cf.temp_pool.alloc(0u8)?))
            .with_merge_srv_conf(|_cf, _prev, _cur| Err(ConfError::Invalid("picky says no".into()))),
    );

    let events = Events::default();
    let err = run(&mut state, &events).unwrap_err();
    assert!(matches!(err, BootstrapError::MergeConf { ref module, .. } if module == "picky"));
    assert_eq!(events.count("temp_pool_released"), 1);
    assert_eq!(events.count("connection_closed"), 0);

    let ran: Option<bool> = engine(&state).lua().globals().get("ran").unwrap();
    assert_eq!(ran, None);
}

#[test]
fn test_merge_side_effects_stay_out_of_worker_tables() {
    let mut state = inline_worker("return 1");
    state.modules.register(
        Module::stream("zone_maker")
            .with_create_srv_conf(|cf| Ok(cf.temp_pool.alloc(0u8)?))
            .with_merge_srv_conf(|cf, _prev, _cur| {
                let zone = ShmZone {
                    name: "made_in_merge".into(),
                    size: 1 << 16,
                    tag: "zone_maker".into(),
                };
                cf.cycle.shared_memory.push(cf.pool, zone)?;
                Ok(())
            }),
    );
    let used_before = state.pool.stats().used;

    init_worker(&mut state).unwrap();
    assert!(state.shared_memory.is_empty());
    // The duplicate's storage stays charged to the worker pool.
    assert!(state.pool.stats().used > used_before);
}

#[test]
fn test_without_lua_block_is_noop() {
    let mut state = worker(r#"{"listen": [{"addr": "127.0.0.1:9000"}]}"#);
    let before = state.pool.stats();
    let events = Events::default();

    run(&mut state, &events).unwrap();
    assert_eq!(state.pool.stats(), before);
    assert!(events.log.borrow().is_empty());
}

#[test]
fn test_lua_block_without_hook_is_noop() {
    let mut state = worker(r#"{"lua": {"lua_socket_log_errors": false}}"#);
    let before = state.pool.stats();
    init_worker(&mut state).unwrap();
    assert_eq!(state.pool.stats(), before);
}
