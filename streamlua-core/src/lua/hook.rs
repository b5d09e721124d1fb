//! Worker-Init Hook Invoker
//!
//! Loads the configured hook (inline source or a file) into the engine and
//! calls it once with no arguments, discarding its results.  A failure to
//! load and a failure to run are both reported through the placeholder
//! connection's log under the hook's label and returned as one
//! [`ScriptError`].

use std::fs;
use std::path::{Path, PathBuf};

use mlua::Function;
use tracing::{debug, info};

use crate::error::ScriptError;
use crate::lua::ScriptEngine;
use crate::session::ConnectionLog;

/// Label of the inline hook form.
pub const INLINE_LABEL: &str = "init_worker_by_lua";

/// Label of the file hook form.
pub const FILE_LABEL: &str = "init_worker_by_lua_file";

/// Chunk name given to inline hook source.
pub const INLINE_CHUNK_NAME: &str = "=init_worker_by_lua";

/// The configured worker-init hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitWorkerHook {
    /// Inline Lua source.
    Inline(String),
    /// Path of a Lua file.
    File(PathBuf),
}

impl InitWorkerHook {
    /// Label used in diagnostics for this form.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Inline(_) => INLINE_LABEL,
            Self::File(_) => FILE_LABEL,
        }
    }

    /// Load and call the hook, reporting any failure through `log`.
    pub fn run(&self, log: &ConnectionLog, engine: &ScriptEngine) -> Result<(), ScriptError> {
        let result = match self {
            Self::Inline(src) => init_worker_by_inline(engine, src),
            Self::File(path) => init_worker_by_file(engine, path),
        };
        match &result {
            Ok(()) => info!(hook = self.label(), "Worker-init hook finished"),
            Err(err) => report(log, err),
        }
        result
    }
}

/// Load `src` as the inline hook and call it.
pub fn init_worker_by_inline(engine: &ScriptEngine, src: &str) -> Result<(), ScriptError> {
    let func = engine
        .lua()
        .load(src)
        .set_name(INLINE_CHUNK_NAME)
        .into_function()
        .map_err(|e| ScriptError::Load {
            label: INLINE_LABEL,
            message: e.to_string(),
        })?;
    do_call(INLINE_LABEL, func)
}

/// Load the file at `path` as the hook and call it.
pub fn init_worker_by_file(engine: &ScriptEngine, path: &Path) -> Result<(), ScriptError> {
    // Not `Lua::load(path)`: an unreadable file must report "cannot open <path>".
    let src = fs::read(path).map_err(|e| ScriptError::Load {
        label: FILE_LABEL,
        message: format!("cannot open {}: {e}", path.display()),
    })?;
    let func = engine
        .lua()
        .load(src)
        .set_name(format!("@{}", path.display()))
        .into_function()
        .map_err(|e| ScriptError::Load {
            label: FILE_LABEL,
            message: e.to_string(),
        })?;
    do_call(FILE_LABEL, func)
}

fn do_call(label: &'static str, func: Function) -> Result<(), ScriptError> {
    debug!(hook = label, "Calling worker-init hook");
    func.call::<()>(()).map_err(|e| ScriptError::Runtime {
        label,
        message: e.to_string(),
    })
}

fn report(log: &ConnectionLog, err: &ScriptError) {
    let (label, message) = match err {
        ScriptError::Load { label, message } | ScriptError::Runtime { label, message } => (*label, message.as_str()),
        ScriptError::Engine(message) => ("script engine", message.as_str()),
    };
    log.error(&format!("{label} error: {message}"));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ErrorLog;
    use std::io::Write;

    fn log() -> ConnectionLog {
        ConnectionLog::new(1, ErrorLog::default())
    }

    #[test]
    fn test_inline_return_value_is_discarded() {
        let engine = ScriptEngine::new().unwrap();
        let hook = InitWorkerHook::Inline("return 1".into());
        hook.run(&log(), &engine).unwrap();
    }

    #[test]
    fn test_inline_syntax_error_is_load_failure() {
        let engine = ScriptEngine::new().unwrap();
        engine.lua().globals().set("called", false).unwrap();
        let hook = InitWorkerHook::Inline("called = true; return (".into());

        let err = hook.run(&log(), &engine).unwrap_err();
        assert!(matches!(err, ScriptError::Load { label: INLINE_LABEL, .. }));
        let called: bool = engine.lua().globals().get("called").unwrap();
        assert!(!called);
    }

    #[test]
    fn test_inline_runtime_error() {
        let engine = ScriptEngine::new().unwrap();
        let err = init_worker_by_inline(&engine, "error('boom')").unwrap_err();
        match err {
            ScriptError::Runtime { label, message } => {
                assert_eq!(label, INLINE_LABEL);
                assert!(message.contains("boom"));
                assert!(message.contains("init_worker_by_lua"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_file_hook_runs() {
        let engine = ScriptEngine::new().unwrap();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "ran_from_file = 1").unwrap();

        let hook = InitWorkerHook::File(file.path().to_path_buf());
        assert_eq!(hook.label(), FILE_LABEL);
        hook.run(&log(), &engine).unwrap();
        let ran: i64 = engine.lua().globals().get("ran_from_file").unwrap();
        assert_eq!(ran, 1);
    }

    #[test]
    fn test_missing_file_is_load_failure() {
        let engine = ScriptEngine::new().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let hook = InitWorkerHook::File(dir.path().join("missing.lua"));

        let err = hook.run(&log(), &engine).unwrap_err();
        match err {
            ScriptError::Load { label, message } => {
                assert_eq!(label, FILE_LABEL);
                assert!(message.starts_with("cannot open"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
