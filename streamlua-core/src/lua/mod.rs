//! Lua Script Engine
//!
//! Thin wrapper around an [`mlua::Lua`] state with the small `ngx` API
//! installed.  Native API functions need to know which session they are
//! serving; the engine keeps that in a single "active session" slot stored
//! as Lua app data, set for the duration of a handler call.
//!
//! # Pattern: Scoped Active Session
//! ```rust,no_run
//! # use streamlua_core::lua::{ActiveSession, ScriptEngine};
//! # use streamlua_core::session::{ConnectionLog, ErrorLog, Phase};
//! let engine = ScriptEngine::new().unwrap();
//! {
//!     let _guard = engine.set_session(ActiveSession {
//!         connection: 1,
//!         phase: Phase::InitWorker,
//!         log: ConnectionLog::new(1, ErrorLog::default()),
//!     });
//!     // scripts called here see the session
//! }
//! assert!(engine.active_session().is_none());
//! ```

pub mod api;
pub mod hook;

use std::fmt;

use mlua::Lua;
use tracing::debug;

use crate::error::ScriptError;
use crate::session::{ConnectionLog, Phase};

pub use hook::InitWorkerHook;

/// What native API functions know about the session being served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSession {
    /// Connection id.
    pub connection: u64,
    /// Phase the session is in.
    pub phase: Phase,
    /// Logger diagnostics are written through.
    pub log: ConnectionLog,
}

/// A Lua state with the `ngx` API installed.
pub struct ScriptEngine {
    lua: Lua,
}

impl ScriptEngine {
    /// Create a fresh Lua state and install the API.
    pub fn new() -> Result<Self, ScriptError> {
        let lua = Lua::new();
        api::install(&lua).map_err(|e| ScriptError::Engine(e.to_string()))?;
        debug!("Script engine ready");
        Ok(Self { lua })
    }

    /// The underlying Lua state.
    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    /// Make `session` the active session until the guard is dropped.
    pub fn set_session(&self, session: ActiveSession) -> ActiveSessionGuard<'_> {
        debug!(connection = session.connection, phase = %session.phase, "Binding active session");
        self.lua.set_app_data(session);
        ActiveSessionGuard { lua: &self.lua }
    }

    /// Copy of the active session, if one is bound.
    pub fn active_session(&self) -> Option<ActiveSession> {
        self.lua.app_data_ref::<ActiveSession>().map(|s| (*s).clone())
    }
}

impl fmt::Debug for ScriptEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptEngine")
            .field("active_session", &self.active_session().map(|s| s.connection))
            .finish()
    }
}

/// Clears the active session when dropped.
#[must_use = "the session is unbound as soon as the guard is dropped"]
pub struct ActiveSessionGuard<'a> {
    lua: &'a Lua,
}

impl Drop for ActiveSessionGuard<'_> {
    fn drop(&mut self) {
        if let Some(session) = self.lua.remove_app_data::<ActiveSession>() {
            debug!(connection = session.connection, "Unbinding active session");
        }
    }
}
