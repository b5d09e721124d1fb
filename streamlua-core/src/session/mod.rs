//! Stream Sessions and Their Lua Context
//!
//! A [`Session`] is the per-connection request state: a shared reference to
//! the main-level configuration, its own server-level slot table and, once
//! Lua runs on it, a [`LuaContext`].  The worker-init bootstrap builds one
//! on a placeholder [`Connection`] so that scripts can use the same APIs
//! they would inside a real session.
//!
//! # Ownership:
//! - The [`Connection`] owns its [`Session`]
//! - The [`Session`] owns its [`LuaContext`]
//! - Tearing down the connection drops all three, in that order

pub mod connection;
pub mod log;

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::engine::pool::Pool;
use crate::error::PoolError;
use crate::module::ConfSlots;

pub use connection::{close_fake_connection, create_fake_connection, Connection};
pub use log::{log_init_worker_error, ConnectionLog, ErrorLog, LogLevel};

/// Phase a Lua handler runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Reading the first bytes of a connection.
    Preread,
    /// Serving the connection.
    Content,
    /// After the connection is finished.
    Log,
    /// Inside a timer callback.
    Timer,
    /// Once per worker, before any connection is accepted.
    InitWorker,
}

impl Phase {
    /// Name reported to scripts by `ngx.get_phase()`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Preread => "preread",
            Self::Content => "content",
            Self::Log => "log",
            Self::Timer => "timer",
            Self::InitWorker => "init_worker",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of the coroutine currently running on a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoroutineCtx {
    /// Registry reference of the coroutine.
    pub co_ref: i64,
}

/// Read-event handler of a session.
pub type ReadEventHandler = fn(&mut Session);

/// Per-session Lua state.
#[derive(Clone)]
pub struct LuaContext {
    /// Phase the session is in.
    pub context: Phase,
    /// Running coroutine, if any.
    pub cur_co_ctx: Option<CoroutineCtx>,
    /// What happens when the client sends data.
    pub read_event_handler: ReadEventHandler,
}

impl fmt::Debug for LuaContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LuaContext")
            .field("context", &self.context)
            .field("cur_co_ctx", &self.cur_co_ctx)
            .finish_non_exhaustive()
    }
}

/// Read-event handler that ignores client data.
pub fn block_reading(session: &mut Session) {
    debug!(connection = session.connection_id(), "Reading blocked");
}

/// Per-connection request state.
#[derive(Debug)]
pub struct Session {
    connection_id: u64,
    /// Shared main-level configuration.
    pub main_conf: Option<Arc<ConfSlots>>,
    /// Server-level configuration.
    pub srv_conf: ConfSlots,
    ctx: Option<LuaContext>,
}

impl Session {
    fn new(connection_id: u64) -> Self {
        Self {
            connection_id,
            main_conf: None,
            srv_conf: ConfSlots::default(),
            ctx: None,
        }
    }

    /// Id of the owning connection.
    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    /// Typed view of a server-level slot.
    pub fn srv_conf<T: 'static>(&self, index: usize) -> Option<&T> {
        self.srv_conf.get(index)
    }

    /// Mutable typed view of a server-level slot.
    pub fn srv_conf_mut<T: 'static>(&mut self, index: usize) -> Option<&mut T> {
        self.srv_conf.get_mut(index)
    }

    /// Typed view of a main-level slot.
    pub fn main_conf<T: 'static>(&self, index: usize) -> Option<&T> {
        self.main_conf.as_deref()?.get(index)
    }

    /// The Lua context, once created.
    pub fn ctx(&self) -> Option<&LuaContext> {
        self.ctx.as_ref()
    }

    /// Create the Lua context, charging it to the connection's `pool`.
    ///
    /// The context starts in the content phase with reading blocked; callers
    /// adjust the phase for their own handler.
    pub fn create_ctx(&mut self, pool: &mut Pool) -> Result<&mut LuaContext, PoolError> {
        pool.reserve(std::mem::size_of::<LuaContext>())?;
        debug!(connection = self.connection_id, "Creating lua context");
        Ok(self.ctx.insert(LuaContext {
            context: Phase::Content,
            cur_co_ctx: None,
            read_event_handler: block_reading,
        }))
    }

    pub(crate) fn take_ctx(&mut self) -> Option<LuaContext> {
        self.ctx.take()
    }
}

/// Create a session for a placeholder connection, charged to its pool.
///
/// The session is handed to the connection with
/// [`Connection::attach_session`] once it is configured.
pub fn create_fake_session(c: &mut Connection) -> Result<Session, PoolError> {
    c.pool.reserve(std::mem::size_of::<Session>())?;
    debug!(connection = c.id, "Creating placeholder session");
    Ok(Session::new(c.id))
}
