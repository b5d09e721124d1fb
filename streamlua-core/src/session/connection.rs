//! Placeholder connections.
//!
//! A placeholder connection has no socket.  It exists so that code written
//! for real sessions (logging, configuration lookup, the Lua APIs) has the
//! objects it expects while the worker is still initializing.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use crate::engine::pool::Pool;
use crate::error::PoolError;
use crate::session::log::{ConnectionLog, ErrorLog};
use crate::session::Session;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// A connection and everything allocated on its behalf.
#[derive(Debug)]
pub struct Connection {
    /// Connection number, unique within the process.
    pub id: u64,
    /// Socket descriptor; `None` for placeholders.
    pub fd: Option<i32>,
    /// Private pool; owns every allocation made for this connection.
    pub pool: Pool,
    /// Connection logger.
    pub log: ConnectionLog,
    /// Session running on this connection.
    pub session: Option<Session>,
}

impl Connection {
    /// Hand `session` to the connection, which owns it from now on.
    pub fn attach_session(&mut self, session: Session) -> &mut Session {
        self.session.insert(session)
    }

    /// Release the connection pool.
    ///
    /// Used once the connection is no longer needed and nothing has to be
    /// torn down first.
    pub fn destroy_pool(self) {
        debug!(connection = self.id, "Destroying connection pool");
        let Connection { pool, session, .. } = self;
        drop(session);
        pool.destroy();
    }
}

/// Create a connection with no socket and a private pool.
///
/// `pool_size` bounds the connection pool; `None` leaves it unbounded.
pub fn create_fake_connection(pool_size: Option<usize>) -> Result<Connection, PoolError> {
    let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
    let name = format!("connection#{id}");
    let mut pool = match pool_size {
        Some(size) => Pool::with_limit(name, size),
        None => Pool::new(name),
    };
    pool.reserve(std::mem::size_of::<ConnectionLog>())?;

    debug!(connection = id, "Created placeholder connection");
    Ok(Connection {
        id,
        fd: None,
        pool,
        log: ConnectionLog::new(id, ErrorLog::default()),
        session: None,
    })
}

/// Tear down a placeholder connection: its Lua context, its session, then
/// its pool.
pub fn close_fake_connection(mut c: Connection) {
    if let Some(mut session) = c.session.take() {
        if let Some(ctx) = session.take_ctx() {
            debug!(connection = c.id, phase = %ctx.context, "Releasing lua context");
        }
    }
    c.log.handler = None;
    c.log.action = None;
    debug!(connection = c.id, "Closing placeholder connection");
    c.pool.destroy();
}
