//! Byte-Accounted Memory Pools
//!
//! Every allocation made during worker bootstrap is charged against a
//! [`Pool`].  A pool never hands out raw memory; it tracks how many bytes
//! its owners claim, enforces an optional hard limit, and runs registered
//! cleanup handlers when it is destroyed.  This gives the bootstrap the same
//! lifetime boundaries a real arena would have (a temporary pool that must
//! be gone before the hook runs, a connection pool that owns the session)
//! while keeping the storage itself in ordinary Rust values.
//!
//! # Design:
//! - Optional byte limit turns exhaustion into a [`PoolError`] instead of an abort
//! - Cleanup handlers run in reverse registration order on [`Pool::destroy`]

use std::fmt;
use tracing::{debug, info};

use crate::error::PoolError;

/// Default budget for the temporary pool used while replicating module
/// configuration.
pub const TEMP_POOL_SIZE: usize = 16 * 1024;

/// Default budget for a placeholder connection's private pool.
pub const FAKE_CONNECTION_POOL_SIZE: usize = 4 * 1024;

/// Statistics about pool utilization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Bytes currently charged against the pool.
    pub used: usize,
    /// Number of successful allocations.
    pub allocations: u64,
    /// Number of allocations refused because of the limit.
    pub failures: u64,
    /// Registered cleanup handlers not yet run.
    pub pending_cleanups: usize,
}

type Cleanup = Box<dyn FnOnce()>;

/// A byte-accounted arena with cleanup handlers.
///
/// # Pattern: Charge, Then Build
/// ```rust,no_run
/// # use streamlua_core::engine::pool::Pool;
/// let mut pool = Pool::with_limit("temp", 1024);
/// let slot = pool.alloc(42u64).unwrap();
/// pool.add_cleanup(|| println!("pool gone"));
/// pool.destroy();
/// ```
pub struct Pool {
    name: String,
    limit: Option<usize>,
    used: usize,
    allocations: u64,
    failures: u64,
    cleanups: Vec<Cleanup>,
}

impl Pool {
    /// Create an unbounded pool.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        debug!(pool = %name, "Creating unbounded pool");
        Self {
            name,
            limit: None,
            used: 0,
            allocations: 0,
            failures: 0,
            cleanups: Vec::new(),
        }
    }

    /// Create a pool that refuses allocations beyond `limit` bytes.
    pub fn with_limit(name: impl Into<String>, limit: usize) -> Self {
        let name = name.into();
        debug!(pool = %name, limit, "Creating bounded pool");
        Self {
            name,
            limit: Some(limit),
            used: 0,
            allocations: 0,
            failures: 0,
            cleanups: Vec::new(),
        }
    }

    /// Pool label used in logs and errors.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Charge `bytes` against the pool.
    pub fn reserve(&mut self, bytes: usize) -> Result<(), PoolError> {
        let wanted = self.used.saturating_add(bytes);
        if let Some(limit) = self.limit {
            if wanted > limit {
                self.failures += 1;
                debug!(pool = %self.name, requested = bytes, used = self.used, limit, "Pool exhausted");
                return Err(PoolError::Exhausted {
                    pool: self.name.clone(),
                    requested: bytes,
                    available: limit.saturating_sub(self.used),
                });
            }
        }
        self.used = wanted;
        self.allocations += 1;
        Ok(())
    }

    /// Charge the size of `T` and box `value`.
    pub fn alloc<T>(&mut self, value: T) -> Result<Box<T>, PoolError> {
        self.reserve(std::mem::size_of::<T>().max(1))?;
        Ok(Box::new(value))
    }

    /// Register a handler to run when the pool is destroyed.
    pub fn add_cleanup<F>(&mut self, cleanup: F)
    where
        F: FnOnce() + 'static,
    {
        self.cleanups.push(Box::new(cleanup));
    }

    /// Return a snapshot of current pool statistics.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            used: self.used,
            allocations: self.allocations,
            failures: self.failures,
            pending_cleanups: self.cleanups.len(),
        }
    }

    /// Run cleanup handlers (last registered first) and release the pool.
    pub fn destroy(mut self) {
        let handlers = std::mem::take(&mut self.cleanups);
        info!(pool = %self.name, used = self.used, cleanups = handlers.len(), "Destroying pool");
        for cleanup in handlers.into_iter().rev() {
            cleanup();
        }
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("name", &self.name)
            .field("limit", &self.limit)
            .field("used", &self.used)
            .field("cleanups", &self.cleanups.len())
            .finish()
    }
}
