//! Engine module - pools, tables and the worker cycle
//!
//! This module contains the storage building blocks the bootstrap works
//! with: byte-accounted pools, pool-charged tables, and the worker state
//! together with its disposable duplicate.

pub mod cycle;
pub mod pool;
pub mod table;

pub use cycle::{DuplicateCycle, StreamConf, WorkerState};
pub use pool::{Pool, PoolStats};
pub use table::Table;
