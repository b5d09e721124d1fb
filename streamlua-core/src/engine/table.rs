//! Pool-Charged Tables
//!
//! [`Table`] is the fixed-capacity, growable array used for the worker's
//! listening, path, open-file and shared-memory tables.  Capacity is charged
//! against a [`Pool`] up front; pushing past the capacity doubles it and
//! charges the growth.

use std::mem::size_of;
use std::slice;

use crate::engine::pool::Pool;
use crate::error::PoolError;

/// Growable table whose storage is accounted in a [`Pool`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table<T> {
    elts: Vec<T>,
    nalloc: usize,
}

impl<T> Table<T> {
    /// Initialize an empty table with room for `n` elements.
    pub fn init(pool: &mut Pool, n: usize) -> Result<Self, PoolError> {
        pool.reserve(n.saturating_mul(size_of::<T>()))?;
        Ok(Self {
            elts: Vec::with_capacity(n),
            nalloc: n,
        })
    }

    /// Append `value`, growing the table when it is full.
    pub fn push(&mut self, pool: &mut Pool, value: T) -> Result<&mut T, PoolError> {
        if self.elts.len() == self.nalloc {
            let grown = self.nalloc.max(1).saturating_mul(2);
            pool.reserve((grown - self.nalloc).saturating_mul(size_of::<T>()))?;
            self.elts.reserve(grown - self.elts.len());
            self.nalloc = grown;
        }
        self.elts.push(value);
        let last = self.elts.len() - 1;
        Ok(&mut self.elts[last])
    }

    /// Number of elements stored.
    pub fn len(&self) -> usize {
        self.elts.len()
    }

    /// Returns `true` when no elements are stored.
    pub fn is_empty(&self) -> bool {
        self.elts.is_empty()
    }

    /// Number of slots charged to the pool.
    pub fn capacity(&self) -> usize {
        self.nalloc
    }

    /// Iterate over stored elements.
    pub fn iter(&self) -> slice::Iter<'_, T> {
        self.elts.iter()
    }

    /// Stored elements as a slice.
    pub fn as_slice(&self) -> &[T] {
        &self.elts
    }
}

impl<T: Clone> Table<T> {
    /// Copy every element of `self` into a fresh table charged to `pool`.
    ///
    /// The copy has the same element count as `self`, but never less than
    /// one slot.
    pub fn duplicate(&self, pool: &mut Pool) -> Result<Self, PoolError> {
        let mut copy = Self::init(pool, self.len().max(1))?;
        for elt in &self.elts {
            copy.push(pool, elt.clone())?;
        }
        Ok(copy)
    }
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self {
            elts: Vec::new(),
            nalloc: 0,
        }
    }
}

impl<'a, T> IntoIterator for &'a Table<T> {
    type Item = &'a T;
    type IntoIter = slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
