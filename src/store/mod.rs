//! In-memory ledger store.
//!
//! A [`Table`] is a keyed set of rows, each behind its own async mutex so that
//! locking one row never blocks readers or writers of another. Mutations go
//! through a [`RowGuard`], which stages changes on a private copy: calling
//! [`RowGuard::commit`] publishes them, dropping the guard discards them.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt::Display;
use std::hash::Hash;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, RwLock};

use tokio::sync::{Mutex, OwnedMutexGuard};

mod error;
pub use error::StoreError;

type Row<V> = Arc<Mutex<V>>;

pub struct Table<K, V> {
    name: &'static str,
    /// Index only; never held across an `.await`.
    rows: RwLock<HashMap<K, Row<V>>>,
}

impl<K, V> Table<K, V>
where
    K: Eq + Hash + Clone + Display,
    V: Clone,
{
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            rows: RwLock::new(HashMap::new()),
        }
    }

    /// Create a row. Fails if the key is already present.
    pub fn insert(&self, key: K, row: V) -> Result<(), StoreError> {
        self.insert_locked(key, row).map(RowGuard::commit)
    }

    /// Create a row and return it already locked.
    ///
    /// The row becomes visible and lockable by others only once the returned
    /// guard is released.
    pub fn insert_locked(&self, key: K, row: V) -> Result<RowGuard<V>, StoreError> {
        let mut rows = self
            .rows
            .write()
            .map_err(|_| StoreError::Poisoned(self.name))?;

        match rows.entry(key) {
            Entry::Occupied(entry) => Err(StoreError::Duplicate {
                table: self.name,
                key: entry.key().to_string(),
            }),
            Entry::Vacant(entry) => {
                let row = Arc::new(Mutex::new(row));
                // fresh mutex, nobody else can hold it yet
                let guard = Arc::clone(&row).try_lock_owned().map_err(|_| {
                    StoreError::Contended {
                        table: self.name,
                        key: entry.key().to_string(),
                    }
                })?;
                entry.insert(row);
                Ok(RowGuard::new(guard))
            }
        }
    }

    /// Take the exclusive lock on a row, waiting for any current holder.
    pub async fn lock(&self, key: &K) -> Result<Option<RowGuard<V>>, StoreError> {
        let Some(row) = self.row(key)? else {
            return Ok(None);
        };
        Ok(Some(RowGuard::new(row.lock_owned().await)))
    }

    /// Read the committed state of a row.
    pub async fn get(&self, key: &K) -> Result<Option<V>, StoreError> {
        let Some(row) = self.row(key)? else {
            return Ok(None);
        };
        let value = row.lock().await.clone();
        Ok(Some(value))
    }

    /// Committed state of every row, in no particular order.
    pub async fn snapshot(&self) -> Result<Vec<(K, V)>, StoreError> {
        let rows: Vec<(K, Row<V>)> = {
            let rows = self
                .rows
                .read()
                .map_err(|_| StoreError::Poisoned(self.name))?;
            rows.iter()
                .map(|(key, row)| (key.clone(), Arc::clone(row)))
                .collect()
        };

        let mut out = Vec::with_capacity(rows.len());
        for (key, row) in rows {
            let value = row.lock().await.clone();
            out.push((key, value));
        }
        Ok(out)
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        let rows = self
            .rows
            .read()
            .map_err(|_| StoreError::Poisoned(self.name))?;
        Ok(rows.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        self.len().map(|len| len == 0)
    }

    fn row(&self, key: &K) -> Result<Option<Row<V>>, StoreError> {
        let rows = self
            .rows
            .read()
            .map_err(|_| StoreError::Poisoned(self.name))?;
        Ok(rows.get(key).cloned())
    }
}

/// Exclusive, copy-on-write handle to one row.
///
/// Reads and writes through `Deref`/`DerefMut` hit the staged copy.
pub struct RowGuard<V> {
    guard: OwnedMutexGuard<V>,
    staged: V,
}

impl<V: Clone> RowGuard<V> {
    fn new(guard: OwnedMutexGuard<V>) -> Self {
        let staged = guard.clone();
        Self { guard, staged }
    }

    /// The committed value, ignoring staged changes.
    pub fn committed(&self) -> &V {
        &self.guard
    }

    /// Publish staged changes and release the lock.
    pub fn commit(self) {
        let RowGuard { mut guard, staged } = self;
        *guard = staged;
    }

    /// Discard staged changes and release the lock.
    pub fn rollback(self) {}
}

impl<V> Deref for RowGuard<V> {
    type Target = V;

    fn deref(&self) -> &V {
        &self.staged
    }
}

impl<V> DerefMut for RowGuard<V> {
    fn deref_mut(&mut self) -> &mut V {
        &mut self.staged
    }
}
