//! StateStore: redb-backed collection store for Krane.
//!
//! Provides byte-level CRUD over named collections plus JSON helpers for
//! typed records. Every mutation runs in its own write transaction; redb
//! serializes writers and lets readers proceed concurrently. The store
//! supports both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use redb::{Database, ReadOnlyTable, ReadableDatabase, ReadableTable, Table, TableHandle};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::collections::{self, table};
use crate::error::{StateError, StateResult};

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// How long to sleep between attempts to acquire a locked database file.
const OPEN_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Default bound on waiting for the database file lock.
pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(30);

type BytesTable<'txn> = Table<'txn, &'static str, &'static [u8]>;
type ReadBytesTable = ReadOnlyTable<&'static str, &'static [u8]>;

/// Thread-safe collection store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
    closed: Arc<AtomicBool>,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        Self::open_with_timeout(path, DEFAULT_OPEN_TIMEOUT)
    }

    /// Open (or create) a persistent store, waiting up to `timeout` for
    /// another handle to release the file.
    ///
    /// Blocks the calling thread while waiting. Async callers run it on
    /// the blocking pool (`tokio::task::spawn_blocking`).
    pub fn open_with_timeout(path: &Path, timeout: Duration) -> StateResult<Self> {
        let deadline = Instant::now() + timeout;
        let db = loop {
            match Database::create(path) {
                Ok(db) => break db,
                Err(redb::DatabaseError::DatabaseAlreadyOpen) => {
                    if Instant::now() >= deadline {
                        return Err(StateError::OpenTimeout(timeout));
                    }
                    std::thread::sleep(OPEN_RETRY_INTERVAL);
                }
                Err(e) => return Err(StateError::Open(e.to_string())),
            }
        };
        let store = Self::from_database(db);
        store.ensure_builtin_collections()?;
        info!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self::from_database(db);
        store.ensure_builtin_collections()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn from_database(db: Database) -> Self {
        Self {
            db: Arc::new(db),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Create the well-known collections if they don't exist yet.
    fn ensure_builtin_collections(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        for name in collections::BUILTIN {
            txn.open_table(table(name)).map_err(map_err!(Table))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Mark the store closed. Every later operation on any clone of this
    /// handle fails with [`StateError::Closed`]; the file is released once
    /// the last clone is dropped.
    pub fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!("state store shut down");
        }
    }

    fn ensure_open(&self) -> StateResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StateError::Closed);
        }
        Ok(())
    }

    // ── Collections ────────────────────────────────────────────────

    /// Create a collection. Returns true if it did not exist before.
    pub fn create_collection(&self, name: &str) -> StateResult<bool> {
        self.ensure_open()?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed = write_txn_has_table(&txn, name)?;
        if !existed {
            txn.open_table(table(name)).map_err(map_err!(Table))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(collection = name, created = !existed, "collection ensured");
        Ok(!existed)
    }

    /// Drop a collection and everything in it. Returns true if it existed.
    pub fn delete_collection(&self, name: &str) -> StateResult<bool> {
        self.ensure_open()?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed = txn.delete_table(table(name)).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(collection = name, existed, "collection deleted");
        Ok(existed)
    }

    /// Check whether a collection exists.
    pub fn has_collection(&self, name: &str) -> StateResult<bool> {
        Ok(self.collections()?.iter().any(|c| c == name))
    }

    /// List all collection names in lexicographic order.
    pub fn collections(&self) -> StateResult<Vec<String>> {
        self.ensure_open()?;
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let mut names: Vec<String> = txn
            .list_tables()
            .map_err(map_err!(Read))?
            .map(|handle| handle.name().to_string())
            .collect();
        names.sort();
        Ok(names)
    }

    // ── Records ────────────────────────────────────────────────────

    /// Insert or overwrite a value. Fails with `CollectionNotFound` if the
    /// collection has not been created.
    pub fn put(&self, collection: &str, key: &str, value: &[u8]) -> StateResult<()> {
        self.with_write_table(collection, |table| {
            table.insert(key, value).map_err(map_err!(Write))?;
            Ok(())
        })?;
        debug!(collection, key, "record stored");
        Ok(())
    }

    /// Get a value. A missing key is `Ok(None)`, not an error.
    pub fn get(&self, collection: &str, key: &str) -> StateResult<Option<Vec<u8>>> {
        self.with_read_table(collection, |table| {
            Ok(table
                .get(key)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_vec()))
        })
    }

    /// Get every value in a collection, in key order.
    pub fn get_all(&self, collection: &str) -> StateResult<Vec<Vec<u8>>> {
        self.with_read_table(collection, |table| {
            let mut results = Vec::new();
            for entry in table.iter().map_err(map_err!(Read))? {
                let (_, value) = entry.map_err(map_err!(Read))?;
                results.push(value.value().to_vec());
            }
            Ok(results)
        })
    }

    /// Get every value whose key lies in `min..=max` (byte order).
    ///
    /// Intended for sortable keys such as RFC 3339 timestamps. A missing
    /// collection or an inverted range yields an empty result.
    pub fn get_in_range(&self, collection: &str, min: &str, max: &str) -> StateResult<Vec<Vec<u8>>> {
        if min > max {
            return Ok(Vec::new());
        }
        let result = self.with_read_table(collection, |table| {
            let mut results = Vec::new();
            for entry in table.range(min..=max).map_err(map_err!(Read))? {
                let (_, value) = entry.map_err(map_err!(Read))?;
                results.push(value.value().to_vec());
            }
            Ok(results)
        });
        match result {
            Err(StateError::CollectionNotFound(_)) => Ok(Vec::new()),
            other => other,
        }
    }

    /// Remove a key. Returns true if it existed. Removing from a missing
    /// collection is a no-op.
    pub fn remove(&self, collection: &str, key: &str) -> StateResult<bool> {
        let result = self.with_write_table(collection, |table| {
            Ok(table.remove(key).map_err(map_err!(Write))?.is_some())
        });
        match result {
            Err(StateError::CollectionNotFound(_)) => Ok(false),
            Ok(existed) => {
                debug!(collection, key, existed, "record removed");
                Ok(existed)
            }
            Err(e) => Err(e),
        }
    }

    // ── JSON helpers ───────────────────────────────────────────────

    /// Serialize `value` as JSON and store it under `key`.
    pub fn put_json<T: Serialize>(&self, collection: &str, key: &str, value: &T) -> StateResult<()> {
        let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        self.put(collection, key, &bytes)
    }

    /// Fetch and deserialize the JSON record under `key`.
    pub fn get_json<T: DeserializeOwned>(&self, collection: &str, key: &str) -> StateResult<Option<T>> {
        match self.get(collection, key)? {
            Some(bytes) => {
                let value = serde_json::from_slice(&bytes).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    // ── Internal helpers ───────────────────────────────────────────

    fn with_write_table<R>(
        &self,
        collection: &str,
        f: impl FnOnce(&mut BytesTable<'_>) -> StateResult<R>,
    ) -> StateResult<R> {
        self.ensure_open()?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        if !write_txn_has_table(&txn, collection)? {
            // Dropping the transaction aborts it.
            return Err(StateError::CollectionNotFound(collection.to_string()));
        }
        let result = {
            let mut table = txn.open_table(table(collection)).map_err(map_err!(Table))?;
            f(&mut table)?
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(result)
    }

    fn with_read_table<R>(
        &self,
        collection: &str,
        f: impl FnOnce(&ReadBytesTable) -> StateResult<R>,
    ) -> StateResult<R> {
        self.ensure_open()?;
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = match txn.open_table(table(collection)) {
            Ok(table) => table,
            Err(redb::TableError::TableDoesNotExist(_)) => {
                return Err(StateError::CollectionNotFound(collection.to_string()));
            }
            Err(e) => return Err(StateError::Table(e.to_string())),
        };
        f(&table)
    }
}

fn write_txn_has_table(txn: &redb::WriteTransaction, name: &str) -> StateResult<bool> {
    Ok(txn
        .list_tables()
        .map_err(map_err!(Read))?
        .any(|handle| handle.name() == name))
}
