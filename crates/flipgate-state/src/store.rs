//! StateStore: redb-backed state persistence for Flipgate.
//!
//! Provides typed CRUD operations over release records, the release
//! archive, and provisioned resources. All values are JSON-serialized into
//! redb's `&[u8]` value columns. The store supports both on-disk and
//! in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type Table = TableDefinition<'static, &'static str, &'static [u8]>;

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(RELEASES).map_err(map_err!(Table))?;
        txn.open_table(ARCHIVE).map_err(map_err!(Table))?;
        txn.open_table(RESOURCES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn put_json<T: Serialize>(&self, table: Table, key: &str, value: &T) -> StateResult<()> {
        let bytes = serde_json::to_vec(value).map_err(map_err!(Codec))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            t.insert(key, bytes.as_slice()).map_err(map_err!(Storage))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(&self, table: Table, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(table).map_err(map_err!(Table))?;
        match t.get(key).map_err(map_err!(Storage))? {
            Some(guard) => {
                let value = serde_json::from_slice(guard.value()).map_err(map_err!(Codec))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Scan a table, keeping entries whose key passes `keep`.
    fn scan_json<T: DeserializeOwned>(
        &self,
        table: Table,
        keep: impl Fn(&str) -> bool,
    ) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(table).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in t.iter().map_err(map_err!(Storage))? {
            let (key, value) = entry.map_err(map_err!(Storage))?;
            if keep(key.value()) {
                let v = serde_json::from_slice(value.value()).map_err(map_err!(Codec))?;
                results.push(v);
            }
        }
        Ok(results)
    }

    fn remove(&self, table: Table, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            existed = t.remove(key).map_err(map_err!(Storage))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    // ── Releases ───────────────────────────────────────────────────

    /// Insert or update an in-flight release record.
    pub fn put_release(&self, record: &ReleaseRecord) -> StateResult<()> {
        self.put_json(RELEASES, &record.id, record)?;
        debug!(release = %record.id, phase = %record.phase, "release stored");
        Ok(())
    }

    /// Get an in-flight release by ID.
    pub fn get_release(&self, id: &str) -> StateResult<Option<ReleaseRecord>> {
        self.get_json(RELEASES, id)
    }

    /// List all in-flight releases.
    pub fn list_releases(&self) -> StateResult<Vec<ReleaseRecord>> {
        self.scan_json(RELEASES, |_| true)
    }

    /// Move a release from the in-flight table to the archive atomically.
    ///
    /// The record must already carry `archived_at`.
    pub fn archive_release(&self, record: &ReleaseRecord) -> StateResult<()> {
        if !record.is_archived() {
            return Err(StateError::Unarchived(record.id.clone()));
        }
        let key = record.archive_key();
        let bytes = serde_json::to_vec(record).map_err(map_err!(Codec))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut releases = txn.open_table(RELEASES).map_err(map_err!(Table))?;
            releases.remove(record.id.as_str()).map_err(map_err!(Storage))?;
            let mut archive = txn.open_table(ARCHIVE).map_err(map_err!(Table))?;
            archive
                .insert(key.as_str(), bytes.as_slice())
                .map_err(map_err!(Storage))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(release = %record.id, phase = %record.phase, "release archived");
        Ok(())
    }

    /// Archived releases for a service, oldest key first.
    pub fn list_archived(&self, service: &str) -> StateResult<Vec<ReleaseRecord>> {
        let prefix = format!("{service}:");
        self.scan_json(ARCHIVE, |k| k.starts_with(&prefix))
    }

    /// Find a release by ID, in flight or archived.
    pub fn find_release(&self, id: &str) -> StateResult<Option<ReleaseRecord>> {
        if let Some(record) = self.get_release(id)? {
            return Ok(Some(record));
        }
        let suffix = format!(":{id}");
        let mut hits: Vec<ReleaseRecord> = self.scan_json(ARCHIVE, |k| k.ends_with(&suffix))?;
        Ok(hits.pop())
    }

    // ── Resources ──────────────────────────────────────────────────

    /// Insert or update a provisioned resource.
    pub fn put_resource(&self, record: &ResourceRecord) -> StateResult<()> {
        self.put_json(RESOURCES, &record.logical_name, record)
    }

    /// Get a resource by logical name.
    pub fn get_resource(&self, logical_name: &str) -> StateResult<Option<ResourceRecord>> {
        self.get_json(RESOURCES, logical_name)
    }

    /// List all provisioned resources.
    pub fn list_resources(&self) -> StateResult<Vec<ResourceRecord>> {
        self.scan_json(RESOURCES, |_| true)
    }

    /// Delete a resource record. Returns true if it existed.
    pub fn delete_resource(&self, logical_name: &str) -> StateResult<bool> {
        let existed = self.remove(RESOURCES, logical_name)?;
        debug!(%logical_name, existed, "resource record deleted");
        Ok(existed)
    }
}
