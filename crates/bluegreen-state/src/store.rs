//! StateStore: redb-backed persistence for deployment records.
//!
//! Provides typed operations over deployment snapshots and their state
//! change history. All values are JSON-serialized into redb's `&[u8]`
//! value columns. The store supports both on-disk and in-memory backends
//! (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
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

/// Thread-safe record store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
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

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        txn.open_table(HISTORY).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Deployments ────────────────────────────────────────────────

    /// Insert or replace the snapshot for a deployment.
    pub fn put_deployment(&self, record: &DeploymentRecord) -> StateResult<()> {
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            table
                .insert(record.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(deployment = %record.id, state = %record.state, "deployment stored");
        Ok(())
    }

    pub fn get_deployment(&self, id: &str) -> StateResult<Option<DeploymentRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: DeploymentRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// List all stored deployments.
    pub fn list_deployments(&self) -> StateResult<Vec<DeploymentRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: DeploymentRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(record);
        }
        Ok(results)
    }

    /// Delete a deployment snapshot and its history. Returns true if it existed.
    pub fn delete_deployment(&self, id: &str) -> StateResult<bool> {
        let prefix = format!("{id}:");
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            existed = table.remove(id).map_err(map_err!(Write))?.is_some();

            let mut history = txn.open_table(HISTORY).map_err(map_err!(Table))?;
            let mut keys = Vec::new();
            for entry in history.range(prefix.as_str()..).map_err(map_err!(Read))? {
                let (key, _) = entry.map_err(map_err!(Read))?;
                if !key.value().starts_with(&prefix) {
                    break;
                }
                keys.push(key.value().to_string());
            }
            for key in &keys {
                history.remove(key.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(deployment = %id, existed, "deployment deleted");
        Ok(existed)
    }

    // ── History ────────────────────────────────────────────────────

    /// Append a batch of state changes in one transaction.
    pub fn append_history(&self, changes: &[StateChangeRecord]) -> StateResult<()> {
        if changes.is_empty() {
            return Ok(());
        }
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(HISTORY).map_err(map_err!(Table))?;
            for change in changes {
                let key = change.table_key();
                let value = serde_json::to_vec(change).map_err(map_err!(Serialize))?;
                table
                    .insert(key.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// State changes for a deployment in the order they happened.
    pub fn list_history(&self, deployment_id: &str) -> StateResult<Vec<StateChangeRecord>> {
        let prefix = format!("{deployment_id}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(HISTORY).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        // Keys sort by id then zero-padded seq, so the prefix is contiguous.
        for entry in table.range(prefix.as_str()..).map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if !key.value().starts_with(&prefix) {
                break;
            }
            let change: StateChangeRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(change);
        }
        Ok(results)
    }
}
