// Test mocks for the sync engine.
//
// Three mocks matching the three trait boundaries:
// - StubSource (SourceClient) - scripted poll results with a poll counter
// - MemoryDirectory (DirectoryWriter) - records writes in order, with
//   per-DN failure injection
// - MemorySpecStore (SpecStore) - in-memory spec rows
//
// Plus small helpers for constructing entries.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use dirsync_common::{
    normalize_dn, AttrValue, SearchSpec, SourceEntry, SyncError, TransformedEntry,
};

use crate::ldap::SourceClient;
use crate::registry::SpecStore;
use crate::writer::DirectoryWriter;

/// Build a source entry from (attribute, value) pairs.
pub fn source_entry(dn: &str, pairs: &[(&str, AttrValue)]) -> SourceEntry {
    SourceEntry {
        dn: dn.to_string(),
        content: pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect(),
    }
}

// ---------------------------------------------------------------------------
// StubSource
// ---------------------------------------------------------------------------

/// Returns the configured entries on every poll and counts polls.
#[derive(Default)]
pub struct StubSource {
    entries: Mutex<Vec<SourceEntry>>,
    polls: AtomicUsize,
}

impl StubSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_entries(&self, entries: Vec<SourceEntry>) {
        *self.entries.lock().unwrap() = entries;
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceClient for StubSource {
    async fn search(
        &self,
        _base_dn: &str,
        _filter: &str,
    ) -> Result<Vec<SourceEntry>, SyncError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        Ok(self.entries.lock().unwrap().clone())
    }
}

// ---------------------------------------------------------------------------
// MemoryDirectory
// ---------------------------------------------------------------------------

/// Records applied entries in write order. `fail_on` makes writes to a DN
/// fail, for exercising the drop-on-write-failure path.
#[derive(Default)]
pub struct MemoryDirectory {
    writes: Mutex<Vec<TransformedEntry>>,
    failing: Mutex<HashSet<String>>,
}

impl MemoryDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_on(&self, dn: &str) {
        self.failing.lock().unwrap().insert(normalize_dn(dn));
    }

    pub fn writes(&self) -> Vec<TransformedEntry> {
        self.writes.lock().unwrap().clone()
    }

    /// DNs in the order they were written.
    pub fn write_order(&self) -> Vec<String> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .map(|entry| entry.dn.clone())
            .collect()
    }
}

#[async_trait]
impl DirectoryWriter for MemoryDirectory {
    async fn apply(&self, entry: &TransformedEntry) -> Result<(), SyncError> {
        if self.failing.lock().unwrap().contains(&normalize_dn(&entry.dn)) {
            return Err(SyncError::Ldap(format!("injected failure for {}", entry.dn)));
        }
        self.writes.lock().unwrap().push(entry.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemorySpecStore
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemorySpecStore {
    rows: Mutex<HashMap<String, SearchSpec>>,
}

impl MemorySpecStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seed(&self, specs: Vec<SearchSpec>) {
        let mut rows = self.rows.lock().unwrap();
        for spec in specs {
            rows.insert(spec.id.clone(), spec);
        }
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.rows.lock().unwrap().keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl SpecStore for MemorySpecStore {
    async fn upsert(&self, spec: &SearchSpec) -> Result<(), SyncError> {
        self.rows
            .lock()
            .unwrap()
            .insert(spec.id.clone(), spec.clone());
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), SyncError> {
        self.rows.lock().unwrap().remove(id);
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<SearchSpec>, SyncError> {
        Ok(self.rows.lock().unwrap().values().cloned().collect())
    }
}
