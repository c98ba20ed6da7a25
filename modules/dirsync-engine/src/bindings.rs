//! Named scalar bindings published by hooks.
//!
//! Two disjoint maps: `values` (name → string) and `nulls` (names known to
//! have no value). A null binding is a positive assertion: substitutions
//! referencing it resolve by elision, while a missing name defers the entry.

use std::collections::BTreeMap;
use std::sync::RwLock;

use tracing::debug;

use dirsync_common::template::BindingSnapshot;

#[derive(Default)]
pub struct BindingStore {
    inner: RwLock<BindingSnapshot>,
}

impl BindingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a batch of binding changes in one critical section. A value
    /// sets the name and clears any null marker; a null marks the name
    /// known-absent and clears any value. Returns whether anything was
    /// applied, so the caller knows to reprocess pending entries.
    pub fn update(&self, changes: &BTreeMap<String, Option<String>>) -> bool {
        if changes.is_empty() {
            return false;
        }
        let mut inner = self.inner.write().unwrap();
        for (name, value) in changes {
            match value {
                Some(value) => {
                    inner.nulls.remove(name);
                    inner.values.insert(name.clone(), value.clone());
                }
                None => {
                    inner.values.remove(name);
                    inner.nulls.insert(name.clone());
                }
            }
        }
        debug!(applied = changes.len(), "Bindings updated");
        true
    }

    /// A consistent copy of both maps for one resolution pass.
    pub fn snapshot(&self) -> BindingSnapshot {
        self.inner.read().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn changes(pairs: &[(&str, Option<&str>)]) -> BTreeMap<String, Option<String>> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.map(str::to_string)))
            .collect()
    }

    #[test]
    fn empty_update_is_a_no_op() {
        let store = BindingStore::new();
        assert!(!store.update(&BTreeMap::new()));
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn a_name_is_never_in_both_maps() {
        let store = BindingStore::new();
        assert!(store.update(&changes(&[("k", Some("v"))])));
        let snap = store.snapshot();
        assert_eq!(snap.values.get("k").map(String::as_str), Some("v"));
        assert!(!snap.nulls.contains("k"));

        assert!(store.update(&changes(&[("k", None)])));
        let snap = store.snapshot();
        assert!(!snap.values.contains_key("k"));
        assert!(snap.nulls.contains("k"));

        assert!(store.update(&changes(&[("k", Some("v2"))])));
        let snap = store.snapshot();
        assert_eq!(snap.values.get("k").map(String::as_str), Some("v2"));
        assert!(!snap.nulls.contains("k"));
    }

    #[test]
    fn snapshots_are_isolated_from_later_updates() {
        let store = BindingStore::new();
        store.update(&changes(&[("a", Some("1"))]));
        let snap = store.snapshot();
        store.update(&changes(&[("a", Some("2")), ("b", None)]));
        assert_eq!(snap.values.get("a").map(String::as_str), Some("1"));
        assert!(!snap.nulls.contains("b"));
    }
}
