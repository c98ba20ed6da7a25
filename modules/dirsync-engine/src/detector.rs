//! Per-search change detection.
//!
//! Each search id owns a DN → last-seen-entry cache. An incoming source
//! entry is New (no prior), Changed (content differs structurally), or
//! Unchanged. Only New and Changed reach the hook dispatcher, and never for
//! oneshot searches; that suppression is the scheduler's call.

use std::collections::HashMap;
use std::sync::RwLock;

use dirsync_common::SourceEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    New,
    Changed,
    Unchanged,
}

#[derive(Default)]
pub struct ChangeDetector {
    caches: RwLock<HashMap<String, HashMap<String, SourceEntry>>>,
}

impl ChangeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an (empty) cache for a search id so result queries can
    /// distinguish "no results yet" from "unknown search".
    pub fn ensure_cache(&self, search_id: &str) {
        self.caches
            .write()
            .unwrap()
            .entry(search_id.to_string())
            .or_default();
    }

    pub fn observe(&self, search_id: &str, entry: &SourceEntry) -> Observation {
        let mut caches = self.caches.write().unwrap();
        let cache = caches.entry(search_id.to_string()).or_default();
        match cache.get(&entry.dn) {
            None => {
                cache.insert(entry.dn.clone(), entry.clone());
                Observation::New
            }
            Some(prior) if prior.content != entry.content => {
                cache.insert(entry.dn.clone(), entry.clone());
                Observation::Changed
            }
            Some(_) => Observation::Unchanged,
        }
    }

    /// Cached entries for one search, or `None` when the id is unknown.
    pub fn entries(&self, search_id: &str) -> Option<Vec<SourceEntry>> {
        let caches = self.caches.read().unwrap();
        caches
            .get(search_id)
            .map(|cache| cache.values().cloned().collect())
    }

    pub fn drop_cache(&self, search_id: &str) {
        self.caches.write().unwrap().remove(search_id);
    }

    /// Clear every search's result map. The searches themselves stay
    /// registered; the next scan re-emits everything as new.
    pub fn clear_all(&self) {
        for cache in self.caches.write().unwrap().values_mut() {
            cache.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dirsync_common::AttrValue;

    fn entry(dn: &str, cn: &str) -> SourceEntry {
        SourceEntry {
            dn: dn.to_string(),
            content: [("cn".to_string(), AttrValue::text(cn))].into_iter().collect(),
        }
    }

    #[test]
    fn first_seen_then_unchanged_then_changed() {
        let detector = ChangeDetector::new();
        let e = entry("uid=a,dc=x", "A");
        assert_eq!(detector.observe("s1", &e), Observation::New);
        assert_eq!(detector.observe("s1", &e), Observation::Unchanged);
        assert_eq!(
            detector.observe("s1", &entry("uid=a,dc=x", "A2")),
            Observation::Changed
        );
        // The replacement is now the cached snapshot.
        assert_eq!(
            detector.observe("s1", &entry("uid=a,dc=x", "A2")),
            Observation::Unchanged
        );
    }

    #[test]
    fn caches_are_per_search() {
        let detector = ChangeDetector::new();
        let e = entry("uid=a,dc=x", "A");
        assert_eq!(detector.observe("s1", &e), Observation::New);
        assert_eq!(detector.observe("s2", &e), Observation::New);
    }

    #[test]
    fn clear_all_re_emits_everything_as_new() {
        let detector = ChangeDetector::new();
        let e = entry("uid=a,dc=x", "A");
        detector.observe("s1", &e);
        detector.clear_all();
        assert_eq!(detector.entries("s1").map(|v| v.len()), Some(0));
        assert_eq!(detector.observe("s1", &e), Observation::New);
    }

    #[test]
    fn unknown_search_has_no_result_cache() {
        let detector = ChangeDetector::new();
        assert!(detector.entries("missing").is_none());
        detector.ensure_cache("s1");
        assert_eq!(detector.entries("s1").map(|v| v.len()), Some(0));
        detector.drop_cache("s1");
        assert!(detector.entries("s1").is_none());
    }
}
