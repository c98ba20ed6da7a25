//! The dependency & binding resolver.
//!
//! A transformed entry reaches the target directory only after every DN in
//! its dependency list has itself been written, and every `$name` token in
//! its DN, content, or dependencies refers to a known binding or one marked
//! null. Until then the entry is parked in memory and retried whenever a
//! dependency syncs or the binding store changes.
//!
//! State is guarded by one mutex, never held across I/O: releases are
//! collected under the lock and written outside it, and follow-on releases
//! propagate through a worklist.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tracing::{debug, error, warn};

use dirsync_common::template::{render_deps, render_entry};
use dirsync_common::{normalize_dn, AttrValue, TransformedEntry};

use crate::bindings::BindingStore;
use crate::writer::DirectoryWriter;

/// An entry held back by the resolver. The entry and its dependency strings
/// are kept unresolved; substitution reruns against a fresh snapshot on
/// every release attempt.
#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub entry: TransformedEntry,
    pub raw_deps: Vec<String>,
    /// Normalized dependency DNs not yet marked synced.
    pub missing_deps: HashSet<String>,
}

#[derive(Default)]
struct ResolverState {
    /// Normalized DNs confirmed written to the target.
    synced: HashSet<String>,
    /// Parked entries keyed by normalized parent DN.
    pending: HashMap<String, PendingEntry>,
    /// Normalized dep DN → normalized parent DNs waiting on it.
    reverse: HashMap<String, HashSet<String>>,
}

enum Admission {
    Rejected,
    Deferred,
    Ready(TransformedEntry),
}

pub struct Resolver {
    state: Mutex<ResolverState>,
    bindings: Arc<BindingStore>,
    writer: Arc<dyn DirectoryWriter>,
}

impl Resolver {
    pub fn new(bindings: Arc<BindingStore>, writer: Arc<dyn DirectoryWriter>) -> Self {
        Self {
            state: Mutex::new(ResolverState::default()),
            bindings,
            writer,
        }
    }

    /// Submit one transformed entry with its declared dependency DNs.
    /// Writes immediately when everything resolves, parks it otherwise.
    pub async fn handle_entry(&self, entry: TransformedEntry, raw_deps: Vec<String>) {
        match self.admit(entry, raw_deps) {
            Admission::Rejected | Admission::Deferred => {}
            Admission::Ready(resolved) => self.write_and_release(resolved).await,
        }
    }

    /// Record a DN as present in the target and release any entries whose
    /// last missing dependency it was.
    pub async fn mark_synced(&self, dn: &str) {
        self.release_from(dn.to_string()).await;
    }

    /// Drain and re-admit every pending entry. Invoked after any binding
    /// change; new bindings can change an entry's dependency shape, so the
    /// pending and reverse maps are rebuilt from scratch.
    pub async fn reprocess_pending(&self) {
        let drained: Vec<PendingEntry> = {
            let mut state = self.state.lock().unwrap();
            state.reverse.clear();
            state.pending.drain().map(|(_, held)| held).collect()
        };
        if drained.is_empty() {
            return;
        }
        debug!(count = drained.len(), "Reprocessing pending entries");
        for held in drained {
            self.handle_entry(held.entry, held.raw_deps).await;
        }
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().unwrap().pending.len()
    }

    pub fn is_synced(&self, dn: &str) -> bool {
        self.state.lock().unwrap().synced.contains(&normalize_dn(dn))
    }

    /// Coalesce with any same-DN pending entry, resolve against a binding
    /// snapshot, and either hand back a fully-resolved entry or park it.
    fn admit(&self, entry: TransformedEntry, raw_deps: Vec<String>) -> Admission {
        let parent_key = normalize_dn(&entry.dn);
        if parent_key.is_empty() {
            warn!("Dropping transformed entry with empty DN");
            return Admission::Rejected;
        }

        let snapshot = self.bindings.snapshot();
        let mut state = self.state.lock().unwrap();

        // Absorb an earlier pending entry for the same DN: merge its content
        // and union its dependency strings, dropping its reverse edges.
        let (entry, raw_deps) = match state.pending.remove(&parent_key) {
            Some(prior) => {
                for dep in &prior.missing_deps {
                    if let Some(parents) = state.reverse.get_mut(dep) {
                        parents.remove(&parent_key);
                        if parents.is_empty() {
                            state.reverse.remove(dep);
                        }
                    }
                }
                (
                    merge_entries(prior.entry, entry),
                    merge_deps(prior.raw_deps, raw_deps),
                )
            }
            None => (entry, raw_deps),
        };

        let (resolved, entry_missing) = render_entry(&entry, &snapshot);
        let (deps, deps_missing) = render_deps(&raw_deps, &snapshot);
        let missing_bindings = entry_missing || deps_missing;

        // Normalized deps, minus empties and the parent itself. The parent
        // is matched in both its raw and resolved forms so a templated
        // entry depending on its own DN still self-strips once bound.
        let resolved_key = normalize_dn(&resolved.dn);
        let dep_set: HashSet<String> = deps
            .iter()
            .map(|dep| normalize_dn(dep))
            .filter(|dep| !dep.is_empty() && *dep != parent_key && *dep != resolved_key)
            .collect();
        let missing_deps: HashSet<String> = dep_set
            .into_iter()
            .filter(|dep| !state.synced.contains(dep))
            .collect();

        if missing_deps.is_empty() && !missing_bindings {
            return Admission::Ready(resolved);
        }

        debug!(
            dn = %entry.dn,
            missing_deps = missing_deps.len(),
            missing_bindings,
            "Deferring entry"
        );
        for dep in &missing_deps {
            state
                .reverse
                .entry(dep.clone())
                .or_default()
                .insert(parent_key.clone());
        }
        state.pending.insert(
            parent_key,
            PendingEntry {
                entry,
                raw_deps,
                missing_deps,
            },
        );
        Admission::Deferred
    }

    /// Write one resolved entry, then propagate its sync (and any released
    /// descendants') through the dependency graph.
    async fn write_and_release(&self, resolved: TransformedEntry) {
        if let Err(e) = self.writer.apply(&resolved).await {
            error!(dn = %resolved.dn, error = %e, "Target write failed; dropping entry");
            return;
        }
        self.release_from(resolved.dn).await;
    }

    async fn release_from(&self, dn: String) {
        let mut worklist = vec![dn];
        while let Some(done) = worklist.pop() {
            for held in self.settle(&done) {
                let snapshot = self.bindings.snapshot();
                let (resolved, entry_missing) = render_entry(&held.entry, &snapshot);
                let (_, deps_missing) = render_deps(&held.raw_deps, &snapshot);
                if entry_missing || deps_missing {
                    // Deps are satisfied but bindings are not; re-admission
                    // reparks it (with whatever deps now resolve to).
                    if let Admission::Ready(resolved) = self.admit(held.entry, held.raw_deps) {
                        match self.writer.apply(&resolved).await {
                            Ok(()) => worklist.push(resolved.dn),
                            Err(e) => {
                                error!(dn = %resolved.dn, error = %e, "Target write failed; dropping entry")
                            }
                        }
                    }
                } else {
                    match self.writer.apply(&resolved).await {
                        Ok(()) => worklist.push(resolved.dn),
                        Err(e) => {
                            error!(dn = %resolved.dn, error = %e, "Target write failed; dropping entry")
                        }
                    }
                }
            }
        }
    }

    /// Insert a DN into the synced set and collect the pending entries it
    /// fully unblocks. Pure state transition, no I/O.
    fn settle(&self, dn: &str) -> Vec<PendingEntry> {
        let key = normalize_dn(dn);
        let mut state = self.state.lock().unwrap();
        if !state.synced.insert(key.clone()) {
            return Vec::new();
        }
        let parents = state.reverse.remove(&key).unwrap_or_default();
        let mut ready = Vec::new();
        for parent in parents {
            let now_ready = match state.pending.get_mut(&parent) {
                Some(held) => {
                    held.missing_deps.remove(&key);
                    held.missing_deps.is_empty()
                }
                None => false,
            };
            if now_ready {
                if let Some(held) = state.pending.remove(&parent) {
                    ready.push(held);
                }
            }
        }
        ready
    }
}

/// Coalesce a prior pending entry into an incoming one with the same DN.
/// Overlapping keys: if either side is a sequence the values are unioned
/// (first-seen order, deduplicated as strings); otherwise the incoming
/// scalar wins.
fn merge_entries(prior: TransformedEntry, incoming: TransformedEntry) -> TransformedEntry {
    let mut content = incoming.content;
    for (name, prior_value) in prior.content {
        match content.remove(&name) {
            Some(incoming_value) => {
                let merged = if prior_value.is_list() || incoming_value.is_list() {
                    let mut seen = HashSet::new();
                    let mut out = Vec::new();
                    for element in prior_value
                        .into_elements()
                        .into_iter()
                        .chain(incoming_value.into_elements())
                    {
                        if seen.insert(element.render()) {
                            out.push(element);
                        }
                    }
                    AttrValue::List(out)
                } else {
                    incoming_value
                };
                content.insert(name, merged);
            }
            None => {
                content.insert(name, prior_value);
            }
        }
    }
    TransformedEntry {
        dn: incoming.dn,
        content,
    }
}

fn merge_deps(prior: Vec<String>, incoming: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for dep in prior.into_iter().chain(incoming) {
        if seen.insert(dep.clone()) {
            out.push(dep);
        }
    }
    out
}
