//! The search registry: the in-memory table of live searches and their
//! scheduler tasks, used by the REST layer and by derived-search
//! processing.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use dirsync_common::{SearchSpec, SyncError};

use crate::detector::ChangeDetector;
use crate::hooks::HookDispatcher;
use crate::ldap::SourceClient;
use crate::scheduler::spawn_search;

/// Durable storage for search specs. Registry writes are best-effort: a
/// failed store write logs and the in-memory operation still succeeds.
#[async_trait]
pub trait SpecStore: Send + Sync {
    async fn upsert(&self, spec: &SearchSpec) -> Result<(), SyncError>;
    async fn remove(&self, id: &str) -> Result<(), SyncError>;
    async fn load_all(&self) -> Result<Vec<SearchSpec>, SyncError>;
}

struct ActiveSearch {
    spec: SearchSpec,
    cancel: CancellationToken,
}

pub struct SearchRegistry {
    searches: RwLock<HashMap<String, ActiveSearch>>,
    source: Arc<dyn SourceClient>,
    detector: Arc<ChangeDetector>,
    dispatcher: Arc<HookDispatcher>,
    store: Option<Arc<dyn SpecStore>>,
    default_base_dn: String,
}

impl SearchRegistry {
    pub fn new(
        source: Arc<dyn SourceClient>,
        detector: Arc<ChangeDetector>,
        dispatcher: Arc<HookDispatcher>,
        store: Option<Arc<dyn SpecStore>>,
        default_base_dn: String,
    ) -> Self {
        Self {
            searches: RwLock::new(HashMap::new()),
            source,
            detector,
            dispatcher,
            store,
            default_base_dn,
        }
    }

    /// Register a new search and start its scheduler task. Fails when the
    /// id already exists.
    pub async fn create(&self, spec: SearchSpec) -> Result<(), SyncError> {
        spec.validate()?;
        {
            let mut searches = self.searches.write().unwrap();
            if searches.contains_key(&spec.id) {
                return Err(SyncError::Validation(format!(
                    "search '{}' already exists",
                    spec.id
                )));
            }
            self.start_locked(&mut searches, spec.clone());
        }
        self.persist(&spec).await;
        Ok(())
    }

    /// Replace an existing search: cancel its task, start a fresh one with
    /// the new parameters. The result cache is preserved across updates.
    pub async fn replace(&self, spec: SearchSpec) -> Result<(), SyncError> {
        spec.validate()?;
        {
            let mut searches = self.searches.write().unwrap();
            let Some(prior) = searches.remove(&spec.id) else {
                return Err(SyncError::Validation(format!(
                    "search '{}' does not exist",
                    spec.id
                )));
            };
            prior.cancel.cancel();
            self.start_locked(&mut searches, spec.clone());
        }
        self.persist(&spec).await;
        Ok(())
    }

    /// Create-or-replace, used for hook-derived searches.
    pub async fn upsert(&self, spec: SearchSpec) -> Result<(), SyncError> {
        spec.validate()?;
        {
            let mut searches = self.searches.write().unwrap();
            if let Some(prior) = searches.remove(&spec.id) {
                info!(id = %spec.id, "Re-deriving existing search");
                prior.cancel.cancel();
            }
            self.start_locked(&mut searches, spec.clone());
        }
        self.persist(&spec).await;
        Ok(())
    }

    /// Cancel and unregister a search, dropping its result cache.
    pub async fn remove(&self, id: &str) -> Result<(), SyncError> {
        let removed = { self.searches.write().unwrap().remove(id) };
        let Some(active) = removed else {
            return Err(SyncError::Validation(format!(
                "search '{id}' does not exist"
            )));
        };
        active.cancel.cancel();
        self.detector.drop_cache(id);
        if let Some(store) = &self.store {
            if let Err(e) = store.remove(id).await {
                warn!(id = %id, error = %e, "Deleting persisted search failed");
            }
        }
        info!(id = %id, "Search removed");
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<SearchSpec> {
        self.searches
            .read()
            .unwrap()
            .get(id)
            .map(|active| active.spec.clone())
    }

    pub fn list(&self) -> Vec<SearchSpec> {
        let mut specs: Vec<SearchSpec> = self
            .searches
            .read()
            .unwrap()
            .values()
            .map(|active| active.spec.clone())
            .collect();
        specs.sort_by(|a, b| a.id.cmp(&b.id));
        specs
    }

    /// Prime the registry from persisted rows and start each task.
    pub async fn load_persisted(&self) -> Result<usize, SyncError> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        let specs = store.load_all().await?;
        let mut started = 0;
        let mut searches = self.searches.write().unwrap();
        for spec in specs {
            if let Err(e) = spec.validate() {
                warn!(id = %spec.id, error = %e, "Skipping invalid persisted search");
                continue;
            }
            self.start_locked(&mut searches, spec);
            started += 1;
        }
        Ok(started)
    }

    /// Cancel every running search task.
    pub fn shutdown(&self) {
        let mut searches = self.searches.write().unwrap();
        for (_, active) in searches.drain() {
            active.cancel.cancel();
        }
    }

    fn start_locked(&self, searches: &mut HashMap<String, ActiveSearch>, spec: SearchSpec) {
        self.detector.ensure_cache(&spec.id);
        let cancel = CancellationToken::new();
        let base_dn = spec
            .base_dn
            .clone()
            .unwrap_or_else(|| self.default_base_dn.clone());
        // The handle is dropped: the token is the task's lifecycle signal.
        let _task = spawn_search(
            spec.clone(),
            base_dn,
            Arc::clone(&self.source),
            Arc::clone(&self.detector),
            Arc::clone(&self.dispatcher),
            cancel.clone(),
        );
        searches.insert(spec.id.clone(), ActiveSearch { spec, cancel });
    }

    async fn persist(&self, spec: &SearchSpec) {
        if let Some(store) = &self.store {
            if let Err(e) = store.upsert(spec).await {
                warn!(id = %spec.id, error = %e, "Persisting search failed; continuing in memory");
            }
        }
    }
}
