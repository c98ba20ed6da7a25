pub mod bindings;
pub mod detector;
pub mod hooks;
pub mod ldap;
pub mod registry;
pub mod resolver;
pub mod scheduler;
pub mod writer;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

use std::sync::Arc;

pub use bindings::BindingStore;
pub use detector::{ChangeDetector, Observation};
pub use hooks::HookDispatcher;
pub use ldap::{LdapSourceClient, SourceClient};
pub use registry::{SearchRegistry, SpecStore};
pub use resolver::Resolver;
pub use writer::{DirectoryWriter, LdapTargetWriter};

use dirsync_common::HookRetryConfig;

/// The fully wired engine components for one process.
pub struct SyncEngine {
    pub bindings: Arc<BindingStore>,
    pub detector: Arc<ChangeDetector>,
    pub resolver: Arc<Resolver>,
    pub dispatcher: Arc<HookDispatcher>,
    pub registry: Arc<SearchRegistry>,
}

impl SyncEngine {
    /// Wire the component graph: scheduler → detector → dispatcher →
    /// (bindings, resolver, registry) → writer. The dispatcher's weak
    /// registry reference is attached last.
    pub fn build(
        hooks: Vec<String>,
        retry: HookRetryConfig,
        default_base_dn: String,
        source: Arc<dyn SourceClient>,
        writer: Arc<dyn DirectoryWriter>,
        store: Option<Arc<dyn SpecStore>>,
    ) -> Self {
        let bindings = Arc::new(BindingStore::new());
        let detector = Arc::new(ChangeDetector::new());
        let resolver = Arc::new(Resolver::new(Arc::clone(&bindings), writer));
        let dispatcher = Arc::new(HookDispatcher::new(
            hooks,
            retry,
            Arc::clone(&resolver),
            Arc::clone(&bindings),
            Arc::clone(&detector),
        ));
        let registry = Arc::new(SearchRegistry::new(
            source,
            Arc::clone(&detector),
            Arc::clone(&dispatcher),
            store,
            default_base_dn,
        ));
        dispatcher.attach_registry(&registry);
        Self {
            bindings,
            detector,
            resolver,
            dispatcher,
            registry,
        }
    }
}
