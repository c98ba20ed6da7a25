//! The search scheduler: one cancellable polling loop per live search.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use dirsync_common::{SearchSpec, SourceEntry};

use crate::detector::{ChangeDetector, Observation};
use crate::hooks::HookDispatcher;
use crate::ldap::SourceClient;

/// Spawn the polling loop for one search.
///
/// Each iteration runs one subtree search over a fresh connection and feeds
/// every result through the change detector. Failures log and wait one
/// refresh interval: no backoff, no attempt cap, and the result cache is
/// untouched. The token is checked before each poll and interrupts the
/// sleep between polls; a oneshot search stops after its first iteration.
pub fn spawn_search(
    spec: SearchSpec,
    base_dn: String,
    source: Arc<dyn SourceClient>,
    detector: Arc<ChangeDetector>,
    dispatcher: Arc<HookDispatcher>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            id = %spec.id,
            filter = %spec.filter,
            base_dn = %base_dn,
            oneshot = spec.oneshot,
            "Search task started"
        );
        loop {
            if cancel.is_cancelled() {
                break;
            }
            match source.search(&base_dn, &spec.filter).await {
                Ok(entries) => {
                    debug!(id = %spec.id, count = entries.len(), "Search returned");
                    for entry in entries {
                        observe(&spec, &detector, &dispatcher, entry);
                    }
                }
                Err(e) => {
                    warn!(id = %spec.id, error = %e, "Source search failed; retrying after refresh interval");
                }
            }
            if spec.oneshot {
                break;
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(Duration::from_secs(spec.refresh)) => {}
            }
        }
        info!(id = %spec.id, "Search task stopped");
    })
}

fn observe(
    spec: &SearchSpec,
    detector: &ChangeDetector,
    dispatcher: &Arc<HookDispatcher>,
    entry: SourceEntry,
) {
    match detector.observe(&spec.id, &entry) {
        Observation::Unchanged => {
            debug!(id = %spec.id, dn = %entry.dn, "Entry unchanged");
            return;
        }
        Observation::New => debug!(id = %spec.id, dn = %entry.dn, "New entry"),
        Observation::Changed => debug!(id = %spec.id, dn = %entry.dn, "Entry changed"),
    }
    // Oneshot searches populate the result cache but never fan out.
    if spec.oneshot {
        return;
    }
    dispatcher.dispatch(entry);
}
