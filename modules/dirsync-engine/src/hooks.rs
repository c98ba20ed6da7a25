//! The hook dispatcher.
//!
//! Every New/Changed emission is JSON-encoded and POSTed to each configured
//! hook URL on its own fire-and-forget task. Only transport errors retry;
//! HTTP error statuses are decoded like any other body. Decoded responses
//! route bindings to the binding store, transformed entries to the
//! resolver, derived specs to the registry, and `reset` to the detector.

use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use rand::Rng;
use serde_json::json;
use tracing::{debug, error, info, warn};

use dirsync_common::{HookResponse, HookRetryConfig, SourceEntry};

use crate::bindings::BindingStore;
use crate::detector::ChangeDetector;
use crate::registry::SearchRegistry;
use crate::resolver::Resolver;

pub struct HookDispatcher {
    client: reqwest::Client,
    hooks: Vec<String>,
    retry: HookRetryConfig,
    resolver: Arc<Resolver>,
    bindings: Arc<BindingStore>,
    detector: Arc<ChangeDetector>,
    /// Weak: registry-spawned search tasks hold this dispatcher, so the
    /// back-reference must not keep the registry alive.
    registry: RwLock<Weak<SearchRegistry>>,
}

impl HookDispatcher {
    pub fn new(
        hooks: Vec<String>,
        retry: HookRetryConfig,
        resolver: Arc<Resolver>,
        bindings: Arc<BindingStore>,
        detector: Arc<ChangeDetector>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            hooks,
            retry,
            resolver,
            bindings,
            detector,
            registry: RwLock::new(Weak::new()),
        }
    }

    /// Installed once during bootstrap, after the registry exists.
    pub fn attach_registry(&self, registry: &Arc<SearchRegistry>) {
        *self.registry.write().unwrap() = Arc::downgrade(registry);
    }

    /// Fan one emission out to every hook, one task per (emission, URL).
    pub fn dispatch(self: &Arc<Self>, entry: SourceEntry) {
        let payload = json!({ "dn": entry.dn, "content": entry.content });
        for url in &self.hooks {
            let dispatcher = Arc::clone(self);
            let url = url.clone();
            let payload = payload.clone();
            tokio::spawn(async move {
                dispatcher.dispatch_one(&url, &payload).await;
            });
        }
    }

    async fn dispatch_one(&self, url: &str, payload: &serde_json::Value) {
        let body = match self.post_with_retry(url, payload).await {
            Ok(body) => body,
            Err(e) => {
                error!(url = %url, error = %e, "Hook unreachable after retries; dropping emission");
                return;
            }
        };
        let responses = match HookResponse::parse_many(&body) {
            Ok(responses) => responses,
            Err(e) => {
                warn!(url = %url, error = %e, "Undecodable hook response; dropping");
                return;
            }
        };
        for response in responses {
            self.apply_response(url, response).await;
        }
    }

    /// Transport errors retry up to `max_retries` times with doubling,
    /// capped, ±10%-jittered delays. Any HTTP response ends the attempt
    /// loop and its body is handed to the decoder.
    async fn post_with_retry(
        &self,
        url: &str,
        payload: &serde_json::Value,
    ) -> Result<String, reqwest::Error> {
        let mut delay = Duration::from_millis(self.retry.initial_delay_ms);
        let max_delay = Duration::from_millis(self.retry.max_delay_ms);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.client.post(url).json(payload).send().await {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        warn!(url = %url, status = %status, "Hook returned error status");
                    }
                    return response.text().await;
                }
                Err(e) if attempt <= self.retry.max_retries => {
                    warn!(url = %url, attempt, error = %e, "Hook POST failed; retrying");
                    tokio::time::sleep(jitter(delay)).await;
                    delay = (delay * 2).min(max_delay);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn apply_response(&self, url: &str, response: HookResponse) {
        if !response.bindings.is_empty() {
            debug!(url = %url, count = response.bindings.len(), "Hook published bindings");
            if self.bindings.update(&response.bindings) {
                self.resolver.reprocess_pending().await;
            }
        }

        for entry in response.transformed {
            self.resolver
                .handle_entry(entry, response.dependencies.clone())
                .await;
        }

        for spec in response.derived {
            let registry = self.registry.read().unwrap().upgrade();
            match registry {
                Some(registry) => {
                    if let Err(e) = registry.upsert(spec.clone()).await {
                        warn!(id = %spec.id, error = %e, "Derived search rejected");
                    }
                }
                None => warn!(id = %spec.id, "No registry attached; dropping derived search"),
            }
        }

        if response.reset {
            info!(url = %url, "Hook requested reset; clearing every result cache");
            self.detector.clear_all();
        }
    }
}

fn jitter(delay: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.9..=1.1);
    delay.mul_f64(factor)
}
