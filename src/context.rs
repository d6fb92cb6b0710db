//! Shared per-process state handed to every handler and worker.

use crate::{
    auth::Auth,
    config::SiteConfig,
    keys::KeyStore,
    pubsub::PubSub,
    storage::Storage,
    vault::TokenVault,
    webpush::PushTask,
};
use moka::sync::Cache;
use reqwest_middleware::ClientWithMiddleware;
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tracing::warn;

/// Inbound activity ids are remembered for a 24 h sliding window; a repeat
/// within the window is dropped as a duplicate.
const DEDUP_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);
const DEDUP_CAPACITY: u64 = 100_000;

/// Bounded hand-off to the web-push worker; the queue is the back-pressure
/// boundary, requests never spawn sends directly.
const PUSH_QUEUE_CAPACITY: usize = 1024;

struct Inner {
    config: SiteConfig,
    storage: Storage,
    client: ClientWithMiddleware,
    pubsub: PubSub,
    auth: Auth,
    keys: KeyStore,
    dedup: Cache<String, ()>,
    push_tx: mpsc::Sender<PushTask>,
}

/// Cheaply cloneable handle; one per process.
#[derive(Clone)]
pub struct AppContext {
    inner: Arc<Inner>,
}

impl AppContext {
    /// Build the context. The returned receiver feeds
    /// [crate::webpush::run_push_worker].
    pub fn new(config: SiteConfig, storage: Storage) -> (Self, mpsc::Receiver<PushTask>) {
        let totp_vault = TokenVault::new(&config.totp_vault_key);
        let keys_vault = TokenVault::new(&config.vapid_vault_key);
        let (push_tx, push_rx) = mpsc::channel(PUSH_QUEUE_CAPACITY);
        let context = AppContext {
            inner: Arc::new(Inner {
                // At most 3 redirects on actor fetches and deliveries.
                client: reqwest::Client::builder()
                    .redirect(reqwest::redirect::Policy::limited(3))
                    .build()
                    .expect("client construction with static options")
                    .into(),
                pubsub: PubSub::new(),
                auth: Auth::new(storage.clone(), totp_vault),
                keys: KeyStore::new(storage.clone(), keys_vault),
                dedup: Cache::builder()
                    .max_capacity(DEDUP_CAPACITY)
                    .time_to_idle(DEDUP_WINDOW)
                    .build(),
                push_tx,
                config,
                storage,
            }),
        };
        (context, push_rx)
    }

    pub fn config(&self) -> &SiteConfig {
        &self.inner.config
    }

    pub fn storage(&self) -> &Storage {
        &self.inner.storage
    }

    pub fn client(&self) -> &ClientWithMiddleware {
        &self.inner.client
    }

    pub fn pubsub(&self) -> &PubSub {
        &self.inner.pubsub
    }

    pub fn auth(&self) -> &Auth {
        &self.inner.auth
    }

    pub fn keys(&self) -> &KeyStore {
        &self.inner.keys
    }

    /// True when this activity id was processed inside the dedup window.
    pub fn is_duplicate_activity(&self, activity_id: &str) -> bool {
        self.inner.dedup.contains_key(activity_id)
    }

    /// Record an activity id after it has been applied; the sliding window
    /// restarts from now.
    pub fn remember_activity(&self, activity_id: &str) {
        self.inner.dedup.insert(activity_id.to_string(), ());
    }

    /// Schedule a web-push send. Lossy under pressure.
    pub fn queue_push(&self, task: PushTask) {
        if let Err(e) = self.inner.push_tx.try_send(task) {
            warn!("web push queue full, dropping task: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_remembers_ids() {
        let config = SiteConfig::builder()
            .base_url(url::Url::parse("https://baud.example").unwrap())
            .totp_vault_key([1; 32])
            .vapid_vault_key([2; 32])
            .build()
            .unwrap();
        let storage = Storage::open_in_memory().unwrap();
        let (ctx, _rx) = AppContext::new(config, storage);
        assert!(!ctx.is_duplicate_activity("https://remote.example/activities/42"));
        ctx.remember_activity("https://remote.example/activities/42");
        assert!(ctx.is_duplicate_activity("https://remote.example/activities/42"));
        assert!(!ctx.is_duplicate_activity("https://remote.example/activities/43"));
    }
}
