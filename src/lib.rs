pub mod app;
pub mod config;
pub mod domain;
pub mod http;
pub mod infra;

use anyhow::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::app::composer::{Composer, ResetPolicy};
use crate::app::identity::{IdentityProvider, TokenIdentity};
use crate::config::{AppConfig, BlobBackend, StoreBackend};
use crate::domain::session::Session;
use crate::infra::db::{Db, PgDocumentStore};
use crate::infra::memory::MemoryStore;
use crate::infra::storage::ObjectStorage;
use crate::infra::store::{BlobStore, DocumentStore};
use crate::infra::widgets::WidgetsClient;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub identity: Arc<dyn IdentityProvider>,
    pub widgets: WidgetsClient,
    pub reset_policy: ResetPolicy,
    pub upload_max_bytes: usize,
    composer_idle: Duration,
    composers: Arc<Mutex<HashMap<String, ComposerSlot>>>,
}

struct ComposerSlot {
    composer: Arc<Composer>,
    last_used: Instant,
}

impl ComposerSlot {
    /// Nobody else holds the composer and it has sat unused for `idle`.
    fn is_stale(&self, idle: Duration) -> bool {
        Arc::strong_count(&self.composer) == 1
            && !self.composer.is_submitting()
            && self.last_used.elapsed() >= idle
    }
}

const DEFAULT_COMPOSER_IDLE: Duration = Duration::from_secs(15 * 60);

impl AppState {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BlobStore>,
        identity: Arc<dyn IdentityProvider>,
        widgets: WidgetsClient,
        reset_policy: ResetPolicy,
        upload_max_bytes: usize,
    ) -> Self {
        Self {
            store,
            blobs,
            identity,
            widgets,
            reset_policy,
            upload_max_bytes,
            composer_idle: DEFAULT_COMPOSER_IDLE,
            composers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// How long an unused composer is kept before `composer_for` evicts it.
    pub fn with_composer_idle(mut self, idle: Duration) -> Self {
        self.composer_idle = idle;
        self
    }

    /// The signed-in user's composer; one per user so submissions stay single-flight.
    pub fn composer_for(&self, session: &Session) -> Arc<Composer> {
        let mut composers = self
            .composers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let before = composers.len();
        composers.retain(|user_id, slot| {
            user_id == &session.user_id || !slot.is_stale(self.composer_idle)
        });
        if composers.len() < before {
            debug!(evicted = before - composers.len(), "evicted idle composers");
        }

        let slot = composers
            .entry(session.user_id.clone())
            .or_insert_with(|| ComposerSlot {
                composer: Arc::new(Composer::new(
                    self.store.clone(),
                    self.blobs.clone(),
                    self.reset_policy,
                )),
                last_used: Instant::now(),
            });
        slot.last_used = Instant::now();
        slot.composer.clone()
    }

    pub fn composer_count(&self) -> usize {
        self.composers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn drop_composer(&self, session: &Session) {
        self.composers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&session.user_id);
    }

    /// Wires the configured backends.
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let memory = MemoryStore::new(&config.public_base_url)?;

        let store: Arc<dyn DocumentStore> = match config.store_backend {
            StoreBackend::Memory => Arc::new(memory.clone()),
            StoreBackend::Postgres => {
                let db = Db::connect(config).await?;
                db.migrate().await?;
                db.ping().await?;
                Arc::new(PgDocumentStore::new(db))
            }
        };
        let blobs: Arc<dyn BlobStore> = match config.blob_backend {
            BlobBackend::Memory => Arc::new(memory),
            BlobBackend::S3 => Arc::new(ObjectStorage::new(config).await?),
        };
        info!(
            store = ?config.store_backend,
            blobs = ?config.blob_backend,
            "backends ready"
        );

        Ok(Self::new(
            store,
            blobs,
            Arc::new(TokenIdentity::new(config.session_key, config.session_ttl_hours)),
            WidgetsClient::new(config)?,
            config.composer_reset_policy,
            config.upload_max_bytes,
        )
        .with_composer_idle(Duration::from_secs(config.composer_idle_seconds)))
    }
}
