use crate::config::{redact_dsn, BackendKind, StoreConfig};
use crate::journal::JournalStore;
use crate::memory::MemoryStore;
use crate::postgres::PostgresStore;
use async_trait::async_trait;
use snip_core::{LoadedUrl, Result, ShortCode, Shortened, Store, UserUrlEntry};
use tracing::info;

/// A store whose backend was chosen at startup.
pub enum AnyStore {
    Memory(MemoryStore),
    Journal(JournalStore),
    Postgres(PostgresStore),
}

impl AnyStore {
    pub fn kind(&self) -> BackendKind {
        match self {
            AnyStore::Memory(_) => BackendKind::Memory,
            AnyStore::Journal(_) => BackendKind::Journal,
            AnyStore::Postgres(_) => BackendKind::Postgres,
        }
    }

    fn inner(&self) -> &dyn Store {
        match self {
            AnyStore::Memory(store) => store,
            AnyStore::Journal(store) => store,
            AnyStore::Postgres(store) => store,
        }
    }
}

/// Builds and bootstraps the backend selected by `config`.
///
/// Failing to reach the database or to create its schema is fatal; there is
/// no fallback to a weaker backend.
pub async fn open_store(config: &StoreConfig) -> Result<AnyStore> {
    let store = if let Some(settings) = &config.postgres {
        info!(dsn = %redact_dsn(&settings.dsn), "Opening PostgreSQL store");
        AnyStore::Postgres(PostgresStore::connect(settings).await?)
    } else if let Some(path) = &config.file_storage_path {
        info!(path = %path.display(), "Opening journal store");
        AnyStore::Journal(JournalStore::open(path).await?)
    } else {
        info!("Opening in-memory store");
        AnyStore::Memory(MemoryStore::new())
    };

    store.bootstrap().await?;
    Ok(store)
}

#[async_trait]
impl Store for AnyStore {
    async fn save(&self, owner_id: &str, url: &str, base_url: &str) -> Result<Shortened> {
        self.inner().save(owner_id, url, base_url).await
    }

    async fn save_batch(
        &self,
        owner_id: &str,
        urls: &[String],
        base_url: &str,
    ) -> Result<Vec<Shortened>> {
        self.inner().save_batch(owner_id, urls, base_url).await
    }

    async fn load_full(&self, code: &ShortCode) -> Result<LoadedUrl> {
        self.inner().load_full(code).await
    }

    async fn load_user_urls(&self, owner_id: &str, base_url: &str) -> Result<Vec<UserUrlEntry>> {
        self.inner().load_user_urls(owner_id, base_url).await
    }

    async fn delete_batch(&self, owner_id: &str, codes: &[ShortCode]) -> Result<u64> {
        self.inner().delete_batch(owner_id, codes).await
    }

    async fn ping(&self) -> Result<()> {
        self.inner().ping().await
    }

    async fn close(&self) -> Result<()> {
        self.inner().close().await
    }

    async fn bootstrap(&self) -> Result<()> {
        self.inner().bootstrap().await
    }
}
