use crate::allocation::{allocate, Attempt};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use jiff::Timestamp;
use snip_core::{
    LoadedUrl, Result, ShortCode, Shortened, Store, StoreError, UrlRecord, UserUrlEntry,
};
use snip_generator::{AlphanumericGenerator, Generator};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Process-local store over two sharded maps: code to record, and original
/// URL to code.
///
/// A single save holds the URL entry while it claims the code slot, so
/// "insert if code and URL are both absent" is atomic and concurrent saves
/// only contend on the shards they touch. Locks are always taken in that
/// order and never across code generation.
///
/// Batches are staged privately and published only once every URL has a
/// code. The `commit` gate keeps single saves (shared) and batches
/// (exclusive) apart, so nobody observes a batch that later fails.
/// Contents are lost when the store is dropped.
#[derive(Debug)]
pub struct MemoryStore<G = AlphanumericGenerator> {
    records: DashMap<ShortCode, UrlRecord>,
    by_url: DashMap<String, ShortCode>,
    commit: RwLock<()>,
    generator: G,
}

/// Records allocated by an in-flight batch, invisible to other callers.
#[derive(Default)]
struct StagedBatch {
    records: Vec<UrlRecord>,
    by_url: HashMap<String, ShortCode>,
}

impl MemoryStore<AlphanumericGenerator> {
    /// Creates an empty store generating 8-character codes.
    pub fn new() -> Self {
        Self::with_generator(AlphanumericGenerator::new())
    }
}

impl Default for MemoryStore<AlphanumericGenerator> {
    fn default() -> Self {
        Self::new()
    }
}

impl<G: Generator> MemoryStore<G> {
    /// Creates an empty store using a custom code generator.
    pub fn with_generator(generator: G) -> Self {
        Self {
            records: DashMap::new(),
            by_url: DashMap::new(),
            commit: RwLock::new(()),
            generator,
        }
    }

    /// Returns the number of records, tombstoned ones included.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn try_insert(&self, code: &ShortCode, url: &str, owner_id: &str) -> Attempt {
        match self.by_url.entry(url.to_owned()) {
            Entry::Occupied(existing) => Attempt::UrlTaken(existing.get().clone()),
            Entry::Vacant(url_slot) => match self.records.entry(code.clone()) {
                Entry::Occupied(_) => Attempt::CodeTaken,
                Entry::Vacant(code_slot) => {
                    code_slot.insert(UrlRecord::new(code.clone(), url, owner_id));
                    url_slot.insert(code.clone());
                    Attempt::Inserted
                }
            },
        }
    }

    /// Claims a code for `url` in `staged` without touching the shared maps.
    ///
    /// Only sound while the `commit` gate is held exclusively.
    fn try_stage(
        &self,
        staged: &mut StagedBatch,
        code: &ShortCode,
        url: &str,
        owner_id: &str,
    ) -> Attempt {
        let known = self
            .by_url
            .get(url)
            .map(|existing| existing.value().clone())
            .or_else(|| staged.by_url.get(url).cloned());
        if let Some(existing) = known {
            return Attempt::UrlTaken(existing);
        }
        if self.records.contains_key(code) || staged.records.iter().any(|r| &r.code == code) {
            return Attempt::CodeTaken;
        }

        staged.by_url.insert(url.to_owned(), code.clone());
        staged
            .records
            .push(UrlRecord::new(code.clone(), url, owner_id));
        Attempt::Inserted
    }

    fn publish(&self, staged: StagedBatch) {
        for record in staged.records {
            self.by_url
                .insert(record.original_url.clone(), record.code.clone());
            self.records.insert(record.code.clone(), record);
        }
    }
}

#[async_trait]
impl<G: Generator> Store for MemoryStore<G> {
    async fn save(&self, owner_id: &str, url: &str, base_url: &str) -> Result<Shortened> {
        let _commit = self.commit.read().await;
        let allocation = allocate(&self.generator, url, |code| {
            Ok(self.try_insert(code, url, owner_id))
        })?;
        Ok(allocation.into_shortened(base_url))
    }

    async fn save_batch(
        &self,
        owner_id: &str,
        urls: &[String],
        base_url: &str,
    ) -> Result<Vec<Shortened>> {
        let _commit = self.commit.write().await;
        let mut staged = StagedBatch::default();
        let mut results = Vec::with_capacity(urls.len());

        for url in urls {
            let allocation = allocate(&self.generator, url, |code| {
                Ok(self.try_stage(&mut staged, code, url, owner_id))
            })
            .inspect_err(|e| {
                warn!(
                    error = %e,
                    discarded = staged.records.len(),
                    "Batch save failed, discarding staged records"
                );
            })?;
            results.push(allocation.into_shortened(base_url));
        }

        self.publish(staged);
        Ok(results)
    }

    async fn load_full(&self, code: &ShortCode) -> Result<LoadedUrl> {
        let Some(record) = self.records.get(code) else {
            return Err(StoreError::NotFound(code.to_string()));
        };

        Ok(LoadedUrl {
            original_url: record.original_url.clone(),
            is_deleted: record.is_deleted,
        })
    }

    async fn load_user_urls(&self, owner_id: &str, base_url: &str) -> Result<Vec<UserUrlEntry>> {
        if owner_id.is_empty() {
            return Ok(Vec::new());
        }

        let _commit = self.commit.read().await;
        let mut owned: Vec<UrlRecord> = self
            .records
            .iter()
            .filter(|entry| entry.is_owned_by(owner_id) && !entry.is_deleted)
            .map(|entry| entry.value().clone())
            .collect();
        owned.sort_by(|a, b| (a.created_at, &a.code).cmp(&(b.created_at, &b.code)));

        Ok(owned
            .iter()
            .map(|record| record.to_user_entry(base_url))
            .collect())
    }

    async fn delete_batch(&self, owner_id: &str, codes: &[ShortCode]) -> Result<u64> {
        if owner_id.is_empty() {
            return Ok(0);
        }

        let now = Timestamp::now();
        let mut deleted = 0;

        for code in codes {
            let Some(mut record) = self.records.get_mut(code) else {
                continue;
            };
            if !record.is_owned_by(owner_id) {
                debug!(code = %code, "Skipping delete of code owned by another user");
                continue;
            }
            if record.tombstone(now) {
                deleted += 1;
            }
        }

        Ok(deleted)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    async fn bootstrap(&self) -> Result<()> {
        Ok(())
    }
}
