use crate::error::{Result, StoreError};
use crate::record::{LoadedUrl, Shortened, UserUrlEntry};
use crate::shortcode::ShortCode;
use async_trait::async_trait;

/// Maximum number of codes tried before an allocation gives up.
pub const MAX_ALLOCATION_ATTEMPTS: usize = 5;

/// The storage contract shared by every backend.
///
/// All operations take the owner explicitly. `base_url` is the prefix used
/// to build fully-qualified short URLs; it may or may not end with `/`.
///
/// Operations are cancel-safe in the sense that dropping the returned future
/// never leaves a partially applied batch behind.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Allocates a code for `url`, or returns the existing one as
    /// [`Shortened::Conflict`] when the URL is already stored.
    async fn save(&self, owner_id: &str, url: &str, base_url: &str) -> Result<Shortened>;

    /// Saves every URL or none of them.
    ///
    /// The result has one entry per input URL, in input order. URLs that are
    /// already stored, including duplicates within the batch, come back as
    /// [`Shortened::Conflict`].
    async fn save_batch(
        &self,
        owner_id: &str,
        urls: &[String],
        base_url: &str,
    ) -> Result<Vec<Shortened>>;

    /// Resolves a code, including tombstoned records.
    ///
    /// Returns [`StoreError::NotFound`] if the code was never allocated.
    async fn load_full(&self, code: &ShortCode) -> Result<LoadedUrl>;

    /// Lists the live short URLs owned by `owner_id`.
    async fn load_user_urls(&self, owner_id: &str, base_url: &str) -> Result<Vec<UserUrlEntry>>;

    /// Tombstones the given codes owned by `owner_id`.
    ///
    /// Codes that are absent, owned by someone else, or already deleted are
    /// skipped silently. Returns the number of records newly tombstoned.
    async fn delete_batch(&self, owner_id: &str, codes: &[ShortCode]) -> Result<u64>;

    /// Checks that the backend is reachable.
    async fn ping(&self) -> Result<()>;

    /// Releases backend resources.
    async fn close(&self) -> Result<()>;

    /// Creates the schema or other resources the backend needs.
    async fn bootstrap(&self) -> Result<()>;

    /// Resolves a code to its original URL.
    ///
    /// Returns [`StoreError::Gone`] for tombstoned records.
    async fn resolve(&self, code: &ShortCode) -> Result<String> {
        let loaded = self.load_full(code).await?;
        if loaded.is_deleted {
            return Err(StoreError::Gone(code.to_string()));
        }
        Ok(loaded.original_url)
    }
}
