use crate::shortcode::ShortCode;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};

/// One shortening held by a store.
///
/// A record is created once, on successful allocation, and afterwards only
/// ever transitions to the tombstoned state. Stores hand out clones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UrlRecord {
    pub code: ShortCode,
    pub original_url: String,
    /// Opaque owner identifier. Empty for anonymous submissions.
    pub owner_id: String,
    pub is_deleted: bool,
    pub created_at: Timestamp,
    pub deleted_at: Option<Timestamp>,
}

impl UrlRecord {
    /// Creates a live record stamped with the current time.
    pub fn new(code: ShortCode, original_url: impl Into<String>, owner_id: impl Into<String>) -> Self {
        Self {
            code,
            original_url: original_url.into(),
            owner_id: owner_id.into(),
            is_deleted: false,
            created_at: Timestamp::now(),
            deleted_at: None,
        }
    }

    /// Returns true if `owner_id` may tombstone this record.
    pub fn is_owned_by(&self, owner_id: &str) -> bool {
        self.owner_id == owner_id
    }

    /// Marks the record deleted.
    ///
    /// Returns `false` when the record was already tombstoned; the original
    /// deletion time is kept in that case.
    pub fn tombstone(&mut self, at: Timestamp) -> bool {
        if self.is_deleted {
            return false;
        }
        self.is_deleted = true;
        self.deleted_at = Some(at);
        true
    }

    /// Projects the record for an owner listing.
    pub fn to_user_entry(&self, base_url: &str) -> UserUrlEntry {
        UserUrlEntry {
            short_url: self.code.to_url(base_url),
            original_url: self.original_url.clone(),
        }
    }
}

/// A listing entry for one of an owner's live short URLs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserUrlEntry {
    pub short_url: String,
    pub original_url: String,
}

/// The outcome of a successful save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shortened {
    /// A new code was allocated for the URL.
    Created(String),
    /// The URL was already stored; carries the existing short URL.
    Conflict(String),
}

impl Shortened {
    /// Returns the fully-qualified short URL.
    pub fn short_url(&self) -> &str {
        match self {
            Shortened::Created(url) | Shortened::Conflict(url) => url,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Shortened::Conflict(_))
    }

    pub fn into_short_url(self) -> String {
        match self {
            Shortened::Created(url) | Shortened::Conflict(url) => url,
        }
    }
}

/// A resolved code, tombstoned or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedUrl {
    pub original_url: String,
    pub is_deleted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use jiff::SignedDuration;

    fn record() -> UrlRecord {
        UrlRecord::new(ShortCode::new_unchecked("abc12345"), "https://example.com", "u1")
    }

    #[test]
    fn new_record_is_live() {
        let record = record();
        assert!(!record.is_deleted);
        assert_eq!(record.deleted_at, None);
        assert!(record.is_owned_by("u1"));
        assert!(!record.is_owned_by("u2"));
    }

    #[test]
    fn tombstone_is_terminal() {
        let mut record = record();
        let first = Timestamp::now();
        let later = first + SignedDuration::from_secs(60);

        assert!(record.tombstone(first));
        assert!(!record.tombstone(later));
        assert!(record.is_deleted);
        assert_eq!(record.deleted_at, Some(first));
    }

    #[test]
    fn user_entry_uses_base_url() {
        let entry = record().to_user_entry("http://x/");
        assert_eq!(entry.short_url, "http://x/abc12345");
        assert_eq!(entry.original_url, "https://example.com");
    }

    #[test]
    fn shortened_accessors() {
        let created = Shortened::Created("http://x/a".to_string());
        let conflict = Shortened::Conflict("http://x/b".to_string());

        assert!(!created.is_conflict());
        assert!(conflict.is_conflict());
        assert_eq!(created.short_url(), "http://x/a");
        assert_eq!(conflict.into_short_url(), "http://x/b");
    }
}
