use crate::error::CoreError;
use serde::{Deserialize, Deserializer, Serialize};
use smol_str::SmolStr;
use std::fmt::Display;
use std::str::FromStr;

/// The alphabet generated short codes are drawn from.
pub const ALPHABET: &[u8; 62] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Length of generated short codes.
pub const DEFAULT_LENGTH: usize = 8;

const MIN_LENGTH: usize = 1;
const MAX_LENGTH: usize = 32;

/// A validated short code identifying a stored URL.
///
/// Short codes are 1-32 ASCII alphanumeric characters. Generated codes are
/// always [`DEFAULT_LENGTH`] characters long; the wider range only matters
/// for codes arriving from callers.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ShortCode(SmolStr);

impl ShortCode {
    /// Creates a new `ShortCode` after validating the input.
    pub fn new(code: impl AsRef<str>) -> Result<Self, CoreError> {
        let code = code.as_ref();
        Self::validate(code)?;
        Ok(Self(SmolStr::new(code)))
    }

    /// Creates a `ShortCode` without validation.
    ///
    /// Use this only for codes produced by trusted internal sources
    /// (generators, rows read back from a store).
    pub fn new_unchecked(code: impl AsRef<str>) -> Self {
        Self(SmolStr::new(code.as_ref()))
    }

    /// Generates the fully-qualified short URL for the given base URL.
    ///
    /// The base URL may or may not end with `/`.
    pub fn to_url(&self, base_url: &str) -> String {
        format!("{}/{}", base_url.trim_end_matches('/'), self)
    }

    /// Returns the short code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(code: &str) -> Result<(), CoreError> {
        if code.len() < MIN_LENGTH || code.len() > MAX_LENGTH {
            return Err(CoreError::InvalidShortCode(format!(
                "length must be between {} and {}, got {}",
                MIN_LENGTH,
                MAX_LENGTH,
                code.len()
            )));
        }

        if !code.bytes().all(|c| c.is_ascii_alphanumeric()) {
            return Err(CoreError::InvalidShortCode(format!(
                "must contain only alphanumeric characters: '{}'",
                code
            )));
        }

        Ok(())
    }
}

impl FromStr for ShortCode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl<'de> Deserialize<'de> for ShortCode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = SmolStr::deserialize(deserializer)?;
        Self::new(&raw).map_err(serde::de::Error::custom)
    }
}

impl Display for ShortCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
