//! Short code generators.

pub mod alphanumeric;
pub mod entropy;
pub mod error;

pub use alphanumeric::AlphanumericGenerator;
pub use entropy::{EntropySource, OsEntropy};
pub use error::{GenerationError, Result};

use snip_core::ShortCode;

/// Trait for generating short codes.
///
/// Implementations are pure generators that don't interact with storage:
/// uniqueness is enforced by the store, which retries on collision.
pub trait Generator: Send + Sync + 'static {
    /// Generates a candidate short code.
    fn generate(&self) -> Result<ShortCode>;
}
