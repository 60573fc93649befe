use crate::error::{GenerationError, Result};
use rand::rngs::OsRng;
use rand::TryRngCore;

/// A source of random bytes.
pub trait EntropySource: Send + Sync {
    /// Fills `buf` entirely with random bytes.
    fn fill(&self, buf: &mut [u8]) -> Result<()>;
}

/// The operating system's cryptographically secure random number generator.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsEntropy;

impl EntropySource for OsEntropy {
    fn fill(&self, buf: &mut [u8]) -> Result<()> {
        OsRng
            .try_fill_bytes(buf)
            .map_err(|e| GenerationError::Entropy(e.to_string()))
    }
}

#[cfg(test)]
pub(crate) mod test_entropy {
    use super::EntropySource;
    use crate::error::{GenerationError, Result};
    use std::sync::Mutex;

    /// Replays a fixed byte sequence, cycling when exhausted.
    pub(crate) struct ReplayEntropy {
        bytes: Vec<u8>,
        cursor: Mutex<usize>,
    }

    impl ReplayEntropy {
        pub(crate) fn new(bytes: Vec<u8>) -> Self {
            Self {
                bytes,
                cursor: Mutex::new(0),
            }
        }
    }

    impl EntropySource for ReplayEntropy {
        fn fill(&self, buf: &mut [u8]) -> Result<()> {
            let mut cursor = self.cursor.lock().unwrap();
            for byte in buf.iter_mut() {
                *byte = self.bytes[*cursor % self.bytes.len()];
                *cursor += 1;
            }
            Ok(())
        }
    }

    pub(crate) struct FailingEntropy;

    impl EntropySource for FailingEntropy {
        fn fill(&self, _buf: &mut [u8]) -> Result<()> {
            Err(GenerationError::Entropy("device not ready".to_string()))
        }
    }
}
