use crate::entropy::{EntropySource, OsEntropy};
use crate::error::{GenerationError, Result};
use crate::Generator;
use snip_core::shortcode::{ALPHABET, DEFAULT_LENGTH};
use snip_core::ShortCode;

const MAX_LENGTH: usize = 32;

/// Bytes at or above this bound are rejected so that `byte % 62` stays uniform.
const REJECTION_BOUND: u8 = (u8::MAX / ALPHABET.len() as u8) * ALPHABET.len() as u8;

/// Generates fixed-length codes drawn uniformly from `[a-zA-Z0-9]`.
///
/// Randomness comes from an [`EntropySource`], the OS CSPRNG by default.
/// The generator holds no mutable state and is safe to share between tasks.
#[derive(Debug, Clone)]
pub struct AlphanumericGenerator<S = OsEntropy> {
    source: S,
    length: usize,
}

impl AlphanumericGenerator<OsEntropy> {
    /// Creates a generator producing [`DEFAULT_LENGTH`]-character codes.
    pub fn new() -> Self {
        Self {
            source: OsEntropy,
            length: DEFAULT_LENGTH,
        }
    }
}

impl Default for AlphanumericGenerator<OsEntropy> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: EntropySource> AlphanumericGenerator<S> {
    /// Creates a generator with a custom entropy source and code length.
    pub fn with_source(source: S, length: usize) -> Result<Self> {
        if length == 0 || length > MAX_LENGTH {
            return Err(GenerationError::InvalidLength {
                length,
                max: MAX_LENGTH,
            });
        }
        Ok(Self { source, length })
    }

    pub fn length(&self) -> usize {
        self.length
    }

    fn next_code(&self) -> Result<String> {
        let mut code = String::with_capacity(self.length);
        // Twice the target length keeps the expected number of refills low
        // given a rejection rate of 8/256.
        let mut buf = vec![0u8; self.length * 2];

        while code.len() < self.length {
            self.source.fill(&mut buf)?;
            for &byte in buf.iter().filter(|&&b| b < REJECTION_BOUND) {
                code.push(ALPHABET[(byte % ALPHABET.len() as u8) as usize] as char);
                if code.len() == self.length {
                    break;
                }
            }
        }

        Ok(code)
    }
}

impl<S: EntropySource + 'static> Generator for AlphanumericGenerator<S> {
    fn generate(&self) -> Result<ShortCode> {
        self.next_code().map(ShortCode::new_unchecked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entropy::test_entropy::{FailingEntropy, ReplayEntropy};
    use std::collections::HashSet;

    #[test]
    fn rejection_bound_is_largest_multiple_of_alphabet() {
        assert_eq!(REJECTION_BOUND, 248);
    }

    #[test]
    fn default_codes_are_eight_alphanumerics() {
        let generator = AlphanumericGenerator::new();

        for _ in 0..100 {
            let code = generator.generate().unwrap();
            assert_eq!(code.as_str().len(), 8);
            assert!(code.as_str().bytes().all(|b| b.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn codes_are_not_repeated() {
        let generator = AlphanumericGenerator::new();
        let codes: HashSet<_> = (0..1_000).map(|_| generator.generate().unwrap()).collect();
        assert_eq!(codes.len(), 1_000);
    }

    #[test]
    fn maps_bytes_onto_alphabet() {
        // 0 -> 'a', 26 -> 'A', 61 -> '9', 62 wraps to 'a'
        let generator =
            AlphanumericGenerator::with_source(ReplayEntropy::new(vec![0, 26, 61, 62]), 4).unwrap();
        assert_eq!(generator.generate().unwrap().as_str(), "aA9a");
    }

    #[test]
    fn skips_bytes_above_rejection_bound() {
        let generator =
            AlphanumericGenerator::with_source(ReplayEntropy::new(vec![248, 255, 1, 250, 2]), 2)
                .unwrap();
        assert_eq!(generator.generate().unwrap().as_str(), "bc");
    }

    #[test]
    fn entropy_failure_is_reported() {
        let generator = AlphanumericGenerator::with_source(FailingEntropy, 8).unwrap();
        let err = generator.generate().unwrap_err();
        assert!(matches!(err, GenerationError::Entropy(_)));
    }

    #[test]
    fn rejects_invalid_length() {
        assert!(AlphanumericGenerator::with_source(OsEntropy, 0).is_err());
        assert!(AlphanumericGenerator::with_source(OsEntropy, 33).is_err());
        assert!(AlphanumericGenerator::with_source(OsEntropy, 32).is_ok());
    }

    #[test]
    fn generator_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<AlphanumericGenerator>();
    }
}
