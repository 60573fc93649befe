use snip_core::{Result, ShortCode, Shortened, StoreError, MAX_ALLOCATION_ATTEMPTS};
use snip_generator::Generator;
use tracing::{debug, warn};

/// The result of one atomic "insert if code and URL absent" step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Attempt {
    /// The record was inserted under the candidate code.
    Inserted,
    /// The candidate code is already in use; nothing was written.
    CodeTaken,
    /// The URL is already stored under the given code; nothing was written.
    UrlTaken(ShortCode),
}

/// The code a URL ended up with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Allocation {
    Created(ShortCode),
    Existing(ShortCode),
}

impl Allocation {
    pub(crate) fn into_shortened(self, base_url: &str) -> Shortened {
        match self {
            Allocation::Created(code) => Shortened::Created(code.to_url(base_url)),
            Allocation::Existing(code) => Shortened::Conflict(code.to_url(base_url)),
        }
    }
}

/// Runs the retry loop shared by the in-process backends.
///
/// Each iteration draws a fresh code and hands it to `try_insert`. A code
/// collision retries with a new code, a known URL short-circuits with the
/// existing code. Generation failures are not retried.
pub(crate) fn allocate<G, F>(generator: &G, url: &str, mut try_insert: F) -> Result<Allocation>
where
    G: Generator,
    F: FnMut(&ShortCode) -> Result<Attempt>,
{
    for attempt in 1..=MAX_ALLOCATION_ATTEMPTS {
        let code = generator.generate()?;

        match try_insert(&code)? {
            Attempt::Inserted => return Ok(Allocation::Created(code)),
            Attempt::UrlTaken(existing) => {
                warn!(code = %existing, url, "URL already shortened, returning existing code");
                return Ok(Allocation::Existing(existing));
            }
            Attempt::CodeTaken => {
                debug!(code = %code, attempt, "Short code collision, retrying");
            }
        }
    }

    warn!(url, "Failed to allocate a unique short code");
    Err(StoreError::AllocationExhausted {
        attempts: MAX_ALLOCATION_ATTEMPTS,
    })
}

#[cfg(test)]
pub(crate) mod test_generator {
    use snip_core::ShortCode;
    use snip_generator::{GenerationError, Generator, Result};
    use std::sync::Mutex;

    /// Hands out a fixed list of codes, then fails.
    pub(crate) struct ScriptedGenerator {
        codes: Mutex<std::vec::IntoIter<&'static str>>,
    }

    impl ScriptedGenerator {
        pub(crate) fn new(codes: Vec<&'static str>) -> Self {
            Self {
                codes: Mutex::new(codes.into_iter()),
            }
        }
    }

    impl Generator for ScriptedGenerator {
        fn generate(&self) -> Result<ShortCode> {
            self.codes
                .lock()
                .unwrap()
                .next()
                .map(ShortCode::new_unchecked)
                .ok_or_else(|| GenerationError::Entropy("script exhausted".to_string()))
        }
    }
}
