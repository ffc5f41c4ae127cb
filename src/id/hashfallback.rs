//! Hash fallback generator (component C).
//!
//! Grounded on `enterprise::ratelimit`'s typed-result/attempt-counting
//! idiom (`RateLimitResult`, `Decision`): each attempt either succeeds or
//! is rejected with a reason, and the caller can observe how many
//! collisions it took.

use std::sync::Arc;

use chrono::Utc;
use log::warn;
use serde::{Deserialize, Serialize};
use sha2::Digest;

use crate::codec::base62;
use crate::store::MappingRepository;

use super::IdError;

/// Hash algorithm used to derive a candidate short code from the input URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashAlgo {
    Md5,
    Sha256,
}

impl HashAlgo {
    fn hex_digest(self, input: &str) -> String {
        match self {
            HashAlgo::Md5 => format!("{:x}", md5::compute(input.as_bytes())),
            HashAlgo::Sha256 => {
                let mut hasher = sha2::Sha256::new();
                hasher.update(input.as_bytes());
                hex::encode(hasher.finalize())
            }
        }
    }
}

/// Outcome of a successful [`HashFallbackGenerator::generate`] call.
#[derive(Debug, Clone)]
pub struct HashGenerationResult {
    pub short_code: String,
    /// Number of prior attempts that collided before this one succeeded.
    pub collisions: u32,
}

/// Derives short codes by hashing `input ‖ attempt ‖ salt ‖ timestamp`,
/// retrying on store collision up to `max_retries` times.
pub struct HashFallbackGenerator<R: MappingRepository> {
    store: Arc<R>,
    algo: HashAlgo,
    min_len: usize,
    max_retries: u32,
    salt: String,
}

impl<R: MappingRepository> HashFallbackGenerator<R> {
    pub fn new(
        store: Arc<R>,
        algo: HashAlgo,
        min_len: usize,
        max_retries: u32,
        salt: String,
    ) -> Self {
        Self {
            store,
            algo,
            min_len,
            max_retries,
            salt,
        }
    }

    pub async fn generate(&self, input: &str) -> Result<HashGenerationResult, IdError> {
        let mut collisions = 0u32;

        for attempt in 1..=self.max_retries {
            let composed = format!(
                "{}#{}#{}#{}",
                input,
                attempt,
                self.salt,
                Utc::now().timestamp_nanos_opt().unwrap_or_default()
            );
            let digest = self.algo.hex_digest(&composed);
            let first_ten = &digest[..digest.len().min(10)];
            let numeric = u64::from_str_radix(first_ten, 16).unwrap_or_else(|_| {
                // Defensive: a hex digest of length <= 16 always parses; this
                // branch only exists in case a future algo changes that.
                first_ten.bytes().map(|b| b as u64).sum()
            });

            let candidate = base62::encode(numeric, self.min_len);

            match self.store.alias_exists(&candidate).await {
                Ok(false) => {
                    return Ok(HashGenerationResult {
                        short_code: candidate,
                        collisions,
                    });
                }
                Ok(true) => {
                    collisions += 1;
                    warn!(
                        "hash fallback collision on attempt {} for candidate {}",
                        attempt, candidate
                    );
                }
                Err(e) => {
                    return Err(IdError::Store(e.to_string()));
                }
            }
        }

        Err(IdError::HashExhausted(self.max_retries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    #[tokio::test]
    async fn generates_a_code_of_the_requested_minimum_length() {
        let store = Arc::new(MemoryStore::new());
        let gen = HashFallbackGenerator::new(
            store,
            HashAlgo::Sha256,
            7,
            3,
            "salt".to_string(),
        );

        let result = gen.generate("https://example.com/y").await.unwrap();
        assert_eq!(result.short_code.len(), 7);
        assert!(base62::is_valid(&result.short_code));
    }

    #[tokio::test]
    async fn md5_and_sha256_both_produce_valid_candidates() {
        let store = Arc::new(MemoryStore::new());
        for algo in [HashAlgo::Md5, HashAlgo::Sha256] {
            let gen = HashFallbackGenerator::new(store.clone(), algo, 7, 3, "s".to_string());
            let result = gen.generate("https://example.com/z").await.unwrap();
            assert!(base62::is_valid(&result.short_code));
        }
    }
}
