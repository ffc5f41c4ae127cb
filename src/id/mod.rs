//! Short-code minting: counter allocator (B), hash fallback (C), and the
//! circuit-breaker-guarded ID service (D) that routes between them.

pub mod circuit;
pub mod counter;
pub mod hashfallback;
pub mod service;

pub use circuit::{CircuitBreaker, CircuitState};
pub use counter::CounterAllocator;
pub use hashfallback::HashFallbackGenerator;
pub use service::{IdService, MintOutcome, MintSource};

use thiserror::Error;

/// Errors raised while minting a short code, before conversion into
/// [`crate::error::AppError`] at the public API boundary.
#[derive(Error, Debug, Clone)]
pub enum IdError {
    #[error("store error reserving id range: {0}")]
    Store(String),

    #[error("hash fallback exhausted after {0} attempts")]
    HashExhausted(u32),

    #[error("id service unavailable: both counter and hash fallback failed")]
    Unavailable,

    #[error("custom alias {0:?} is reserved")]
    AliasReserved(String),

    #[error("custom alias {0:?} does not match the allowed pattern")]
    AliasInvalid(String),

    #[error("custom alias {0:?} is already taken")]
    AliasTaken(String),
}
