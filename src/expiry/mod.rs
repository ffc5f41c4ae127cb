//! Expiry lifecycle manager (component J): scheduled soft-expire and
//! hard-delete sweeps with batched cache invalidation.

pub mod manager;

pub use manager::{ExpiryManager, SweepConfig, SweepStats};
