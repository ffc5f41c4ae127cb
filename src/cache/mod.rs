//! Multi-layer cache: process-local LRU (E), distributed Redis adapter (F),
//! and the waterfall lookup that ties them to the authoritative store (G).

pub mod distributed;
pub mod local;
pub mod lookup;
pub mod memory_distributed;

pub use distributed::{DistributedCache, DistributedCacheLayer};
pub use local::LocalCache;
pub use lookup::{LookupSource, MultiLayerLookup};
pub use memory_distributed::MemoryDistributedCache;
