//! Analytics query cache (component L): memoizes expensive aggregated
//! reports with report-type-specific TTLs and targeted invalidation.

pub mod query_cache;

pub use query_cache::{cache_key, AnalyticsQueryCache, ReportKind};
