//! IP geolocation enrichment (component K): non-blocking cached lookups
//! backed by a rate-limited external resolver queue.

pub mod enricher;

pub use enricher::{GeoIpEnricher, GeoIpProvider, GeoLocation, HttpGeoIpProvider};
