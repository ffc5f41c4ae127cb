//! Click event wire format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single redirect click, as produced by the request router and consumed
/// by the aggregation consumer. Field names match the bus wire format
/// (`camelCase`), not Rust convention.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClickEvent {
    pub event_id: String,
    pub short_code: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub browser: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
}

impl ClickEvent {
    pub fn new(short_code: String) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            short_code,
            timestamp: Utc::now(),
            ip_address: None,
            user_agent: None,
            referrer: None,
            country_code: None,
            region: None,
            city: None,
            device_type: None,
            browser: None,
            os: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_format_uses_camel_case_field_names() {
        let event = ClickEvent::new("abc1234".to_string());
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"shortCode\""));
        assert!(json.contains("\"eventId\""));
        assert!(!json.contains("short_code"));
    }

    #[test]
    fn round_trips_through_json() {
        let mut event = ClickEvent::new("abc1234".to_string());
        event.referrer = Some("https://news.example.com/story".to_string());

        let json = serde_json::to_string(&event).unwrap();
        let back: ClickEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, back);
    }
}
