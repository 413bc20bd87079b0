//! Wire types shared between the journaling tracker and the publisher.
//!
//! The event *payload* format is owned by the host (see crate docs); these
//! types only describe the envelope this crate itself controls: the
//! length-delimited on-disk record and the JSON body posted to the collector.

use serde::{Deserialize, Serialize};

/// Fixed log source identifier sent with every upload.
pub const LOG_SOURCE: &str = "DESKTOP_TOOL_USAGE_ANALYTICS";

pub const META_CATEGORY: &str = "META";
pub const META_KIND: &str = "META_METRICS";

/// A single spooled record: a timestamp plus an opaque, host-serialized payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    pub event_time_ms: i64,
    pub payload: Vec<u8>,
}

impl LogEvent {
    pub fn new(event_time_ms: i64, payload: Vec<u8>) -> Self {
        Self {
            event_time_ms,
            payload,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientType {
    Desktop,
}

/// Fixed client identity attached to every upload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub os_name: String,
    pub os_major_version: String,
    pub os_full_version: String,
    pub client_type: ClientType,
    pub logging_id: String,
}

/// The wire representation of one event inside a [`LogRequest`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LogRequestEvent {
    pub event_time_ms: i64,
    pub payload: Vec<u8>,
}

impl From<LogEvent> for LogRequestEvent {
    fn from(event: LogEvent) -> Self {
        LogRequestEvent {
            event_time_ms: event.event_time_ms,
            payload: event.payload,
        }
    }
}

/// The request body the publisher POSTs to the collector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LogRequest {
    pub client_info: ClientInfo,
    pub log_source: String,
    pub request_time_ms: i64,
    pub request_uptime_ms: i64,
    pub log_events: Vec<LogRequestEvent>,
}

/// The synthetic meta-metric event prepended to every upload, describing the
/// publisher's own health since its last successful upload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MetaMetricsPayload {
    pub category: String,
    pub kind: String,
    pub bytes_sent_in_last_upload: u64,
    pub failed_connections: u32,
    pub failed_server_replies: u32,
}

impl MetaMetricsPayload {
    pub fn new(
        bytes_sent_in_last_upload: u64,
        failed_connections: u32,
        failed_server_replies: u32,
    ) -> Self {
        MetaMetricsPayload {
            category: META_CATEGORY.to_string(),
            kind: META_KIND.to_string(),
            bytes_sent_in_last_upload,
            failed_connections,
            failed_server_replies,
        }
    }

    /// Serializes this meta-metric as a [`LogEvent`] payload (JSON bytes).
    pub fn into_log_event(self, event_time_ms: i64) -> serde_json::Result<LogEvent> {
        let payload = serde_json::to_vec(&self)?;
        Ok(LogEvent::new(event_time_ms, payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_metrics_round_trips_through_json() {
        let meta = MetaMetricsPayload::new(128, 1, 2);
        let event = meta.clone().into_log_event(42).unwrap();
        assert_eq!(event.event_time_ms, 42);
        let decoded: MetaMetricsPayload = serde_json::from_slice(&event.payload).unwrap();
        assert_eq!(decoded, meta);
    }
}
