//! Wire types and record framing shared by the journaling tracker and the
//! publisher half of the usage-analytics pipeline.
//!
//! This crate owns only the envelope: the length-delimited on-disk record
//! format (`framing`) and the JSON body posted to the collector (`types`).
//! The event *payload* itself is opaque bytes the host produces with its own
//! serializer; this crate never inspects it.

pub mod framing;
pub mod types;
pub mod varint;

pub use framing::{read_all_events, read_event, write_event};
pub use types::{
    ClientInfo, ClientType, LogEvent, LogRequest, LogRequestEvent, MetaMetricsPayload, LOG_SOURCE,
    META_CATEGORY, META_KIND,
};
