//! Host-facing logging seam.
//!
//! The host's own application logger is an external collaborator (see crate
//! docs): this crate never raises errors to the caller from a logging
//! failure, and it never assumes the host runs a `tracing` subscriber. Every
//! internal call site emits both a `tracing` event (for operators who do
//! capture it) and, where the design calls for reporting to the host, a
//! message through the [`Logger`] trait the host supplies.

/// Four severities, matching the design's `error/warning/info/verbose` host
/// logger contract.
pub trait Logger: Send + Sync {
    fn error(&self, message: &str);
    fn warning(&self, message: &str);
    fn info(&self, message: &str);
    fn verbose(&self, message: &str);
}

/// Default [`Logger`] that forwards to `tracing`, for hosts that don't wire
/// up their own sink.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn error(&self, message: &str) {
        tracing::error!("{message}");
    }

    fn warning(&self, message: &str) {
        tracing::warn!("{message}");
    }

    fn info(&self, message: &str) {
        tracing::info!("{message}");
    }

    fn verbose(&self, message: &str) {
        tracing::debug!("{message}");
    }
}
