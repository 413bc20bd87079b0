//! Injectable wall-clock time, so the publisher's `startTimeMs`/`requestUptimeMs`
//! math is deterministic under a virtual-time test scheduler.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::Utc;

pub trait DateProvider: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemDateProvider;

impl DateProvider for SystemDateProvider {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Test double whose clock only moves when told to. Re-stubbing it after a
/// component has already read `startTimeMs` is intentionally supported, even
/// though it can make `requestUptimeMs` go negative — see the design notes
/// on the publisher's uptime calculation.
#[derive(Debug)]
pub struct VirtualDateProvider {
    now_ms: AtomicI64,
}

impl VirtualDateProvider {
    pub fn new(initial_ms: i64) -> Arc<Self> {
        Arc::new(VirtualDateProvider {
            now_ms: AtomicI64::new(initial_ms),
        })
    }

    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance_ms(&self, delta_ms: i64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl DateProvider for VirtualDateProvider {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virtual_provider_only_moves_when_told() {
        let provider = VirtualDateProvider::new(1_000);
        assert_eq!(provider.now_ms(), 1_000);
        provider.advance_ms(500);
        assert_eq!(provider.now_ms(), 1_500);
        provider.set(0);
        assert_eq!(provider.now_ms(), 0);
    }
}
