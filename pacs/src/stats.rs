//! Server statistics:
//! a single-owner registry of counters exposed as point-in-time snapshots.
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Counters for one DIMSE service.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ServiceCounters {
    pub requests: u64,
    pub completed: u64,
    pub failed: u64,
}

/// A point-in-time copy of all counters.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub connections_total: u64,
    pub connections_active: u64,
    pub connections_failed: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub instances_stored: u64,
    pub services: BTreeMap<&'static str, ServiceCounters>,
}

/// The statistics registry.
/// All mutation passes through its internal lock.
#[derive(Debug, Default)]
pub struct ServerStats {
    inner: Mutex<StatsSnapshot>,
}

impl ServerStats {
    pub fn new() -> Self {
        ServerStats::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut StatsSnapshot) -> R) -> R {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut inner)
    }

    pub fn connection_opened(&self) {
        self.with(|s| {
            s.connections_total += 1;
            s.connections_active += 1;
        });
    }

    pub fn connection_closed(&self) {
        self.with(|s| s.connections_active = s.connections_active.saturating_sub(1));
    }

    pub fn connection_failed(&self) {
        self.with(|s| s.connections_failed += 1);
    }

    pub fn bytes_received(&self, n: u64) {
        self.with(|s| s.bytes_received += n);
    }

    pub fn bytes_sent(&self, n: u64) {
        self.with(|s| s.bytes_sent += n);
    }

    pub fn instance_stored(&self) {
        self.with(|s| s.instances_stored += 1);
    }

    pub fn request(&self, service: &'static str) {
        self.with(|s| s.services.entry(service).or_default().requests += 1);
    }

    pub fn completed(&self, service: &'static str) {
        self.with(|s| s.services.entry(service).or_default().completed += 1);
    }

    pub fn failed(&self, service: &'static str) {
        self.with(|s| s.services.entry(service).or_default().failed += 1);
    }

    /// Copy out the current counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        self.with(|s| s.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = ServerStats::new();
        stats.connection_opened();
        stats.connection_opened();
        stats.connection_closed();
        stats.request("C-STORE");
        stats.request("C-STORE");
        stats.completed("C-STORE");
        stats.failed("C-STORE");
        stats.instance_stored();
        stats.bytes_received(100);
        stats.bytes_sent(42);

        let snap = stats.snapshot();
        assert_eq!(snap.connections_total, 2);
        assert_eq!(snap.connections_active, 1);
        assert_eq!(snap.instances_stored, 1);
        assert_eq!(snap.bytes_received, 100);
        assert_eq!(snap.bytes_sent, 42);
        let store = snap.services.get("C-STORE").unwrap();
        assert_eq!(store.requests, 2);
        assert_eq!(store.completed, 1);
        assert_eq!(store.failed, 1);
    }

    #[test]
    fn snapshots_are_detached_copies() {
        let stats = ServerStats::new();
        stats.connection_opened();
        let before = stats.snapshot();
        stats.connection_opened();
        assert_eq!(before.connections_total, 1);
        assert_eq!(stats.snapshot().connections_total, 2);
    }
}
