// Node counters, shared across tasks as plain atomics and read as a
// consistent-enough snapshot by heartbeats and the stats endpoint.
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

#[derive(Debug)]
pub struct BrokerStats {
    started_at: Instant,
    events_ingested: AtomicU64,
    events_matched: AtomicU64,
    notifications_sent: AtomicU64,
    notifications_dropped_overflow: AtomicU64,
    decode_errors: AtomicU64,
    peers_up: AtomicU64,
    peers_down: AtomicU64,
}

/// Point-in-time view of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub events_ingested: u64,
    pub events_matched: u64,
    pub notifications_sent: u64,
    pub notifications_dropped_overflow: u64,
    pub decode_errors: u64,
    pub peers_up: u64,
    pub peers_down: u64,
    pub uptime_ms: u64,
}

impl Default for BrokerStats {
    fn default() -> Self {
        Self {
            started_at: Instant::now(),
            events_ingested: AtomicU64::new(0),
            events_matched: AtomicU64::new(0),
            notifications_sent: AtomicU64::new(0),
            notifications_dropped_overflow: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            peers_up: AtomicU64::new(0),
            peers_down: AtomicU64::new(0),
        }
    }
}

impl BrokerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_event_ingested(&self) {
        self.events_ingested.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("souk_broker_events_ingested_total").increment(1);
    }

    pub fn record_event_matched(&self) {
        self.events_matched.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("souk_broker_events_matched_total").increment(1);
    }

    pub fn record_notification_sent(&self) {
        self.notifications_sent.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("souk_broker_notifications_sent_total").increment(1);
    }

    pub fn record_notification_dropped(&self) {
        self.notifications_dropped_overflow
            .fetch_add(1, Ordering::Relaxed);
        metrics::counter!("souk_broker_notifications_dropped_total").increment(1);
    }

    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("souk_broker_decode_errors_total").increment(1);
    }

    pub fn set_peer_counts(&self, up: u64, down: u64) {
        self.peers_up.store(up, Ordering::Relaxed);
        self.peers_down.store(down, Ordering::Relaxed);
        metrics::gauge!("souk_broker_peers_up").set(up as f64);
        metrics::gauge!("souk_broker_peers_down").set(down as f64);
    }

    pub fn events_ingested(&self) -> u64 {
        self.events_ingested.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            events_ingested: self.events_ingested.load(Ordering::Relaxed),
            events_matched: self.events_matched.load(Ordering::Relaxed),
            notifications_sent: self.notifications_sent.load(Ordering::Relaxed),
            notifications_dropped_overflow: self
                .notifications_dropped_overflow
                .load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            peers_up: self.peers_up.load(Ordering::Relaxed),
            peers_down: self.peers_down.load(Ordering::Relaxed),
            uptime_ms: self.started_at.elapsed().as_millis() as u64,
        }
    }
}
