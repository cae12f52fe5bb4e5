// Peer-link bookkeeping for the broker mesh. Each configured peer has a
// state machine driven by connect results, heartbeats and timeouts; the
// transport layer registers an outbound sender while a link is up.
use souk_wire::BrokerMessage;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

const INITIAL_BACKOFF_MS: u64 = 500;
const MAX_BACKOFF_MS: u64 = 30_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Disconnected,
    Connecting,
    Up,
    Down,
    Closed,
}

#[derive(Debug)]
struct PeerLink {
    state: PeerState,
    // Broker id learned from the first heartbeat on the link.
    broker_id: Option<String>,
    last_heartbeat_ms: Option<i64>,
    backoff_ms: u64,
    sender: Option<mpsc::Sender<BrokerMessage>>,
}

impl PeerLink {
    fn new() -> Self {
        Self {
            state: PeerState::Disconnected,
            broker_id: None,
            last_heartbeat_ms: None,
            backoff_ms: INITIAL_BACKOFF_MS,
            sender: None,
        }
    }
}

/// All peer links of one broker, keyed by the configured endpoint.
#[derive(Debug, Default, Clone)]
pub struct PeerTable {
    links: Arc<Mutex<HashMap<String, PeerLink>>>,
}

impl PeerTable {
    pub fn new(endpoints: &[String]) -> Self {
        let links = endpoints
            .iter()
            .map(|endpoint| (endpoint.clone(), PeerLink::new()))
            .collect();
        Self {
            links: Arc::new(Mutex::new(links)),
        }
    }

    pub fn endpoints(&self) -> Vec<String> {
        self.links.lock().expect("peer lock").keys().cloned().collect()
    }

    /// Registers a link that was not configured up front (an inbound mesh
    /// connection from a peer that dialed us).
    pub fn add_link(&self, endpoint: &str) {
        self.links
            .lock()
            .expect("peer lock")
            .entry(endpoint.to_string())
            .or_insert_with(PeerLink::new);
    }

    /// Forgets a link entirely (inbound connection torn down).
    pub fn remove_link(&self, endpoint: &str) {
        self.links.lock().expect("peer lock").remove(endpoint);
    }

    pub fn state(&self, endpoint: &str) -> Option<PeerState> {
        self.links
            .lock()
            .expect("peer lock")
            .get(endpoint)
            .map(|l| l.state)
    }

    /// Marks an outbound connect attempt. Returns the backoff to sleep on
    /// failure, or `None` when the link is closed and should not retry.
    pub fn connect_started(&self, endpoint: &str) -> Option<()> {
        let mut links = self.links.lock().expect("peer lock");
        let link = links.get_mut(endpoint)?;
        if link.state == PeerState::Closed {
            return None;
        }
        link.state = PeerState::Connecting;
        Some(())
    }

    /// Transition to UP with a live outbound sender.
    pub fn connected(&self, endpoint: &str, sender: mpsc::Sender<BrokerMessage>) {
        let mut links = self.links.lock().expect("peer lock");
        let Some(link) = links.get_mut(endpoint) else {
            return;
        };
        if link.state == PeerState::Closed {
            return;
        }
        link.state = PeerState::Up;
        link.backoff_ms = INITIAL_BACKOFF_MS;
        link.last_heartbeat_ms = Some(souk_common::now_ms());
        link.sender = Some(sender);
        tracing::info!(peer = endpoint, "peer link up");
    }

    /// Connection lost; doubles the retry backoff (capped at 30 s) and
    /// returns the delay to wait before reconnecting.
    pub fn disconnected(&self, endpoint: &str) -> u64 {
        let mut links = self.links.lock().expect("peer lock");
        let Some(link) = links.get_mut(endpoint) else {
            return MAX_BACKOFF_MS;
        };
        if link.state != PeerState::Closed {
            link.state = PeerState::Disconnected;
        }
        link.sender = None;
        let backoff = link.backoff_ms;
        link.backoff_ms = (link.backoff_ms * 2).min(MAX_BACKOFF_MS);
        backoff
    }

    /// Records a heartbeat from the remote broker; revives a DOWN link.
    pub fn heartbeat(&self, endpoint: &str, broker_id: &str) {
        let mut links = self.links.lock().expect("peer lock");
        let Some(link) = links.get_mut(endpoint) else {
            return;
        };
        link.broker_id = Some(broker_id.to_string());
        link.last_heartbeat_ms = Some(souk_common::now_ms());
        if link.state == PeerState::Down {
            link.state = PeerState::Up;
            tracing::info!(peer = endpoint, broker_id, "peer recovered");
        }
    }

    /// Sweeps for links whose heartbeats went quiet; UP links past the
    /// timeout go DOWN (summaries are retained, delivery is dropped).
    pub fn sweep_timeouts(&self, timeout_ms: i64) {
        let now = souk_common::now_ms();
        let mut links = self.links.lock().expect("peer lock");
        for (endpoint, link) in links.iter_mut() {
            if link.state != PeerState::Up {
                continue;
            }
            let quiet = link
                .last_heartbeat_ms
                .map(|last| now - last > timeout_ms)
                .unwrap_or(true);
            if quiet {
                link.state = PeerState::Down;
                tracing::warn!(peer = %endpoint, "peer marked down after missed heartbeats");
            }
        }
    }

    /// Shutdown: no further reconnects.
    pub fn close_all(&self) {
        let mut links = self.links.lock().expect("peer lock");
        for link in links.values_mut() {
            link.state = PeerState::Closed;
            link.sender = None;
        }
    }

    /// Sends a message towards the peer that owns `broker_id`. Messages to
    /// DOWN or unknown peers are dropped, per overlay policy.
    pub fn send_to_broker(&self, broker_id: &str, message: BrokerMessage) -> bool {
        let sender = {
            let links = self.links.lock().expect("peer lock");
            links
                .values()
                .find(|l| l.state == PeerState::Up && l.broker_id.as_deref() == Some(broker_id))
                .and_then(|l| l.sender.clone())
        };
        match sender {
            Some(sender) => sender.try_send(message).is_ok(),
            None => false,
        }
    }

    /// Sends a message on one specific link, if it is UP.
    pub fn send_to_endpoint(&self, endpoint: &str, message: BrokerMessage) -> bool {
        let sender = {
            let links = self.links.lock().expect("peer lock");
            links
                .get(endpoint)
                .filter(|l| l.state == PeerState::Up)
                .and_then(|l| l.sender.clone())
        };
        match sender {
            Some(sender) => sender.try_send(message).is_ok(),
            None => false,
        }
    }

    /// Broadcasts a message on every UP link (subscription summaries).
    pub fn broadcast(&self, message: &BrokerMessage) -> usize {
        let senders: Vec<mpsc::Sender<BrokerMessage>> = {
            let links = self.links.lock().expect("peer lock");
            links
                .values()
                .filter(|l| l.state == PeerState::Up)
                .filter_map(|l| l.sender.clone())
                .collect()
        };
        senders
            .into_iter()
            .filter(|sender| sender.try_send(message.clone()).is_ok())
            .count()
    }

    /// (up, down) counts for the stats gauges.
    pub fn counts(&self) -> (u64, u64) {
        let links = self.links.lock().expect("peer lock");
        let up = links.values().filter(|l| l.state == PeerState::Up).count() as u64;
        let down = links
            .values()
            .filter(|l| matches!(l.state, PeerState::Down | PeerState::Disconnected))
            .count() as u64;
        (up, down)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use souk_wire::BrokerHeartbeat;

    fn heartbeat_msg(broker_id: &str) -> BrokerMessage {
        BrokerMessage::heartbeat(BrokerHeartbeat {
            broker_id: broker_id.into(),
            status: "healthy".into(),
            active_subscriptions: 0,
            processed_events: 0,
        })
    }

    #[test]
    fn lifecycle_transitions() {
        let table = PeerTable::new(&["peer-a:7000".to_string()]);
        assert_eq!(table.state("peer-a:7000"), Some(PeerState::Disconnected));

        table.connect_started("peer-a:7000").expect("retryable");
        assert_eq!(table.state("peer-a:7000"), Some(PeerState::Connecting));

        let (tx, _rx) = mpsc::channel(4);
        table.connected("peer-a:7000", tx);
        assert_eq!(table.state("peer-a:7000"), Some(PeerState::Up));

        table.close_all();
        assert_eq!(table.state("peer-a:7000"), Some(PeerState::Closed));
        assert!(table.connect_started("peer-a:7000").is_none());
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let table = PeerTable::new(&["peer-a:7000".to_string()]);
        let mut last = 0;
        for _ in 0..10 {
            last = table.disconnected("peer-a:7000");
        }
        assert_eq!(last, MAX_BACKOFF_MS);
        // A successful connect resets the ladder.
        let (tx, _rx) = mpsc::channel(4);
        table.connected("peer-a:7000", tx);
        assert_eq!(table.disconnected("peer-a:7000"), INITIAL_BACKOFF_MS);
    }

    #[test]
    fn quiet_link_goes_down_and_recovers() {
        let table = PeerTable::new(&["peer-a:7000".to_string()]);
        let (tx, _rx) = mpsc::channel(4);
        table.connected("peer-a:7000", tx);
        table.heartbeat("peer-a:7000", "broker-1");

        // A negative timeout makes any heartbeat look stale.
        table.sweep_timeouts(-1);
        assert_eq!(table.state("peer-a:7000"), Some(PeerState::Down));
        let (up, down) = table.counts();
        assert_eq!((up, down), (0, 1));

        table.heartbeat("peer-a:7000", "broker-1");
        assert_eq!(table.state("peer-a:7000"), Some(PeerState::Up));
    }

    #[tokio::test]
    async fn routing_targets_the_owning_broker() {
        let table = PeerTable::new(&["peer-a:7000".to_string(), "peer-b:7000".to_string()]);
        let (tx_a, mut rx_a) = mpsc::channel(4);
        let (tx_b, mut rx_b) = mpsc::channel(4);
        table.connected("peer-a:7000", tx_a);
        table.connected("peer-b:7000", tx_b);
        table.heartbeat("peer-a:7000", "broker-1");
        table.heartbeat("peer-b:7000", "broker-2");

        assert!(table.send_to_broker("broker-2", heartbeat_msg("me")));
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_a.try_recv().is_err());

        // Unknown broker is a silent drop.
        assert!(!table.send_to_broker("broker-9", heartbeat_msg("me")));
    }

    #[tokio::test]
    async fn broadcast_skips_down_links() {
        let table = PeerTable::new(&["peer-a:7000".to_string(), "peer-b:7000".to_string()]);
        let (tx_a, mut rx_a) = mpsc::channel(4);
        table.connected("peer-a:7000", tx_a);
        // peer-b never connected.
        let delivered = table.broadcast(&heartbeat_msg("me"));
        assert_eq!(delivered, 1);
        assert!(rx_a.try_recv().is_ok());
    }
}
