// Transport-free broker core: one matcher task owns the subscription
// index and window state (single-writer), while ingress, egress, peer and
// timer tasks talk to it through the command channel.
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};

mod dedup;
mod egress;
mod peer;
mod stats;

pub use dedup::DedupCache;
pub use egress::{EgressRegistry, OverflowPolicy, PushOutcome, SubscriberQueue};
pub use peer::{PeerState, PeerTable};
pub use stats::{BrokerStats, StatsSnapshot};

use souk_matcher::{MatcherStats, RegisterError, SubscriptionMatcher, UnregisterError};
use souk_wire::{BrokerHeartbeat, BrokerMessage, Event, Notification, Subscription};

/// Commands accepted by the matcher task.
#[derive(Debug)]
pub enum Command {
    /// An event from publisher ingress, matched in arrival order.
    Event(Event),
    /// Register a subscription. Local registrations (`announce=true`) are
    /// summarised to peers; summaries arriving from peers are not.
    Subscribe {
        subscription: Subscription,
        announce: bool,
        reply: Option<oneshot::Sender<Result<String, RegisterError>>>,
    },
    /// Remove a subscription, optionally propagating to peers.
    Unsubscribe {
        subscription_id: String,
        announce: bool,
        reply: Option<oneshot::Sender<Result<(), UnregisterError>>>,
    },
    /// A notification forwarded by a peer for one of our subscribers.
    Deliver(Notification),
    /// Matcher statistics for heartbeats and status replies.
    Stats {
        reply: oneshot::Sender<MatcherStats>,
    },
    /// Re-announce every locally-registered subscription to peers; sent
    /// when a peer link comes up.
    AnnounceLocal,
    /// A subscriber's egress connection closed: its subscriptions are
    /// destroyed (the client replays them on reconnect).
    DropSubscriber { subscriber_id: String },
}

/// Shared broker state reachable from every endpoint task.
#[derive(Debug)]
pub struct BrokerCore {
    broker_id: String,
    stats: BrokerStats,
    egress: EgressRegistry,
    peers: PeerTable,
    dedup: Mutex<DedupCache>,
}

impl BrokerCore {
    pub fn new(
        broker_id: impl Into<String>,
        egress_queue_cap: usize,
        overflow_policy: OverflowPolicy,
        dedup_cache_size: usize,
        peer_endpoints: &[String],
    ) -> Arc<Self> {
        Arc::new(Self {
            broker_id: broker_id.into(),
            stats: BrokerStats::new(),
            egress: EgressRegistry::new(egress_queue_cap, overflow_policy),
            peers: PeerTable::new(peer_endpoints),
            dedup: Mutex::new(DedupCache::new(dedup_cache_size)),
        })
    }

    pub fn broker_id(&self) -> &str {
        &self.broker_id
    }

    pub fn stats(&self) -> &BrokerStats {
        &self.stats
    }

    pub fn egress(&self) -> &EgressRegistry {
        &self.egress
    }

    pub fn peers(&self) -> &PeerTable {
        &self.peers
    }

    /// Duplicate suppression on the envelope id. `true` means fresh.
    pub fn observe_message_id(&self, message_id: &str) -> bool {
        self.dedup.lock().expect("dedup lock").observe(message_id)
    }

    /// Builds the periodic heartbeat for peers.
    pub fn heartbeat(&self, status: &str, active_subscriptions: usize) -> BrokerMessage {
        BrokerMessage::heartbeat(BrokerHeartbeat {
            broker_id: self.broker_id.clone(),
            status: status.into(),
            active_subscriptions: active_subscriptions as i32,
            processed_events: self.stats.events_ingested() as i64,
        })
    }

    // Pushes a notification onto its subscriber's queue, keeping the
    // overflow counter honest.
    fn deliver_local(&self, notification: Notification) {
        let queue = self.egress.queue_for(&notification.subscriber_id);
        match queue.push(notification) {
            PushOutcome::Queued => self.stats.record_notification_sent(),
            PushOutcome::Dropped => {
                self.stats.record_notification_sent();
                self.stats.record_notification_dropped();
            }
            PushOutcome::Closed => self.stats.record_notification_dropped(),
        }
    }

    // Routes one match result: local subscribers get queued, remote-home
    // subscriptions travel back to their broker.
    fn route(&self, home_broker_id: &str, notification: Notification) {
        if home_broker_id.is_empty() || home_broker_id == self.broker_id {
            self.deliver_local(notification);
        } else if !self
            .peers
            .send_to_broker(home_broker_id, BrokerMessage::notification(notification))
        {
            // Peer DOWN or gone: the notification is dropped by policy.
            self.stats.record_notification_dropped();
        }
    }
}

/// The matcher task. Exclusive owner of the subscription index and window
/// table; runs until every command sender is dropped.
pub async fn run_matcher(core: Arc<BrokerCore>, mut commands: mpsc::Receiver<Command>) {
    let mut matcher = SubscriptionMatcher::new();
    while let Some(command) = commands.recv().await {
        handle_command(&core, &mut matcher, command);
    }
    tracing::debug!(broker_id = core.broker_id(), "matcher task stopped");
}

fn handle_command(core: &BrokerCore, matcher: &mut SubscriptionMatcher, command: Command) {
    match command {
        Command::Event(event) => {
            core.stats.record_event_ingested();
            let notifications = matcher.match_event(&event);
            if notifications.is_empty() {
                return;
            }
            core.stats.record_event_matched();
            for notification in notifications {
                let home = matcher
                    .get(&notification.subscription_id)
                    .map(|s| s.home_broker_id.clone())
                    .unwrap_or_default();
                core.route(&home, notification);
            }
        }
        Command::Subscribe {
            subscription,
            announce,
            reply,
        } => {
            let id = subscription.subscription_id.clone();
            let summary = announce.then(|| Subscription {
                home_broker_id: core.broker_id.clone(),
                ..subscription.clone()
            });
            let result = matcher.register(subscription).map(|()| id);
            if result.is_ok() {
                if let Some(summary) = summary {
                    core.peers.broadcast(&BrokerMessage::subscription(summary));
                }
            }
            if let Some(reply) = reply {
                let _ = reply.send(result);
            }
        }
        Command::Unsubscribe {
            subscription_id,
            announce,
            reply,
        } => {
            let result = matcher.unregister(&subscription_id);
            if result.is_ok() && announce {
                let retire = Subscription {
                    subscription_id: subscription_id.clone(),
                    retired: true,
                    home_broker_id: core.broker_id.clone(),
                    ..Subscription::default()
                };
                core.peers.broadcast(&BrokerMessage::subscription(retire));
            }
            if let Some(reply) = reply {
                let _ = reply.send(result);
            }
        }
        Command::Deliver(notification) => core.deliver_local(notification),
        Command::Stats { reply } => {
            let _ = reply.send(matcher.stats());
        }
        Command::AnnounceLocal => {
            for subscription in matcher.iter() {
                if !subscription.home_broker_id.is_empty() {
                    continue;
                }
                let summary = Subscription {
                    home_broker_id: core.broker_id.clone(),
                    ..subscription.clone()
                };
                core.peers.broadcast(&BrokerMessage::subscription(summary));
            }
        }
        Command::DropSubscriber { subscriber_id } => {
            for subscription_id in matcher.unregister_subscriber(&subscriber_id) {
                let retire = Subscription {
                    subscription_id,
                    retired: true,
                    home_broker_id: core.broker_id.clone(),
                    ..Subscription::default()
                };
                core.peers.broadcast(&BrokerMessage::subscription(retire));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use souk_wire::{
        event, ComparisonOperator, EventType, FilterCondition, MessageType, Purchase,
        SubscriptionKind,
    };

    fn purchase(category: &str, price: f64) -> Event {
        Event {
            event_id: souk_common::ids::event_id(),
            timestamp: souk_common::now_ms(),
            event_type: EventType::Purchase as i32,
            payload: Some(event::Payload::Purchase(Purchase {
                user_id: "user_0001".into(),
                product_id: "LAPTOP123".into(),
                category: category.into(),
                price,
                quantity: 1,
                warehouse_id: "WH001".into(),
            })),
        }
    }

    fn electronics_sub(id: &str, subscriber: &str, home: &str) -> Subscription {
        Subscription {
            subscription_id: id.into(),
            subscriber_id: subscriber.into(),
            kind: SubscriptionKind::Simple as i32,
            conditions: vec![FilterCondition {
                field_name: "category".into(),
                operator: ComparisonOperator::Eq as i32,
                value: "Electronics".into(),
                is_windowed: false,
            }],
            window_config: None,
            home_broker_id: home.into(),
            retired: false,
        }
    }

    fn spawn_core() -> (Arc<BrokerCore>, mpsc::Sender<Command>) {
        let core = BrokerCore::new("broker-0", 64, OverflowPolicy::DropOldest, 128, &[]);
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(run_matcher(Arc::clone(&core), rx));
        (core, tx)
    }

    async fn subscribe(tx: &mpsc::Sender<Command>, subscription: Subscription) {
        let (reply, ack) = oneshot::channel();
        tx.send(Command::Subscribe {
            subscription,
            announce: false,
            reply: Some(reply),
        })
        .await
        .expect("send");
        ack.await.expect("ack").expect("registered");
    }

    #[tokio::test]
    async fn local_subscription_receives_notification() {
        let (core, tx) = spawn_core();
        subscribe(&tx, electronics_sub("s1", "alice", "")).await;
        let queue = core.egress().queue_for("alice");

        tx.send(Command::Event(purchase("Electronics", 99.0)))
            .await
            .expect("send");
        let notification = queue.pop().await.expect("delivered");
        assert_eq!(notification.subscription_id, "s1");
        assert_eq!(core.stats().snapshot().notifications_sent, 1);

        // Non-matching event leaves the queue empty.
        tx.send(Command::Event(purchase("Books", 5.0)))
            .await
            .expect("send");
        tokio::task::yield_now().await;
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn remote_home_subscription_routes_to_peer() {
        let core = BrokerCore::new("broker-0", 64, OverflowPolicy::DropOldest, 128, &["peer:7000".to_string()]);
        let (peer_tx, mut peer_rx) = mpsc::channel(16);
        core.peers().connected("peer:7000", peer_tx);
        core.peers().heartbeat("peer:7000", "broker-1");

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(run_matcher(Arc::clone(&core), rx));

        subscribe(&tx, electronics_sub("s1", "bob", "broker-1")).await;
        tx.send(Command::Event(purchase("Electronics", 10.0)))
            .await
            .expect("send");

        let forwarded = peer_rx.recv().await.expect("peer message");
        assert_eq!(forwarded.kind, MessageType::Notification as i32);
        // Nothing was queued locally for bob.
        assert!(core.egress().queue_for("bob").is_empty());
    }

    #[tokio::test]
    async fn peer_delivered_notification_reaches_local_queue() {
        let (core, tx) = spawn_core();
        let queue = core.egress().queue_for("carol");
        tx.send(Command::Deliver(Notification {
            notification_id: "n1".into(),
            subscription_id: "s9".into(),
            subscriber_id: "carol".into(),
            timestamp: souk_common::now_ms(),
            payload: None,
        }))
        .await
        .expect("send");
        assert_eq!(queue.pop().await.expect("delivered").notification_id, "n1");
    }

    #[tokio::test]
    async fn duplicate_message_ids_have_no_side_effects() {
        let (core, _tx) = spawn_core();
        assert!(core.observe_message_id("m1"));
        assert!(!core.observe_message_id("m1"));
        assert!(core.observe_message_id("m2"));
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let (core, tx) = spawn_core();
        subscribe(&tx, electronics_sub("s1", "alice", "")).await;
        let queue = core.egress().queue_for("alice");

        tx.send(Command::Event(purchase("Electronics", 99.0)))
            .await
            .expect("send");
        queue.pop().await.expect("first delivery");

        let (reply, ack) = oneshot::channel();
        tx.send(Command::Unsubscribe {
            subscription_id: "s1".into(),
            announce: false,
            reply: Some(reply),
        })
        .await
        .expect("send");
        ack.await.expect("ack").expect("removed");

        tx.send(Command::Event(purchase("Electronics", 99.0)))
            .await
            .expect("send");
        tokio::task::yield_now().await;
        assert!(queue.is_empty());

        let (reply, ack) = oneshot::channel();
        tx.send(Command::Unsubscribe {
            subscription_id: "s1".into(),
            announce: false,
            reply: Some(reply),
        })
        .await
        .expect("send");
        assert_eq!(ack.await.expect("ack"), Err(UnregisterError::NotFound));
    }

    #[tokio::test]
    async fn local_registration_is_announced_to_peers() {
        let core = BrokerCore::new("broker-0", 64, OverflowPolicy::DropOldest, 128, &["peer:7000".to_string()]);
        let (peer_tx, mut peer_rx) = mpsc::channel(16);
        core.peers().connected("peer:7000", peer_tx);

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(run_matcher(Arc::clone(&core), rx));

        let (reply, ack) = oneshot::channel();
        tx.send(Command::Subscribe {
            subscription: electronics_sub("s1", "alice", ""),
            announce: true,
            reply: Some(reply),
        })
        .await
        .expect("send");
        ack.await.expect("ack").expect("registered");

        let summary = peer_rx.recv().await.expect("summary");
        assert_eq!(summary.kind, MessageType::Subscription as i32);
        let Some(souk_wire::broker_message::Body::Subscription(sub)) = summary.body else {
            panic!("expected subscription body");
        };
        assert_eq!(sub.home_broker_id, "broker-0");
        assert!(!sub.retired);
    }
}
