// Subscriber client: registers subscriptions over the management channel,
// receives notifications on the egress channel and tracks delivery
// latency. The local registry is replayed on reconnect; missed
// notifications are not.
use anyhow::{bail, Context, Result};
use bytes::BytesMut;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use souk_wire::{
    broker_message, notification, read_message, write_message, BrokerMessage, Notification,
    Subscription,
};

use crate::generator::EventGenerator;

const LATENCY_WINDOW: usize = 1000;
const NOTIFICATION_QUEUE: usize = 1024;

/// Shared counters updated by the notification pump.
#[derive(Debug, Default)]
pub struct SubscriberStats {
    received: AtomicU64,
    simple: AtomicU64,
    complex: AtomicU64,
    latencies_ms: Mutex<VecDeque<i64>>,
}

impl SubscriberStats {
    fn record(&self, notification: &Notification) {
        self.received.fetch_add(1, Ordering::Relaxed);
        match notification.payload {
            Some(notification::Payload::Simple(_)) => {
                self.simple.fetch_add(1, Ordering::Relaxed);
            }
            Some(notification::Payload::Complex(_)) => {
                self.complex.fetch_add(1, Ordering::Relaxed);
            }
            None => {}
        }
        let latency = souk_common::now_ms() - notification.timestamp;
        metrics::histogram!("souk_subscriber_latency_ms").record(latency as f64);
        let mut latencies = self.latencies_ms.lock().expect("latency lock");
        if latencies.len() == LATENCY_WINDOW {
            latencies.pop_front();
        }
        latencies.push_back(latency);
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn simple(&self) -> u64 {
        self.simple.load(Ordering::Relaxed)
    }

    pub fn complex(&self) -> u64 {
        self.complex.load(Ordering::Relaxed)
    }

    /// Mean latency over the rolling window, if anything arrived yet.
    pub fn average_latency_ms(&self) -> Option<f64> {
        let latencies = self.latencies_ms.lock().expect("latency lock");
        if latencies.is_empty() {
            return None;
        }
        Some(latencies.iter().sum::<i64>() as f64 / latencies.len() as f64)
    }
}

/// Subscriber connected to one broker (management + egress endpoints).
pub struct Subscriber {
    subscriber_id: String,
    management_addr: String,
    egress_addr: String,
    management: TcpStream,
    scratch: BytesMut,
    max_frame_bytes: usize,
    registry: HashMap<String, Subscription>,
    notifications: mpsc::Receiver<Notification>,
    pump: JoinHandle<()>,
    stats: Arc<SubscriberStats>,
    generator: EventGenerator,
}

impl Subscriber {
    pub async fn connect(
        subscriber_id: impl Into<String>,
        management_addr: impl Into<String>,
        egress_addr: impl Into<String>,
    ) -> Result<Self> {
        let subscriber_id = subscriber_id.into();
        let management_addr = management_addr.into();
        let egress_addr = egress_addr.into();
        let max_frame_bytes = souk_common::Limits::default().max_frame_bytes;

        let management = TcpStream::connect(&management_addr)
            .await
            .with_context(|| format!("connect management {management_addr}"))?;
        let stats = Arc::new(SubscriberStats::default());
        let (notifications, pump) =
            start_egress(&subscriber_id, &egress_addr, max_frame_bytes, Arc::clone(&stats)).await?;
        tracing::debug!(subscriber_id = %subscriber_id, "subscriber connected");

        Ok(Self {
            subscriber_id,
            management_addr,
            egress_addr,
            management,
            scratch: BytesMut::new(),
            max_frame_bytes,
            registry: HashMap::new(),
            notifications,
            pump,
            stats,
            generator: EventGenerator::new(None),
        })
    }

    pub fn subscriber_id(&self) -> &str {
        &self.subscriber_id
    }

    pub fn stats(&self) -> Arc<SubscriberStats> {
        Arc::clone(&self.stats)
    }

    pub fn active_subscriptions(&self) -> usize {
        self.registry.len()
    }

    /// Next delivered notification; `None` once the egress link closed.
    pub async fn next_notification(&mut self) -> Option<Notification> {
        self.notifications.recv().await
    }

    /// Registers one subscription and waits for the broker's ack.
    pub async fn subscribe(&mut self, mut subscription: Subscription) -> Result<String> {
        subscription.subscriber_id = self.subscriber_id.clone();
        let id = subscription.subscription_id.clone();
        let status = self
            .management_roundtrip(BrokerMessage::subscription(subscription.clone()))
            .await?;
        if status != "ok" {
            bail!("subscription {id} rejected: {status}");
        }
        self.registry.insert(id.clone(), subscription);
        Ok(id)
    }

    /// Unsubscribes; unknown ids surface the broker's error.
    pub async fn unsubscribe(&mut self, subscription_id: &str) -> Result<()> {
        let retire = Subscription {
            subscription_id: subscription_id.to_string(),
            subscriber_id: self.subscriber_id.clone(),
            retired: true,
            ..Subscription::default()
        };
        let status = self
            .management_roundtrip(BrokerMessage::subscription(retire))
            .await?;
        self.registry.remove(subscription_id);
        if status != "ok" {
            bail!("unsubscribe {subscription_id} failed: {status}");
        }
        Ok(())
    }

    /// Registers `count` generated simple subscriptions.
    pub async fn subscribe_simple(&mut self, count: usize) -> Result<Vec<String>> {
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            let subscription = self.generator.simple_subscription(&self.subscriber_id);
            ids.push(self.subscribe(subscription).await?);
        }
        Ok(ids)
    }

    /// Registers `count` generated complex (windowed) subscriptions.
    pub async fn subscribe_complex(&mut self, count: usize) -> Result<Vec<String>> {
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            let subscription = self.generator.complex_subscription(&self.subscriber_id);
            ids.push(self.subscribe(subscription).await?);
        }
        Ok(ids)
    }

    /// Registers `count` subscriptions where `ratio` of conditions use EQ.
    pub async fn subscribe_with_equality_ratio(
        &mut self,
        count: usize,
        ratio: f64,
    ) -> Result<Vec<String>> {
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            let subscription = self
                .generator
                .subscription_with_equality_ratio(&self.subscriber_id, ratio);
            ids.push(self.subscribe(subscription).await?);
        }
        Ok(ids)
    }

    /// Re-dials both channels and replays the local registry. Missed
    /// notifications are gone; only registrations survive.
    pub async fn reconnect(&mut self) -> Result<()> {
        self.pump.abort();
        self.management = TcpStream::connect(&self.management_addr)
            .await
            .with_context(|| format!("reconnect management {}", self.management_addr))?;
        let (notifications, pump) = start_egress(
            &self.subscriber_id,
            &self.egress_addr,
            self.max_frame_bytes,
            Arc::clone(&self.stats),
        )
        .await?;
        self.notifications = notifications;
        self.pump = pump;

        for subscription in self.registry.clone().into_values() {
            let status = self
                .management_roundtrip(BrokerMessage::subscription(subscription))
                .await?;
            // The broker may still hold the registration from before the
            // drop; a duplicate ack is success for replay purposes.
            if status != "ok" && !status.contains("duplicate") {
                bail!("replay failed: {status}");
            }
        }
        tracing::info!(
            subscriber_id = %self.subscriber_id,
            replayed = self.registry.len(),
            "subscriber reconnected"
        );
        Ok(())
    }

    // One request/reply exchange on the management channel. Replies are
    // heartbeat-shaped: `status` is "ok" or the rejection reason.
    async fn management_roundtrip(&mut self, request: BrokerMessage) -> Result<String> {
        write_message(&mut self.management, &request)
            .await
            .context("write management request")?;
        let reply = read_message(&mut self.management, self.max_frame_bytes, &mut self.scratch)
            .await
            .context("read management reply")?
            .context("management channel closed")?
            .context("decode management reply")?;
        match reply.body {
            Some(broker_message::Body::Heartbeat(ack)) => Ok(ack.status),
            _ => bail!("unexpected management reply"),
        }
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

// Dials the egress endpoint, announces the subscriber id and pumps
// notifications into a local queue.
async fn start_egress(
    subscriber_id: &str,
    egress_addr: &str,
    max_frame_bytes: usize,
    stats: Arc<SubscriberStats>,
) -> Result<(mpsc::Receiver<Notification>, JoinHandle<()>)> {
    let mut stream = TcpStream::connect(egress_addr)
        .await
        .with_context(|| format!("connect egress {egress_addr}"))?;
    let hello = BrokerMessage::subscription(Subscription {
        subscriber_id: subscriber_id.to_string(),
        ..Subscription::default()
    });
    write_message(&mut stream, &hello)
        .await
        .context("write egress hello")?;

    let (tx, rx) = mpsc::channel(NOTIFICATION_QUEUE);
    let subscriber_id = subscriber_id.to_string();
    let pump = tokio::spawn(async move {
        let mut scratch = BytesMut::with_capacity(64 * 1024);
        loop {
            let message = match read_message(&mut stream, max_frame_bytes, &mut scratch).await {
                Ok(Some(Ok(message))) => message,
                Ok(Some(Err(err))) => {
                    // Framing survived, payload didn't; skip and continue.
                    tracing::debug!(error = %err, "dropping undecodable notification");
                    metrics::counter!("souk_subscriber_decode_errors_total").increment(1);
                    continue;
                }
                Ok(None) => break,
                Err(err) => {
                    tracing::debug!(error = %err, "egress stream error");
                    break;
                }
            };
            let Some(broker_message::Body::Notification(notification)) = message.body else {
                continue;
            };
            stats.record(&notification);
            if tx.send(notification).await.is_err() {
                break;
            }
        }
        tracing::debug!(subscriber_id = %subscriber_id, "notification pump stopped");
    });
    Ok((rx, pump))
}
