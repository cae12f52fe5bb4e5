// Management endpoint: framed request/reply for subscribe, unsubscribe
// and status. Replies are heartbeat-shaped with `status` carrying "ok" or
// the rejection reason, so subscribers learn about failures synchronously.
use bytes::BytesMut;
use souk_broker::{BrokerCore, Command};
use souk_matcher::MatcherStats;
use souk_wire::{
    broker_message, read_message, write_message, BrokerHeartbeat, BrokerMessage, Subscription,
};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};

pub async fn run(
    listener: TcpListener,
    core: Arc<BrokerCore>,
    commands: mpsc::Sender<Command>,
    max_frame_bytes: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let Ok((stream, addr)) = accepted else { break };
                tracing::debug!(%addr, "management client connected");
                tokio::spawn(handle_client(
                    stream,
                    Arc::clone(&core),
                    commands.clone(),
                    max_frame_bytes,
                    shutdown.clone(),
                ));
            }
            _ = shutdown.changed() => break,
        }
    }
}

async fn handle_client(
    mut stream: TcpStream,
    core: Arc<BrokerCore>,
    commands: mpsc::Sender<Command>,
    max_frame_bytes: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut scratch = BytesMut::with_capacity(16 * 1024);
    loop {
        let request = tokio::select! {
            read = read_message(&mut stream, max_frame_bytes, &mut scratch) => match read {
                Ok(Some(Ok(message))) => message,
                Ok(Some(Err(err))) => {
                    tracing::debug!(error = %err, "undecodable management request");
                    core.stats().record_decode_error();
                    continue;
                }
                Ok(None) | Err(_) => break,
            },
            _ = shutdown.changed() => break,
        };

        let status = match request.body {
            Some(broker_message::Body::Subscription(sub)) if sub.retired => {
                unsubscribe(&commands, sub).await
            }
            Some(broker_message::Body::Subscription(sub)) => subscribe(&commands, sub).await,
            // A heartbeat-shaped request doubles as a status probe.
            Some(broker_message::Body::Heartbeat(_)) => "ok".to_string(),
            _ => "error: unsupported management request".to_string(),
        };

        let stats = matcher_stats(&commands).await.unwrap_or_default();
        let reply = BrokerMessage::heartbeat(BrokerHeartbeat {
            broker_id: core.broker_id().to_string(),
            status,
            active_subscriptions: stats.total() as i32,
            processed_events: core.stats().snapshot().events_ingested as i64,
        });
        if write_message(&mut stream, &reply).await.is_err() {
            break;
        }
    }
}

async fn subscribe(commands: &mpsc::Sender<Command>, subscription: Subscription) -> String {
    if subscription.subscription_id.is_empty() {
        return "error: missing subscription_id".to_string();
    }
    let (reply, ack) = oneshot::channel();
    let sent = commands
        .send(Command::Subscribe {
            subscription,
            announce: true,
            reply: Some(reply),
        })
        .await;
    if sent.is_err() {
        return "error: broker shutting down".to_string();
    }
    match ack.await {
        Ok(Ok(id)) => {
            tracing::info!(subscription_id = %id, "subscription registered");
            "ok".to_string()
        }
        Ok(Err(err)) => format!("error: {err}"),
        Err(_) => "error: broker shutting down".to_string(),
    }
}

async fn unsubscribe(commands: &mpsc::Sender<Command>, subscription: Subscription) -> String {
    let (reply, ack) = oneshot::channel();
    let sent = commands
        .send(Command::Unsubscribe {
            subscription_id: subscription.subscription_id.clone(),
            announce: true,
            reply: Some(reply),
        })
        .await;
    if sent.is_err() {
        return "error: broker shutting down".to_string();
    }
    match ack.await {
        Ok(Ok(())) => {
            tracing::info!(subscription_id = %subscription.subscription_id, "subscription removed");
            "ok".to_string()
        }
        Ok(Err(err)) => format!("error: {err}"),
        Err(_) => "error: broker shutting down".to_string(),
    }
}

async fn matcher_stats(commands: &mpsc::Sender<Command>) -> Option<MatcherStats> {
    let (reply, stats) = oneshot::channel();
    commands.send(Command::Stats { reply }).await.ok()?;
    stats.await.ok()
}
