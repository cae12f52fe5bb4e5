// Peer mesh: a listener for inbound links plus one reconnecting dialer
// per configured endpoint. Links carry subscription summaries, forwarded
// notifications and heartbeats; duplicates are shed by message id.
use bytes::BytesMut;
use souk_broker::{BrokerCore, Command};
use souk_wire::{broker_message, read_message, write_message, BrokerMessage};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};

const PEER_SEND_QUEUE: usize = 1_024;

pub async fn run_listener(
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
                let label = format!("in:{addr}");
                tracing::info!(peer = %label, "inbound peer link");
                core.peers().add_link(&label);
                tokio::spawn(run_link(
                    stream,
                    label,
                    true,
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

/// Spawns one dialer per configured peer endpoint.
pub fn spawn_connectors(
    core: &Arc<BrokerCore>,
    commands: &mpsc::Sender<Command>,
    endpoints: &[String],
    max_frame_bytes: usize,
    shutdown: &watch::Receiver<bool>,
) {
    for endpoint in endpoints {
        tokio::spawn(run_connector(
            endpoint.clone(),
            Arc::clone(core),
            commands.clone(),
            max_frame_bytes,
            shutdown.clone(),
        ));
    }
}

async fn run_connector(
    endpoint: String,
    core: Arc<BrokerCore>,
    commands: mpsc::Sender<Command>,
    max_frame_bytes: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        // A closed link means shutdown: stop retrying.
        if core.peers().connect_started(&endpoint).is_none() {
            break;
        }
        match TcpStream::connect(&endpoint).await {
            Ok(stream) => {
                run_link(
                    stream,
                    endpoint.clone(),
                    false,
                    Arc::clone(&core),
                    commands.clone(),
                    max_frame_bytes,
                    shutdown.clone(),
                )
                .await;
            }
            Err(err) => {
                tracing::debug!(peer = %endpoint, error = %err, "peer dial failed");
            }
        }
        // Exponential backoff (capped) between attempts.
        let backoff = core.peers().disconnected(&endpoint);
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(backoff)) => {}
            _ = shutdown.changed() => break,
        }
    }
}

async fn run_link(
    stream: TcpStream,
    label: String,
    inbound: bool,
    core: Arc<BrokerCore>,
    commands: mpsc::Sender<Command>,
    max_frame_bytes: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    let (mut reader, mut writer) = stream.into_split();
    let (tx, mut rx) = mpsc::channel::<BrokerMessage>(PEER_SEND_QUEUE);
    core.peers().connected(&label, tx.clone());

    // Prime the link: identify ourselves immediately and replay local
    // subscription summaries so the peer can match for us.
    let _ = tx.try_send(core.heartbeat("healthy", 0));
    let _ = commands.send(Command::AnnounceLocal).await;

    let writer_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if write_message(&mut writer, &message).await.is_err() {
                break;
            }
        }
    });

    let mut scratch = BytesMut::with_capacity(64 * 1024);
    loop {
        tokio::select! {
            read = read_message(&mut reader, max_frame_bytes, &mut scratch) => match read {
                Ok(Some(Ok(message))) => {
                    process_message(&core, &commands, &label, message).await;
                }
                Ok(Some(Err(err))) => {
                    tracing::debug!(peer = %label, error = %err, "undecodable peer message");
                    core.stats().record_decode_error();
                }
                Ok(None) | Err(_) => break,
            },
            _ = shutdown.changed() => break,
        }
    }

    writer_task.abort();
    core.peers().disconnected(&label);
    if inbound {
        // Inbound links are not redialed from this side; forget them.
        core.peers().remove_link(&label);
    }
    tracing::info!(peer = %label, "peer link closed");
}

async fn process_message(
    core: &Arc<BrokerCore>,
    commands: &mpsc::Sender<Command>,
    label: &str,
    message: BrokerMessage,
) {
    // The same envelope may arrive on both directions of a peer pair.
    if !core.observe_message_id(&message.message_id) {
        return;
    }
    match message.body {
        Some(broker_message::Body::Heartbeat(heartbeat)) => {
            core.peers().heartbeat(label, &heartbeat.broker_id);
        }
        Some(broker_message::Body::Subscription(sub)) if sub.retired => {
            let _ = commands
                .send(Command::Unsubscribe {
                    subscription_id: sub.subscription_id,
                    announce: false,
                    reply: None,
                })
                .await;
        }
        Some(broker_message::Body::Subscription(sub)) => {
            let _ = commands
                .send(Command::Subscribe {
                    subscription: sub,
                    announce: false,
                    reply: None,
                })
                .await;
        }
        Some(broker_message::Body::Notification(notification)) => {
            let _ = commands.send(Command::Deliver(notification)).await;
        }
        // Raw events are matched at their arrival broker, never forwarded.
        Some(broker_message::Body::Event(_)) | None => {}
    }
}
