// Subscriber egress: each connection announces its subscriber id, then
// drains that subscriber's queue. A write failure or disconnect closes
// the queue and destroys the subscriber's registrations; the client
// replays them when it reconnects.
use bytes::BytesMut;
use souk_broker::{BrokerCore, Command};
use souk_wire::{broker_message, read_message, write_message, BrokerMessage};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};

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
                tracing::debug!(%addr, "subscriber connected");
                tokio::spawn(handle_subscriber(
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

async fn handle_subscriber(
    stream: TcpStream,
    core: Arc<BrokerCore>,
    commands: mpsc::Sender<Command>,
    max_frame_bytes: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    let (mut reader, mut writer) = stream.into_split();

    // The first frame binds the connection to a subscriber.
    let mut scratch = BytesMut::with_capacity(16 * 1024);
    let hello = match read_message(&mut reader, max_frame_bytes, &mut scratch).await {
        Ok(Some(Ok(message))) => message,
        _ => return,
    };
    let Some(broker_message::Body::Subscription(sub)) = hello.body else {
        tracing::debug!("egress connection without identification hello");
        return;
    };
    let subscriber_id = sub.subscriber_id;
    if subscriber_id.is_empty() {
        return;
    }
    let queue = core.egress().attach(&subscriber_id);
    tracing::debug!(subscriber_id = %subscriber_id, "egress bound");

    let mut disconnected = false;
    loop {
        tokio::select! {
            popped = queue.pop() => {
                let Some(notification) = popped else { break };
                let message = BrokerMessage::notification(notification);
                if let Err(err) = write_message(&mut writer, &message).await {
                    tracing::debug!(
                        subscriber_id = %subscriber_id,
                        error = %err,
                        "egress write failed, closing queue"
                    );
                    disconnected = true;
                    break;
                }
            }
            // The subscriber sends nothing after the hello; a read result
            // here means the connection went away.
            _ = read_message(&mut reader, max_frame_bytes, &mut scratch) => {
                disconnected = true;
                break;
            }
            _ = shutdown.changed() => break,
        }
    }

    if disconnected {
        core.egress().detach(&subscriber_id);
        let _ = commands
            .send(Command::DropSubscriber {
                subscriber_id: subscriber_id.clone(),
            })
            .await;
        tracing::debug!(subscriber_id = %subscriber_id, "subscriber disconnected");
    }
}
