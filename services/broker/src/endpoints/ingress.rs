// Publisher ingress: framed events in arrival order onto the matcher
// queue, with flow control once the queue runs hot.
use bytes::BytesMut;
use souk_broker::{BrokerCore, Command};
use souk_wire::{broker_message, read_message, MessageType};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};

pub async fn run(
    listener: TcpListener,
    core: Arc<BrokerCore>,
    commands: mpsc::Sender<Command>,
    queue_cap: usize,
    max_frame_bytes: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let Ok((stream, addr)) = accepted else { break };
                tracing::debug!(%addr, "publisher connected");
                tokio::spawn(handle_publisher(
                    stream,
                    Arc::clone(&core),
                    commands.clone(),
                    queue_cap,
                    max_frame_bytes,
                    shutdown.clone(),
                ));
            }
            _ = shutdown.changed() => break,
        }
    }
}

async fn handle_publisher(
    mut stream: TcpStream,
    core: Arc<BrokerCore>,
    commands: mpsc::Sender<Command>,
    queue_cap: usize,
    max_frame_bytes: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut scratch = BytesMut::with_capacity(64 * 1024);
    loop {
        let message = tokio::select! {
            read = read_message(&mut stream, max_frame_bytes, &mut scratch) => match read {
                Ok(Some(Ok(message))) => message,
                Ok(Some(Err(err))) => {
                    // Framing held, payload didn't: drop and keep reading.
                    tracing::debug!(error = %err, "publisher sent undecodable message");
                    core.stats().record_decode_error();
                    continue;
                }
                Ok(None) => break,
                Err(err) => {
                    tracing::debug!(error = %err, "publisher stream error");
                    core.stats().record_decode_error();
                    break;
                }
            },
            _ = shutdown.changed() => break,
        };

        if !core.observe_message_id(&message.message_id) {
            continue;
        }
        let Some(broker_message::Body::Event(event)) = message.body else {
            tracing::debug!(kind = message.kind, "non-event message on ingress, ignoring");
            continue;
        };
        if message.kind != MessageType::Event as i32 {
            continue;
        }

        let command = Command::Event(event);
        // Flow control: withhold further reads while the matcher queue
        // sits above 80% occupancy.
        if commands.capacity() * 5 < queue_cap {
            if commands.send(command).await.is_err() {
                break;
            }
        } else {
            match commands.try_send(command) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(command)) => {
                    if commands.send(command).await.is_err() {
                        break;
                    }
                }
                Err(mpsc::error::TrySendError::Closed(_)) => break,
            }
        }
    }
}
