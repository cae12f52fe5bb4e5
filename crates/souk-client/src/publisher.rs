// Publisher client: serializes events and writes them to a broker's
// ingress endpoint. No retries; a failed send is dropped and counted.
use anyhow::{Context, Result};
use tokio::net::TcpStream;

use souk_wire::{write_message, BrokerMessage, Event};

/// Counters kept by one publisher connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublisherStats {
    pub published: u64,
    pub send_errors: u64,
}

/// Connection to one broker's publisher ingress.
pub struct Publisher {
    stream: TcpStream,
    stats: PublisherStats,
}

impl Publisher {
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("connect publisher ingress {addr}"))?;
        stream.set_nodelay(true).ok();
        tracing::debug!(addr, "publisher connected");
        Ok(Self {
            stream,
            stats: PublisherStats::default(),
        })
    }

    /// Sends one event, stamping the send time. The event is dropped on
    /// failure; callers may reconnect and continue.
    pub async fn publish(&mut self, mut event: Event) -> Result<()> {
        event.timestamp = souk_common::now_ms();
        let message = BrokerMessage::event(event);
        match write_message(&mut self.stream, &message).await {
            Ok(()) => {
                self.stats.published += 1;
                metrics::counter!("souk_publisher_events_total").increment(1);
                Ok(())
            }
            Err(err) => {
                self.stats.send_errors += 1;
                metrics::counter!("souk_publisher_send_errors_total").increment(1);
                Err(err).context("publish event")
            }
        }
    }

    pub fn stats(&self) -> PublisherStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use souk_wire::{read_message, MessageType};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn publish_writes_framed_event_with_fresh_timestamp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr").to_string();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.expect("accept");
            let mut scratch = BytesMut::new();
            read_message(&mut stream, 1 << 20, &mut scratch)
                .await
                .expect("io")
                .expect("message")
                .expect("decode")
        });

        let mut publisher = Publisher::connect(&addr).await.expect("connect");
        let before = souk_common::now_ms();
        publisher
            .publish(Event {
                event_id: "evt-1".into(),
                timestamp: 0,
                ..Event::default()
            })
            .await
            .expect("publish");
        assert_eq!(publisher.stats().published, 1);

        let message = server.await.expect("join");
        assert_eq!(message.kind, MessageType::Event as i32);
        let Some(souk_wire::broker_message::Body::Event(event)) = message.body else {
            panic!("expected event body");
        };
        assert_eq!(event.event_id, "evt-1");
        assert!(event.timestamp >= before);
    }
}
