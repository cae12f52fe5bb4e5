// Periodic tasks: heartbeats towards peers and the maintenance sweep for
// dead-peer detection and stats gauges.
use souk_broker::{BrokerCore, Command, PeerState};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};

pub async fn run_heartbeat(
    core: Arc<BrokerCore>,
    commands: mpsc::Sender<Command>,
    interval_ms: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }
        let active = match matcher_total(&commands).await {
            Some(total) => total,
            None => break,
        };
        // One envelope per link: every heartbeat carries a fresh message
        // id, so the receiver's dedup window never eats a live signal.
        for endpoint in core.peers().endpoints() {
            if core.peers().state(&endpoint) != Some(PeerState::Up) {
                continue;
            }
            let heartbeat = core.heartbeat("healthy", active);
            core.peers().send_to_endpoint(&endpoint, heartbeat);
        }
    }
}

pub async fn run_maintenance(
    core: Arc<BrokerCore>,
    peer_timeout_ms: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    let sweep_every = Duration::from_millis((peer_timeout_ms / 3).max(100));
    let mut ticker = tokio::time::interval(sweep_every);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }
        core.peers().sweep_timeouts(peer_timeout_ms as i64);
        let (up, down) = core.peers().counts();
        core.stats().set_peer_counts(up, down);
    }
}

async fn matcher_total(commands: &mpsc::Sender<Command>) -> Option<usize> {
    let (reply, stats) = oneshot::channel();
    commands.send(Command::Stats { reply }).await.ok()?;
    stats.await.ok().map(|s| s.total())
}
