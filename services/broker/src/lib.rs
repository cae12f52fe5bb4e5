// Broker node: wires the transport endpoints to the matcher task and runs
// the overlay timers. `start` binds everything (ephemeral ports allowed)
// and returns a handle used by main and by the integration tests.
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use souk_broker::{run_matcher, BrokerCore, Command, OverflowPolicy, StatsSnapshot};

pub mod config;
pub mod endpoints;
pub mod observability;

pub use config::BrokerConfig;

// Matcher queue drain allowance during shutdown.
const DRAIN_DEADLINE: Duration = Duration::from_secs(2);

/// A running broker node.
pub struct BrokerHandle {
    pub ingress_addr: SocketAddr,
    pub egress_addr: SocketAddr,
    pub management_addr: SocketAddr,
    pub peer_addr: SocketAddr,
    core: Arc<BrokerCore>,
    commands: mpsc::Sender<Command>,
    matcher: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl BrokerHandle {
    pub fn broker_id(&self) -> &str {
        self.core.broker_id()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.core.stats().snapshot()
    }

    pub async fn active_subscriptions(&self) -> usize {
        let (reply, stats) = oneshot::channel();
        if self
            .commands
            .send(Command::Stats { reply })
            .await
            .is_err()
        {
            return 0;
        }
        stats.await.map(|s| s.total()).unwrap_or(0)
    }

    /// Orderly shutdown: stop accepting, drain the matcher up to the
    /// deadline, emit a final heartbeat and close every queue.
    pub async fn shutdown(self) -> Result<()> {
        // Farewell first, while the peer writer tasks are still alive.
        let farewell = self.core.heartbeat("SHUTDOWN", 0);
        self.core.peers().broadcast(&farewell);

        let _ = self.shutdown.send(true);
        drop(self.commands);
        if tokio::time::timeout(DRAIN_DEADLINE, self.matcher)
            .await
            .is_err()
        {
            tracing::warn!("matcher queue did not drain before the deadline");
        }

        self.core.peers().close_all();
        self.core.egress().close_all();
        tracing::info!(broker_id = self.core.broker_id(), "broker stopped");
        Ok(())
    }
}

/// Binds all endpoints and spawns the broker's task set.
pub async fn start(config: BrokerConfig) -> Result<BrokerHandle> {
    let ingress = TcpListener::bind(config.ingress_bind)
        .await
        .context("bind publisher ingress")?;
    let egress = TcpListener::bind(config.egress_bind)
        .await
        .context("bind subscriber egress")?;
    let management = TcpListener::bind(config.management_bind)
        .await
        .context("bind management")?;
    let peer = TcpListener::bind(config.peer_bind)
        .await
        .context("bind peer mesh")?;

    let ingress_addr = ingress.local_addr().context("ingress addr")?;
    let egress_addr = egress.local_addr().context("egress addr")?;
    let management_addr = management.local_addr().context("management addr")?;
    let peer_addr = peer.local_addr().context("peer addr")?;

    let overflow = if config.drop_oldest_on_overflow {
        OverflowPolicy::DropOldest
    } else {
        OverflowPolicy::DropNewest
    };
    let core = BrokerCore::new(
        config.broker_id.clone(),
        config.egress_queue_cap,
        overflow,
        config.dedup_cache_size,
        &config.peer_endpoints,
    );

    let (commands, command_rx) = mpsc::channel(config.ingress_queue_cap);
    let matcher = tokio::spawn(run_matcher(Arc::clone(&core), command_rx));

    let (shutdown, shutdown_rx) = watch::channel(false);

    tokio::spawn(endpoints::ingress::run(
        ingress,
        Arc::clone(&core),
        commands.clone(),
        config.ingress_queue_cap,
        config.max_frame_bytes,
        shutdown_rx.clone(),
    ));
    tokio::spawn(endpoints::egress::run(
        egress,
        Arc::clone(&core),
        commands.clone(),
        config.max_frame_bytes,
        shutdown_rx.clone(),
    ));
    tokio::spawn(endpoints::management::run(
        management,
        Arc::clone(&core),
        commands.clone(),
        config.max_frame_bytes,
        shutdown_rx.clone(),
    ));
    tokio::spawn(endpoints::peers::run_listener(
        peer,
        Arc::clone(&core),
        commands.clone(),
        config.max_frame_bytes,
        shutdown_rx.clone(),
    ));
    endpoints::peers::spawn_connectors(
        &core,
        &commands,
        &config.peer_endpoints,
        config.max_frame_bytes,
        &shutdown_rx,
    );
    tokio::spawn(endpoints::timers::run_heartbeat(
        Arc::clone(&core),
        commands.clone(),
        config.heartbeat_interval_ms,
        shutdown_rx.clone(),
    ));
    tokio::spawn(endpoints::timers::run_maintenance(
        Arc::clone(&core),
        config.peer_timeout_ms,
        shutdown_rx,
    ));

    tracing::info!(
        broker_id = %config.broker_id,
        ingress = %ingress_addr,
        egress = %egress_addr,
        management = %management_addr,
        peer_mesh = %peer_addr,
        peers = config.peer_endpoints.len(),
        "broker started"
    );

    Ok(BrokerHandle {
        ingress_addr,
        egress_addr,
        management_addr,
        peer_addr,
        core,
        commands,
        matcher,
        shutdown,
    })
}
