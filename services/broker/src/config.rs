use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::io::ErrorKind;
use std::net::SocketAddr;

// Broker service configuration sourced from environment variables, with an
// optional YAML override file for ops-managed deployments.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    // Stable identity of this broker in the overlay.
    pub broker_id: String,
    // Listener bind addresses; port 0 picks an ephemeral port.
    pub ingress_bind: SocketAddr,
    pub egress_bind: SocketAddr,
    pub management_bind: SocketAddr,
    pub peer_bind: SocketAddr,
    // Metrics HTTP listener bind address.
    pub metrics_bind: SocketAddr,
    // Peer broker mesh endpoints dialed at startup.
    pub peer_endpoints: Vec<String>,
    // Heartbeat cadence towards peers.
    pub heartbeat_interval_ms: u64,
    // Quiet time after which an UP peer is marked DOWN.
    pub peer_timeout_ms: u64,
    // Recent message-id window for duplicate suppression.
    pub dedup_cache_size: usize,
    // Matcher queue depth; ingress withholds reads above 80% occupancy.
    pub ingress_queue_cap: usize,
    // Per-subscriber notification queue depth.
    pub egress_queue_cap: usize,
    // Overflow behavior for subscriber queues.
    pub drop_oldest_on_overflow: bool,
    // Max frame size accepted on any connection.
    pub max_frame_bytes: usize,
}

const DEFAULT_CONFIG_PATH: &str = "/usr/local/souk/config.yml";
const DEFAULT_INGRESS_PORT: u16 = 5557;
const DEFAULT_EGRESS_PORT: u16 = 5554;
const DEFAULT_PEER_PORT: u16 = 5570;
const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 5_000;
const DEFAULT_PEER_TIMEOUT_MS: u64 = 15_000;
const DEFAULT_DEDUP_CACHE_SIZE: usize = 10_000;
const DEFAULT_INGRESS_QUEUE_CAP: usize = 65_536;
const DEFAULT_EGRESS_QUEUE_CAP: usize = 4_096;
const DEFAULT_MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, Deserialize)]
struct BrokerConfigOverride {
    broker_id: Option<String>,
    ingress_bind: Option<String>,
    egress_bind: Option<String>,
    management_bind: Option<String>,
    peer_bind: Option<String>,
    metrics_bind: Option<String>,
    peer_endpoints: Option<Vec<String>>,
    heartbeat_interval_ms: Option<u64>,
    peer_timeout_ms: Option<u64>,
    dedup_cache_size: Option<usize>,
    ingress_queue_cap: Option<usize>,
    egress_queue_cap: Option<usize>,
    drop_oldest_on_overflow: Option<bool>,
    max_frame_bytes: Option<usize>,
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|value| value.parse().ok())
}

impl BrokerConfig {
    pub fn from_env() -> Result<Self> {
        // Environment variables provide defaults for local development.
        let broker_id =
            std::env::var("SOUK_BROKER_ID").unwrap_or_else(|_| "broker-0".to_string());
        // Broker index shifts the egress port (5554 + i) so a local
        // three-node overlay needs no per-node config files.
        let broker_index: u16 = env_parse("SOUK_BROKER_INDEX").unwrap_or(0);

        let ingress_port: u16 =
            env_parse("SOUK_PUBLISHER_PORT").unwrap_or(DEFAULT_INGRESS_PORT);
        let egress_port: u16 =
            env_parse("SOUK_SUBSCRIBER_PORT").unwrap_or(DEFAULT_EGRESS_PORT + broker_index);
        // Management rides 1000 ports above egress unless pinned.
        let management_port: u16 =
            env_parse("SOUK_MANAGEMENT_PORT").unwrap_or(egress_port + 1000);
        let peer_port: u16 = env_parse("SOUK_PEER_PORT").unwrap_or(DEFAULT_PEER_PORT);

        let bind_ip = std::env::var("SOUK_BIND_IP").unwrap_or_else(|_| "0.0.0.0".to_string());
        let bind = |port: u16| -> Result<SocketAddr> {
            format!("{bind_ip}:{port}")
                .parse()
                .with_context(|| format!("parse bind address {bind_ip}:{port}"))
        };

        let metrics_bind = std::env::var("SOUK_METRICS_BIND")
            .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
            .parse()
            .context("parse SOUK_METRICS_BIND")?;

        let peer_endpoints = std::env::var("SOUK_PEER_ENDPOINTS")
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            broker_id,
            ingress_bind: bind(ingress_port)?,
            egress_bind: bind(egress_port)?,
            management_bind: bind(management_port)?,
            peer_bind: bind(peer_port)?,
            metrics_bind,
            peer_endpoints,
            heartbeat_interval_ms: env_parse("SOUK_HEARTBEAT_INTERVAL_MS")
                .filter(|v| *v > 0)
                .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_MS),
            peer_timeout_ms: env_parse("SOUK_PEER_TIMEOUT_MS")
                .filter(|v| *v > 0)
                .unwrap_or(DEFAULT_PEER_TIMEOUT_MS),
            dedup_cache_size: env_parse("SOUK_DEDUP_CACHE_SIZE")
                .filter(|v| *v > 0)
                .unwrap_or(DEFAULT_DEDUP_CACHE_SIZE),
            ingress_queue_cap: env_parse("SOUK_INGRESS_QUEUE_CAP")
                .filter(|v| *v > 0)
                .unwrap_or(DEFAULT_INGRESS_QUEUE_CAP),
            egress_queue_cap: env_parse("SOUK_EGRESS_QUEUE_CAP")
                .filter(|v| *v > 0)
                .unwrap_or(DEFAULT_EGRESS_QUEUE_CAP),
            drop_oldest_on_overflow: std::env::var("SOUK_DROP_OLDEST_ON_OVERFLOW")
                .map(|value| matches!(value.as_str(), "1" | "true" | "yes"))
                .unwrap_or(true),
            max_frame_bytes: env_parse("SOUK_MAX_FRAME_BYTES")
                .filter(|v| *v > 0)
                .unwrap_or(DEFAULT_MAX_FRAME_BYTES),
        })
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        let override_path = std::env::var("SOUK_BROKER_CONFIG").ok();
        let config_path = override_path
            .clone()
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
        let contents = match fs::read_to_string(&config_path) {
            Ok(contents) => Some(contents),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                if override_path.is_some() {
                    return Err(err)
                        .with_context(|| format!("read SOUK_BROKER_CONFIG: {config_path}"));
                }
                None
            }
            Err(err) => {
                return Err(err).with_context(|| format!("read broker config: {config_path}"));
            }
        };
        if let Some(contents) = contents {
            // YAML overrides allow ops-friendly config files.
            let override_cfg: BrokerConfigOverride =
                serde_yaml::from_str(&contents).context("parse broker config yaml")?;
            if let Some(value) = override_cfg.broker_id {
                config.broker_id = value;
            }
            if let Some(value) = override_cfg.ingress_bind {
                config.ingress_bind = value.parse().context("parse ingress_bind")?;
            }
            if let Some(value) = override_cfg.egress_bind {
                config.egress_bind = value.parse().context("parse egress_bind")?;
            }
            if let Some(value) = override_cfg.management_bind {
                config.management_bind = value.parse().context("parse management_bind")?;
            }
            if let Some(value) = override_cfg.peer_bind {
                config.peer_bind = value.parse().context("parse peer_bind")?;
            }
            if let Some(value) = override_cfg.metrics_bind {
                config.metrics_bind = value.parse().context("parse metrics_bind")?;
            }
            if let Some(value) = override_cfg.peer_endpoints {
                config.peer_endpoints = value;
            }
            if let Some(value) = override_cfg.heartbeat_interval_ms {
                config.heartbeat_interval_ms = value;
            }
            if let Some(value) = override_cfg.peer_timeout_ms {
                config.peer_timeout_ms = value;
            }
            if let Some(value) = override_cfg.dedup_cache_size {
                config.dedup_cache_size = value;
            }
            if let Some(value) = override_cfg.ingress_queue_cap {
                config.ingress_queue_cap = value;
            }
            if let Some(value) = override_cfg.egress_queue_cap {
                config.egress_queue_cap = value;
            }
            if let Some(value) = override_cfg.drop_oldest_on_overflow {
                config.drop_oldest_on_overflow = value;
            }
            if let Some(value) = override_cfg.max_frame_bytes {
                config.max_frame_bytes = value;
            }
        }
        Ok(config)
    }

    /// Loopback config with ephemeral ports, used by tests.
    pub fn for_tests(broker_id: &str, peer_endpoints: Vec<String>) -> Self {
        let ephemeral = "127.0.0.1:0".parse().expect("loopback addr");
        Self {
            broker_id: broker_id.to_string(),
            ingress_bind: ephemeral,
            egress_bind: ephemeral,
            management_bind: ephemeral,
            peer_bind: ephemeral,
            metrics_bind: ephemeral,
            peer_endpoints,
            heartbeat_interval_ms: 200,
            peer_timeout_ms: 1_000,
            dedup_cache_size: 1_024,
            ingress_queue_cap: 1_024,
            egress_queue_cap: 256,
            drop_oldest_on_overflow: true,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}
