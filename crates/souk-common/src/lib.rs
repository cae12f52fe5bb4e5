// Shared helpers used across the souk crates: id minting, wall-clock
// milliseconds and common limits.
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid id: {0}")]
    InvalidId(String),
    #[error("config error: {0}")]
    Config(String),
}

/// Milliseconds since the Unix epoch, as carried in every wire message.
///
/// ```
/// let ts = souk_common::now_ms();
/// assert!(ts > 0);
/// ```
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

pub mod ids {
    // Ids travel as strings on the wire; minting stays uuid-backed so that
    // every broker and client can generate them without coordination.
    use super::Uuid;

    /// Fresh unique event id.
    pub fn event_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Fresh unique subscription id.
    pub fn subscription_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Fresh envelope message id, prefixed so packet captures are legible.
    pub fn message_id() -> String {
        format!("msg-{}", Uuid::new_v4())
    }

    /// Fresh notification id tied to the subscription that fired.
    pub fn notification_id(subscription_id: &str) -> String {
        format!("notif-{}-{}", Uuid::new_v4().simple(), subscription_id)
    }
}

/// Shared sizing limits for queues and frames.
///
/// ```
/// use souk_common::Limits;
///
/// let limits = Limits::default();
/// assert!(limits.max_frame_bytes > 0);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Limits {
    pub max_frame_bytes: usize,
    pub ingress_queue_cap: usize,
    pub egress_queue_cap: usize,
    pub dedup_cache_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        // Sized for ~10k active subscriptions per broker.
        Self {
            max_frame_bytes: 4 * 1024 * 1024,
            ingress_queue_cap: 65_536,
            egress_queue_cap: 4_096,
            dedup_cache_size: 10_000,
        }
    }
}
