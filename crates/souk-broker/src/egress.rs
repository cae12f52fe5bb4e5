// Per-subscriber delivery queues. Bounded, drop-oldest by default, so a
// slow subscriber sheds its own backlog instead of stalling the matcher.
use souk_wire::Notification;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// What happens when a queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Evict the oldest pending notification to make room (default).
    #[default]
    DropOldest,
    /// Reject the incoming notification.
    DropNewest,
}

/// Outcome of enqueueing one notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Queue was full; one notification was discarded per the policy.
    Dropped,
    Closed,
}

#[derive(Debug)]
struct QueueState {
    items: VecDeque<Notification>,
    closed: bool,
}

/// One subscriber's bounded notification queue. Clones share state.
#[derive(Debug, Clone)]
pub struct SubscriberQueue {
    state: Arc<Mutex<QueueState>>,
    notify: Arc<Notify>,
    capacity: usize,
    policy: OverflowPolicy,
}

impl SubscriberQueue {
    fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
            })),
            notify: Arc::new(Notify::new()),
            capacity: capacity.max(1),
            policy,
        }
    }

    /// Enqueues a notification, shedding per the overflow policy when full.
    pub fn push(&self, notification: Notification) -> PushOutcome {
        let outcome = {
            let mut state = self.state.lock().expect("queue lock");
            if state.closed {
                return PushOutcome::Closed;
            }
            if state.items.len() >= self.capacity {
                match self.policy {
                    OverflowPolicy::DropOldest => {
                        state.items.pop_front();
                        state.items.push_back(notification);
                    }
                    OverflowPolicy::DropNewest => {}
                }
                PushOutcome::Dropped
            } else {
                state.items.push_back(notification);
                PushOutcome::Queued
            }
        };
        self.notify.notify_one();
        outcome
    }

    /// Waits for the next notification; `None` once the queue is closed
    /// and drained, or closed with pending items discarded.
    pub async fn pop(&self) -> Option<Notification> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock().expect("queue lock");
                if state.closed {
                    return None;
                }
                if let Some(item) = state.items.pop_front() {
                    return Some(item);
                }
            }
            notified.await;
        }
    }

    /// Closes the queue and discards anything still pending.
    pub fn close(&self) {
        {
            let mut state = self.state.lock().expect("queue lock");
            state.closed = true;
            state.items.clear();
        }
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().expect("queue lock").closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().expect("queue lock").items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Registry of live subscriber queues, shared between the matcher task
/// (producer) and the egress connection tasks (consumers).
#[derive(Debug, Default, Clone)]
pub struct EgressRegistry {
    queues: Arc<Mutex<HashMap<String, SubscriberQueue>>>,
    capacity: usize,
    policy: OverflowPolicy,
}

impl EgressRegistry {
    pub fn new(queue_capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            queues: Arc::new(Mutex::new(HashMap::new())),
            capacity: queue_capacity,
            policy,
        }
    }

    /// Queue for a subscriber, created on first use.
    pub fn queue_for(&self, subscriber_id: &str) -> SubscriberQueue {
        let mut queues = self.queues.lock().expect("registry lock");
        queues
            .entry(subscriber_id.to_string())
            .or_insert_with(|| SubscriberQueue::new(self.capacity, self.policy))
            .clone()
    }

    /// Binds an egress connection: replaces a previously closed queue so a
    /// reconnecting subscriber starts clean (missed notifications are not
    /// replayed).
    pub fn attach(&self, subscriber_id: &str) -> SubscriberQueue {
        let mut queues = self.queues.lock().expect("registry lock");
        let queue = queues
            .entry(subscriber_id.to_string())
            .or_insert_with(|| SubscriberQueue::new(self.capacity, self.policy));
        if queue.is_closed() {
            *queue = SubscriberQueue::new(self.capacity, self.policy);
        }
        queue.clone()
    }

    /// Closes and removes a subscriber's queue (transport failure or
    /// disconnect); pending notifications are dropped.
    pub fn detach(&self, subscriber_id: &str) {
        let removed = self
            .queues
            .lock()
            .expect("registry lock")
            .remove(subscriber_id);
        if let Some(queue) = removed {
            queue.close();
        }
    }

    /// Closes every queue (shutdown).
    pub fn close_all(&self) {
        let mut queues = self.queues.lock().expect("registry lock");
        for queue in queues.values() {
            queue.close();
        }
        queues.clear();
    }

    pub fn len(&self) -> usize {
        self.queues.lock().expect("registry lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notification(id: &str) -> Notification {
        Notification {
            notification_id: id.into(),
            subscription_id: "s".into(),
            subscriber_id: "alice".into(),
            timestamp: 0,
            payload: None,
        }
    }

    #[tokio::test]
    async fn fifo_delivery() {
        let registry = EgressRegistry::new(8, OverflowPolicy::DropOldest);
        let queue = registry.queue_for("alice");
        assert_eq!(queue.push(notification("n1")), PushOutcome::Queued);
        assert_eq!(queue.push(notification("n2")), PushOutcome::Queued);
        assert_eq!(queue.pop().await.expect("n1").notification_id, "n1");
        assert_eq!(queue.pop().await.expect("n2").notification_id, "n2");
    }

    #[tokio::test]
    async fn overflow_drops_oldest() {
        let registry = EgressRegistry::new(2, OverflowPolicy::DropOldest);
        let queue = registry.queue_for("alice");
        queue.push(notification("n1"));
        queue.push(notification("n2"));
        assert_eq!(queue.push(notification("n3")), PushOutcome::Dropped);
        // n1 was evicted; delivery starts at n2.
        assert_eq!(queue.pop().await.expect("n2").notification_id, "n2");
        assert_eq!(queue.pop().await.expect("n3").notification_id, "n3");
    }

    #[tokio::test]
    async fn overflow_can_reject_newest_instead() {
        let registry = EgressRegistry::new(2, OverflowPolicy::DropNewest);
        let queue = registry.queue_for("alice");
        queue.push(notification("n1"));
        queue.push(notification("n2"));
        assert_eq!(queue.push(notification("n3")), PushOutcome::Dropped);
        // n3 was rejected; the backlog is untouched.
        assert_eq!(queue.pop().await.expect("n1").notification_id, "n1");
        assert_eq!(queue.pop().await.expect("n2").notification_id, "n2");
    }

    #[tokio::test]
    async fn close_drops_pending_and_wakes_consumer() {
        let registry = EgressRegistry::new(8, OverflowPolicy::DropOldest);
        let queue = registry.queue_for("alice");
        queue.push(notification("n1"));
        queue.close();
        assert!(queue.pop().await.is_none());
        assert_eq!(queue.push(notification("n2")), PushOutcome::Closed);
    }

    #[tokio::test]
    async fn detach_closes_and_removes() {
        let registry = EgressRegistry::new(8, OverflowPolicy::DropOldest);
        let queue = registry.queue_for("alice");
        registry.detach("alice");
        assert!(queue.is_closed());
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn attach_after_close_starts_clean() {
        let registry = EgressRegistry::new(8, OverflowPolicy::DropOldest);
        let old = registry.queue_for("alice");
        old.push(notification("n1"));
        old.close();

        let fresh = registry.attach("alice");
        assert!(fresh.is_empty());
        assert!(!fresh.is_closed());
        assert_eq!(fresh.push(notification("n2")), PushOutcome::Queued);
    }

    #[tokio::test]
    async fn consumer_wakes_on_push() {
        let registry = EgressRegistry::new(8, OverflowPolicy::DropOldest);
        let queue = registry.queue_for("alice");
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::task::yield_now().await;
        queue.push(notification("n1"));
        let got = waiter.await.expect("join").expect("notification");
        assert_eq!(got.notification_id, "n1");
    }
}
