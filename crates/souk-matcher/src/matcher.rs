// The subscription index and match loop. Candidates come from a category
// index (subscriptions that pin `category` with EQ) plus a wildcard
// bucket; notifications are emitted in registration order.
use std::collections::{HashMap, HashSet};

use souk_wire::{
    notification, ComparisonOperator, ComplexNotification, Event, FilterCondition, Notification,
    SimpleNotification, Subscription,
};

use crate::condition::{evaluate_condition, evaluate_windowed};
use crate::fields::{base_field, extract_field, extract_numeric};
use crate::window::{Aggregation, WindowTable};

pub type RegisterResult = std::result::Result<(), RegisterError>;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum RegisterError {
    #[error("duplicate subscription id")]
    DuplicateId,
    #[error("invalid subscription: {0}")]
    Invalid(String),
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum UnregisterError {
    #[error("subscription not found")]
    NotFound,
}

/// Counts exposed to heartbeats and management status replies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatcherStats {
    pub simple_subscriptions: usize,
    pub complex_subscriptions: usize,
}

impl MatcherStats {
    pub fn total(&self) -> usize {
        self.simple_subscriptions + self.complex_subscriptions
    }
}

#[derive(Debug)]
struct Entry {
    subscription: Subscription,
    // Registration sequence; match results are ordered by it.
    seq: u64,
    // Parsed window parameters for complex subscriptions.
    window: Option<(usize, Aggregation)>,
}

/// Content-based matcher over the live subscription set.
///
/// Single-writer by construction: the owning broker funnels every
/// `register`/`unregister`/`match_event` call through one task.
#[derive(Debug, Default)]
pub struct SubscriptionMatcher {
    entries: HashMap<String, Entry>,
    by_category: HashMap<String, HashSet<String>>,
    wildcard: HashSet<String>,
    windows: WindowTable,
    next_seq: u64,
}

impl SubscriptionMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscription, validating its shape first.
    pub fn register(&mut self, subscription: Subscription) -> RegisterResult {
        if self.entries.contains_key(&subscription.subscription_id) {
            return Err(RegisterError::DuplicateId);
        }
        let window = validate(&subscription)?;

        let id = subscription.subscription_id.clone();
        match pinned_category(&subscription) {
            Some(category) => {
                self.by_category
                    .entry(category.to_string())
                    .or_default()
                    .insert(id.clone());
            }
            None => {
                self.wildcard.insert(id.clone());
            }
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        tracing::debug!(
            subscription_id = %id,
            subscriber_id = %subscription.subscriber_id,
            complex = subscription.is_complex(),
            "subscription registered"
        );
        self.entries.insert(
            id,
            Entry {
                subscription,
                seq,
                window,
            },
        );
        Ok(())
    }

    /// Removes a subscription and its window state.
    pub fn unregister(&mut self, subscription_id: &str) -> Result<(), UnregisterError> {
        let entry = self
            .entries
            .remove(subscription_id)
            .ok_or(UnregisterError::NotFound)?;
        if let Some(category) = pinned_category(&entry.subscription) {
            if let Some(ids) = self.by_category.get_mut(category) {
                ids.remove(subscription_id);
                if ids.is_empty() {
                    self.by_category.remove(category);
                }
            }
        } else {
            self.wildcard.remove(subscription_id);
        }
        self.windows.remove_subscription(subscription_id);
        tracing::debug!(subscription_id, "subscription removed");
        Ok(())
    }

    /// Removes every subscription owned by a subscriber (disconnect).
    /// Returns the removed ids.
    pub fn unregister_subscriber(&mut self, subscriber_id: &str) -> Vec<String> {
        let ids: Vec<String> = self
            .entries
            .values()
            .filter(|e| e.subscription.subscriber_id == subscriber_id)
            .map(|e| e.subscription.subscription_id.clone())
            .collect();
        for id in &ids {
            let _ = self.unregister(id);
        }
        ids
    }

    pub fn get(&self, subscription_id: &str) -> Option<&Subscription> {
        self.entries.get(subscription_id).map(|e| &e.subscription)
    }

    /// Iterates over every registered subscription.
    pub fn iter(&self) -> impl Iterator<Item = &Subscription> {
        self.entries.values().map(|e| &e.subscription)
    }

    pub fn stats(&self) -> MatcherStats {
        let complex = self
            .entries
            .values()
            .filter(|e| e.subscription.is_complex())
            .count();
        MatcherStats {
            simple_subscriptions: self.entries.len() - complex,
            complex_subscriptions: complex,
        }
    }

    /// Matches one event, mutating window state, and returns the resulting
    /// notifications in subscription-registration order.
    pub fn match_event(&mut self, event: &Event) -> Vec<Notification> {
        let category = event.category().unwrap_or_default();

        let mut candidates: Vec<(u64, String)> = self
            .by_category
            .get(category)
            .into_iter()
            .flatten()
            .chain(self.wildcard.iter())
            .filter_map(|id| self.entries.get(id).map(|e| (e.seq, id.clone())))
            .collect();
        candidates.sort_unstable_by_key(|(seq, _)| *seq);

        let mut notifications = Vec::new();
        for (_, id) in candidates {
            let Some(entry) = self.entries.get(&id) else {
                continue;
            };
            // Non-windowed conditions are conjunctive; one miss skips the
            // subscription for this event without touching its windows.
            let plain_match = entry
                .subscription
                .conditions
                .iter()
                .filter(|c| !c.is_windowed)
                .all(|c| match extract_field(event, &c.field_name) {
                    Some(value) => evaluate_condition(c, value),
                    None => false,
                });
            if !plain_match {
                continue;
            }

            if let Some((window_size, aggregation)) = entry.window {
                notifications.extend(observe_windows(
                    &mut self.windows,
                    &entry.subscription,
                    window_size,
                    aggregation,
                    category,
                    event,
                ));
            } else {
                notifications.push(simple_notification(&entry.subscription, event));
            }
        }
        notifications
    }
}

fn validate(subscription: &Subscription) -> Result<Option<(usize, Aggregation)>, RegisterError> {
    if subscription.conditions.is_empty() {
        return Err(RegisterError::Invalid(
            "subscription has no conditions".into(),
        ));
    }
    let windowed = subscription
        .conditions
        .iter()
        .filter(|c| c.is_windowed)
        .count();
    if !subscription.is_complex() {
        if windowed > 0 {
            return Err(RegisterError::Invalid(
                "simple subscription carries windowed conditions".into(),
            ));
        }
        return Ok(None);
    }
    if windowed == 0 {
        return Err(RegisterError::Invalid(
            "complex subscription has no windowed condition".into(),
        ));
    }
    let Some(config) = subscription.window_config.as_ref() else {
        return Err(RegisterError::Invalid(
            "complex subscription is missing window_config".into(),
        ));
    };
    if config.window_size < 1 {
        return Err(RegisterError::Invalid(format!(
            "window_size must be >= 1, got {}",
            config.window_size
        )));
    }
    let aggregation: Aggregation = config.aggregation_type.parse().map_err(|()| {
        RegisterError::Invalid(format!(
            "unknown aggregation type {:?}",
            config.aggregation_type
        ))
    })?;
    Ok(Some((config.window_size as usize, aggregation)))
}

// The category index covers subscriptions that pin category with a
// non-windowed EQ; everything else goes to the wildcard bucket.
fn pinned_category(subscription: &Subscription) -> Option<&str> {
    subscription
        .conditions
        .iter()
        .find(|c| {
            !c.is_windowed
                && c.field_name == "category"
                && c.operator == ComparisonOperator::Eq as i32
        })
        .map(|c| c.value.as_str())
}

// Feeds every windowed condition of a complex subscription. The composite
// fires only when all of its windows close on this event and every
// aggregate satisfies its operator; one notification per closed window.
fn observe_windows(
    windows: &mut WindowTable,
    subscription: &Subscription,
    window_size: usize,
    aggregation: Aggregation,
    category: &str,
    event: &Event,
) -> Vec<Notification> {
    let mut closed: Vec<(&FilterCondition, f64)> = Vec::new();
    let mut all_fired = true;
    for condition in subscription.conditions.iter().filter(|c| c.is_windowed) {
        let Some(value) = extract_numeric(event, &condition.field_name) else {
            // Field absent from this variant: the window cannot advance.
            all_fired = false;
            continue;
        };
        match windows.observe(
            &subscription.subscription_id,
            category,
            base_field(&condition.field_name),
            window_size,
            aggregation,
            value,
        ) {
            Some(aggregated) if evaluate_windowed(condition, aggregated) => {
                closed.push((condition, aggregated));
            }
            // Closed but unsatisfied, or still filling.
            _ => all_fired = false,
        }
    }
    if !all_fired || closed.is_empty() {
        return Vec::new();
    }
    closed
        .into_iter()
        .map(|(condition, aggregated)| {
            complex_notification(subscription, condition, aggregated, window_size, category)
        })
        .collect()
}

fn simple_notification(subscription: &Subscription, event: &Event) -> Notification {
    Notification {
        notification_id: souk_common::ids::notification_id(&subscription.subscription_id),
        subscription_id: subscription.subscription_id.clone(),
        subscriber_id: subscription.subscriber_id.clone(),
        timestamp: souk_common::now_ms(),
        payload: Some(notification::Payload::Simple(SimpleNotification {
            matched_event: Some(event.clone()),
        })),
    }
}

fn complex_notification(
    subscription: &Subscription,
    condition: &FilterCondition,
    aggregated_value: f64,
    window_size: usize,
    category: &str,
) -> Notification {
    Notification {
        notification_id: souk_common::ids::notification_id(&subscription.subscription_id),
        subscription_id: subscription.subscription_id.clone(),
        subscriber_id: subscription.subscriber_id.clone(),
        timestamp: souk_common::now_ms(),
        payload: Some(notification::Payload::Complex(ComplexNotification {
            category: category.to_string(),
            field_name: condition.field_name.clone(),
            aggregated_value,
            window_size: window_size as i32,
            condition_met: true,
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use souk_wire::{event, EventType, Purchase, SubscriptionKind, UserRating, WindowConfig};

    fn purchase(category: &str, price: f64) -> Event {
        Event {
            event_id: souk_common::ids::event_id(),
            timestamp: souk_common::now_ms(),
            event_type: EventType::Purchase as i32,
            payload: Some(event::Payload::Purchase(Purchase {
                user_id: "user_0001".into(),
                product_id: "LAPTOP123".into(),
                category: category.into(),
                price,
                quantity: 1,
                warehouse_id: "WH001".into(),
            })),
        }
    }

    fn rating(category: &str, value: f64) -> Event {
        Event {
            event_id: souk_common::ids::event_id(),
            timestamp: souk_common::now_ms(),
            event_type: EventType::UserRating as i32,
            payload: Some(event::Payload::UserRating(UserRating {
                user_id: "user_0002".into(),
                product_id: "PHONE456".into(),
                category: category.into(),
                rating: value,
                review_text: String::new(),
            })),
        }
    }

    fn view(category: &str) -> Event {
        Event {
            event_id: souk_common::ids::event_id(),
            timestamp: souk_common::now_ms(),
            event_type: EventType::ProductView as i32,
            payload: Some(event::Payload::ProductView(souk_wire::ProductView {
                user_id: "user_0003".into(),
                product_id: "TABLET789".into(),
                category: category.into(),
                view_duration: 30,
                source: "web".into(),
            })),
        }
    }

    fn condition(field: &str, op: ComparisonOperator, value: &str) -> FilterCondition {
        FilterCondition {
            field_name: field.into(),
            operator: op as i32,
            value: value.into(),
            is_windowed: false,
        }
    }

    fn windowed(field: &str, op: ComparisonOperator, value: &str) -> FilterCondition {
        FilterCondition {
            is_windowed: true,
            ..condition(field, op, value)
        }
    }

    fn simple(id: &str, conditions: Vec<FilterCondition>) -> Subscription {
        Subscription {
            subscription_id: id.into(),
            subscriber_id: "alice".into(),
            kind: SubscriptionKind::Simple as i32,
            conditions,
            window_config: None,
            home_broker_id: String::new(),
            retired: false,
        }
    }

    fn complex(
        id: &str,
        conditions: Vec<FilterCondition>,
        window_size: i32,
        aggregation: &str,
    ) -> Subscription {
        Subscription {
            subscription_id: id.into(),
            subscriber_id: "alice".into(),
            kind: SubscriptionKind::Complex as i32,
            conditions,
            window_config: Some(WindowConfig {
                window_size,
                aggregation_type: aggregation.into(),
            }),
            home_broker_id: String::new(),
            retired: false,
        }
    }

    #[test]
    fn simple_equality_match() {
        let mut matcher = SubscriptionMatcher::new();
        matcher
            .register(simple(
                "s1",
                vec![condition("category", ComparisonOperator::Eq, "Electronics")],
            ))
            .expect("register");

        let hits = matcher.match_event(&purchase("Electronics", 99.0));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].subscription_id, "s1");
        let Some(notification::Payload::Simple(simple)) = &hits[0].payload else {
            panic!("expected simple payload");
        };
        assert_eq!(
            simple.matched_event.as_ref().expect("event").category(),
            Some("Electronics")
        );

        assert!(matcher.match_event(&purchase("Books", 99.0)).is_empty());
    }

    #[test]
    fn range_match_skips_variants_without_the_field() {
        let mut matcher = SubscriptionMatcher::new();
        matcher
            .register(simple(
                "s1",
                vec![
                    condition("price", ComparisonOperator::Gt, "50"),
                    condition("category", ComparisonOperator::Eq, "Electronics"),
                ],
            ))
            .expect("register");

        assert!(matcher.match_event(&purchase("Electronics", 49.99)).is_empty());
        assert_eq!(matcher.match_event(&purchase("Electronics", 50.01)).len(), 1);
        // ProductView has no price field; the condition is false.
        assert!(matcher.match_event(&view("Electronics")).is_empty());
    }

    #[test]
    fn tumbling_average_window() {
        let mut matcher = SubscriptionMatcher::new();
        matcher
            .register(complex(
                "c1",
                vec![
                    condition("category", ComparisonOperator::Eq, "Electronics"),
                    windowed("avg_rating", ComparisonOperator::Gt, "4.0"),
                ],
                3,
                "avg",
            ))
            .expect("register");

        assert!(matcher.match_event(&rating("Electronics", 3.0)).is_empty());
        assert!(matcher.match_event(&rating("Electronics", 5.0)).is_empty());
        let hits = matcher.match_event(&rating("Electronics", 5.0));
        assert_eq!(hits.len(), 1);
        let Some(notification::Payload::Complex(complex)) = &hits[0].payload else {
            panic!("expected complex payload");
        };
        assert!((complex.aggregated_value - 13.0 / 3.0).abs() < 1e-9);
        assert_eq!(complex.window_size, 3);
        assert_eq!(complex.category, "Electronics");
        assert_eq!(complex.field_name, "avg_rating");
        assert!(complex.condition_met);

        // Fourth event lands in a fresh window.
        assert!(matcher.match_event(&rating("Electronics", 4.0)).is_empty());
    }

    #[test]
    fn window_close_below_threshold_stays_silent() {
        let mut matcher = SubscriptionMatcher::new();
        matcher
            .register(complex(
                "c1",
                vec![windowed("avg_rating", ComparisonOperator::Gt, "4.5")],
                2,
                "avg",
            ))
            .expect("register");

        assert!(matcher.match_event(&rating("Books", 3.0)).is_empty());
        // Window closes at avg 3.5, below the threshold: no notification,
        // and the buffer still tumbles.
        assert!(matcher.match_event(&rating("Books", 4.0)).is_empty());
        assert!(matcher.match_event(&rating("Books", 5.0)).is_empty());
        assert_eq!(matcher.match_event(&rating("Books", 5.0)).len(), 1);
    }

    #[test]
    fn wildcard_subscription_sees_every_category() {
        let mut matcher = SubscriptionMatcher::new();
        matcher
            .register(simple(
                "s1",
                vec![condition("price", ComparisonOperator::Gt, "1000")],
            ))
            .expect("register");

        assert_eq!(matcher.match_event(&purchase("Electronics", 1200.0)).len(), 1);
        assert_eq!(matcher.match_event(&purchase("Automotive", 1500.0)).len(), 1);
        assert!(matcher.match_event(&purchase("Books", 20.0)).is_empty());
    }

    #[test]
    fn unregister_stops_matching() {
        let mut matcher = SubscriptionMatcher::new();
        matcher
            .register(simple(
                "s1",
                vec![condition("category", ComparisonOperator::Eq, "Books")],
            ))
            .expect("register");
        assert_eq!(matcher.match_event(&purchase("Books", 5.0)).len(), 1);

        matcher.unregister("s1").expect("unregister");
        assert!(matcher.match_event(&purchase("Books", 5.0)).is_empty());
        assert_eq!(
            matcher.unregister("s1").expect_err("gone"),
            UnregisterError::NotFound
        );
    }

    #[test]
    fn notifications_follow_registration_order() {
        let mut matcher = SubscriptionMatcher::new();
        // One category-indexed and one wildcard subscription, registered
        // out of index order.
        matcher
            .register(simple(
                "wild",
                vec![condition("price", ComparisonOperator::Ge, "0")],
            ))
            .expect("register");
        matcher
            .register(simple(
                "cat",
                vec![condition("category", ComparisonOperator::Eq, "Books")],
            ))
            .expect("register");

        let hits = matcher.match_event(&purchase("Books", 10.0));
        let ids: Vec<&str> = hits.iter().map(|n| n.subscription_id.as_str()).collect();
        assert_eq!(ids, ["wild", "cat"]);
    }

    #[test]
    fn registration_validation() {
        let mut matcher = SubscriptionMatcher::new();
        assert_eq!(
            matcher.register(simple("s1", vec![])).expect_err("empty"),
            RegisterError::Invalid("subscription has no conditions".into())
        );

        let no_window = Subscription {
            window_config: None,
            ..complex(
                "c1",
                vec![windowed("avg_rating", ComparisonOperator::Gt, "4")],
                3,
                "avg",
            )
        };
        assert!(matches!(
            matcher.register(no_window).expect_err("no config"),
            RegisterError::Invalid(_)
        ));

        assert!(matches!(
            matcher
                .register(complex(
                    "c2",
                    vec![windowed("avg_rating", ComparisonOperator::Gt, "4")],
                    0,
                    "avg",
                ))
                .expect_err("bad size"),
            RegisterError::Invalid(_)
        ));

        assert!(matches!(
            matcher
                .register(complex(
                    "c3",
                    vec![windowed("avg_rating", ComparisonOperator::Gt, "4")],
                    3,
                    "median",
                ))
                .expect_err("bad aggregation"),
            RegisterError::Invalid(_)
        ));

        matcher
            .register(simple(
                "dup",
                vec![condition("category", ComparisonOperator::Eq, "Books")],
            ))
            .expect("first");
        assert_eq!(
            matcher
                .register(simple(
                    "dup",
                    vec![condition("category", ComparisonOperator::Eq, "Books")],
                ))
                .expect_err("second"),
            RegisterError::DuplicateId
        );
    }

    #[test]
    fn subscriber_disconnect_drops_all_registrations() {
        let mut matcher = SubscriptionMatcher::new();
        matcher
            .register(simple(
                "s1",
                vec![condition("category", ComparisonOperator::Eq, "Books")],
            ))
            .expect("register");
        matcher
            .register(Subscription {
                subscriber_id: "bob".into(),
                ..simple(
                    "s2",
                    vec![condition("category", ComparisonOperator::Eq, "Books")],
                )
            })
            .expect("register");

        let mut removed = matcher.unregister_subscriber("alice");
        removed.sort();
        assert_eq!(removed, ["s1"]);
        assert_eq!(matcher.stats().total(), 1);
        assert_eq!(matcher.match_event(&purchase("Books", 5.0)).len(), 1);
    }

    #[test]
    fn stats_track_kinds() {
        let mut matcher = SubscriptionMatcher::new();
        matcher
            .register(simple(
                "s1",
                vec![condition("category", ComparisonOperator::Eq, "Books")],
            ))
            .expect("register");
        matcher
            .register(complex(
                "c1",
                vec![windowed("avg_price", ComparisonOperator::Lt, "100")],
                5,
                "avg",
            ))
            .expect("register");
        let stats = matcher.stats();
        assert_eq!(stats.simple_subscriptions, 1);
        assert_eq!(stats.complex_subscriptions, 1);
        assert_eq!(stats.total(), 2);
    }

    #[test]
    fn composite_windows_fire_only_together() {
        let mut matcher = SubscriptionMatcher::new();
        // Two windowed fields over Purchase events: price and quantity.
        matcher
            .register(complex(
                "c1",
                vec![
                    windowed("avg_price", ComparisonOperator::Gt, "10"),
                    windowed("avg_quantity", ComparisonOperator::Ge, "1"),
                ],
                2,
                "avg",
            ))
            .expect("register");

        // Both windows fill in lockstep and close on the second event.
        assert!(matcher.match_event(&purchase("Books", 20.0)).is_empty());
        let hits = matcher.match_event(&purchase("Books", 30.0));
        // One notification per closed window.
        assert_eq!(hits.len(), 2);
        let fields: Vec<&str> = hits
            .iter()
            .map(|n| match &n.payload {
                Some(notification::Payload::Complex(c)) => c.field_name.as_str(),
                _ => panic!("expected complex payload"),
            })
            .collect();
        assert_eq!(fields, ["avg_price", "avg_quantity"]);
    }
}
