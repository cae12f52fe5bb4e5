// Message schema for broker traffic. Hand-declared prost messages so the
// on-wire field numbers stay visible in source; the encoding is standard
// protobuf (varint tags, oneof variants, unknown tags skipped on decode).
use bytes::Bytes;
use prost::Message as _;

use crate::{Error, Frame, Result};

/// Envelope for every exchange between publishers, brokers and subscribers.
///
/// ```
/// use souk_wire::{BrokerMessage, Event};
///
/// let msg = BrokerMessage::event(Event::default());
/// let frame = msg.to_frame().expect("encode");
/// let decoded = BrokerMessage::from_frame(&frame).expect("decode");
/// assert_eq!(decoded.message_id, msg.message_id);
/// ```
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BrokerMessage {
    #[prost(string, tag = "1")]
    pub message_id: String,
    #[prost(int64, tag = "2")]
    pub timestamp: i64,
    #[prost(enumeration = "MessageType", tag = "3")]
    pub kind: i32,
    #[prost(oneof = "broker_message::Body", tags = "4, 5, 6, 7")]
    pub body: Option<broker_message::Body>,
}

pub mod broker_message {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Body {
        #[prost(message, tag = "4")]
        Event(super::Event),
        #[prost(message, tag = "5")]
        Subscription(super::Subscription),
        #[prost(message, tag = "6")]
        Notification(super::Notification),
        #[prost(message, tag = "7")]
        Heartbeat(super::BrokerHeartbeat),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum MessageType {
    Event = 0,
    Subscription = 1,
    Notification = 2,
    Heartbeat = 3,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Event {
    #[prost(string, tag = "1")]
    pub event_id: String,
    #[prost(int64, tag = "2")]
    pub timestamp: i64,
    #[prost(enumeration = "EventType", tag = "3")]
    pub event_type: i32,
    #[prost(oneof = "event::Payload", tags = "4, 5, 6, 7")]
    pub payload: Option<event::Payload>,
}

pub mod event {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Payload {
        #[prost(message, tag = "4")]
        Purchase(super::Purchase),
        #[prost(message, tag = "5")]
        ProductView(super::ProductView),
        #[prost(message, tag = "6")]
        InventoryUpdate(super::InventoryUpdate),
        #[prost(message, tag = "7")]
        UserRating(super::UserRating),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum EventType {
    Purchase = 0,
    ProductView = 1,
    InventoryUpdate = 2,
    UserRating = 3,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Purchase {
    #[prost(string, tag = "1")]
    pub user_id: String,
    #[prost(string, tag = "2")]
    pub product_id: String,
    #[prost(string, tag = "3")]
    pub category: String,
    #[prost(double, tag = "4")]
    pub price: f64,
    #[prost(int32, tag = "5")]
    pub quantity: i32,
    #[prost(string, tag = "6")]
    pub warehouse_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProductView {
    #[prost(string, tag = "1")]
    pub user_id: String,
    #[prost(string, tag = "2")]
    pub product_id: String,
    #[prost(string, tag = "3")]
    pub category: String,
    #[prost(int32, tag = "4")]
    pub view_duration: i32,
    #[prost(string, tag = "5")]
    pub source: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InventoryUpdate {
    #[prost(string, tag = "1")]
    pub product_id: String,
    #[prost(string, tag = "2")]
    pub category: String,
    #[prost(int32, tag = "3")]
    pub stock_level: i32,
    #[prost(string, tag = "4")]
    pub warehouse_id: String,
    #[prost(string, tag = "5")]
    pub operation: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UserRating {
    #[prost(string, tag = "1")]
    pub user_id: String,
    #[prost(string, tag = "2")]
    pub product_id: String,
    #[prost(string, tag = "3")]
    pub category: String,
    #[prost(double, tag = "4")]
    pub rating: f64,
    #[prost(string, tag = "5")]
    pub review_text: String,
}

/// A registered subscription.
///
/// Fields 6 and 7 are peer-link extensions: `home_broker_id` marks the
/// broker that owns delivery in a summary announcement, `retired`
/// propagates unsubscribe. Decoders without them skip the tags.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Subscription {
    #[prost(string, tag = "1")]
    pub subscription_id: String,
    #[prost(string, tag = "2")]
    pub subscriber_id: String,
    #[prost(enumeration = "SubscriptionKind", tag = "3")]
    pub kind: i32,
    #[prost(message, repeated, tag = "4")]
    pub conditions: Vec<FilterCondition>,
    #[prost(message, optional, tag = "5")]
    pub window_config: Option<WindowConfig>,
    #[prost(string, tag = "6")]
    pub home_broker_id: String,
    #[prost(bool, tag = "7")]
    pub retired: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum SubscriptionKind {
    Simple = 0,
    Complex = 1,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FilterCondition {
    #[prost(string, tag = "1")]
    pub field_name: String,
    #[prost(enumeration = "ComparisonOperator", tag = "2")]
    pub operator: i32,
    #[prost(string, tag = "3")]
    pub value: String,
    #[prost(bool, tag = "4")]
    pub is_windowed: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ComparisonOperator {
    Eq = 0,
    Ne = 1,
    Gt = 2,
    Ge = 3,
    Lt = 4,
    Le = 5,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WindowConfig {
    #[prost(int32, tag = "1")]
    pub window_size: i32,
    #[prost(string, tag = "2")]
    pub aggregation_type: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Notification {
    #[prost(string, tag = "1")]
    pub notification_id: String,
    #[prost(string, tag = "2")]
    pub subscription_id: String,
    #[prost(string, tag = "3")]
    pub subscriber_id: String,
    #[prost(int64, tag = "4")]
    pub timestamp: i64,
    #[prost(oneof = "notification::Payload", tags = "5, 6")]
    pub payload: Option<notification::Payload>,
}

pub mod notification {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Payload {
        #[prost(message, tag = "5")]
        Simple(super::SimpleNotification),
        #[prost(message, tag = "6")]
        Complex(super::ComplexNotification),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SimpleNotification {
    #[prost(message, optional, tag = "1")]
    pub matched_event: Option<Event>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ComplexNotification {
    #[prost(string, tag = "1")]
    pub category: String,
    #[prost(string, tag = "2")]
    pub field_name: String,
    #[prost(double, tag = "3")]
    pub aggregated_value: f64,
    #[prost(int32, tag = "4")]
    pub window_size: i32,
    #[prost(bool, tag = "5")]
    pub condition_met: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BrokerHeartbeat {
    #[prost(string, tag = "1")]
    pub broker_id: String,
    #[prost(string, tag = "2")]
    pub status: String,
    #[prost(int32, tag = "3")]
    pub active_subscriptions: i32,
    #[prost(int64, tag = "4")]
    pub processed_events: i64,
}

impl BrokerMessage {
    // Envelope builders stamp a fresh message id and the current time.
    fn envelope(kind: MessageType, body: broker_message::Body) -> Self {
        Self {
            message_id: souk_common::ids::message_id(),
            timestamp: souk_common::now_ms(),
            kind: kind as i32,
            body: Some(body),
        }
    }

    pub fn event(event: Event) -> Self {
        Self::envelope(MessageType::Event, broker_message::Body::Event(event))
    }

    pub fn subscription(subscription: Subscription) -> Self {
        Self::envelope(
            MessageType::Subscription,
            broker_message::Body::Subscription(subscription),
        )
    }

    pub fn notification(notification: Notification) -> Self {
        Self::envelope(
            MessageType::Notification,
            broker_message::Body::Notification(notification),
        )
    }

    pub fn heartbeat(heartbeat: BrokerHeartbeat) -> Self {
        Self::envelope(
            MessageType::Heartbeat,
            broker_message::Body::Heartbeat(heartbeat),
        )
    }

    pub fn to_frame(&self) -> Result<Frame> {
        Frame::new(Bytes::from(self.encode_to_vec()))
    }

    pub fn from_frame(frame: &Frame) -> Result<Self> {
        Self::decode(frame.payload.clone()).map_err(Error::from)
    }
}

impl Event {
    /// The category carried by the payload, when one is present.
    pub fn category(&self) -> Option<&str> {
        match self.payload.as_ref()? {
            event::Payload::Purchase(p) => Some(&p.category),
            event::Payload::ProductView(v) => Some(&v.category),
            event::Payload::InventoryUpdate(u) => Some(&u.category),
            event::Payload::UserRating(r) => Some(&r.category),
        }
    }
}

impl Subscription {
    pub fn is_complex(&self) -> bool {
        self.kind == SubscriptionKind::Complex as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message as _;

    fn purchase_event() -> Event {
        Event {
            event_id: "evt-1".into(),
            timestamp: 1_700_000_000_000,
            event_type: EventType::Purchase as i32,
            payload: Some(event::Payload::Purchase(Purchase {
                user_id: "user_0001".into(),
                product_id: "LAPTOP123".into(),
                category: "Electronics".into(),
                price: 999.5,
                quantity: 1,
                warehouse_id: "WH001".into(),
            })),
        }
    }

    #[test]
    fn event_envelope_round_trip() {
        let msg = BrokerMessage::event(purchase_event());
        let frame = msg.to_frame().expect("encode");
        let decoded = BrokerMessage::from_frame(&frame).expect("decode");
        assert_eq!(decoded, msg);
        assert_eq!(decoded.kind, MessageType::Event as i32);
        let Some(broker_message::Body::Event(event)) = decoded.body else {
            panic!("expected event body");
        };
        assert_eq!(event.category(), Some("Electronics"));
    }

    #[test]
    fn subscription_round_trip_preserves_conditions() {
        let sub = Subscription {
            subscription_id: "sub-1".into(),
            subscriber_id: "alice".into(),
            kind: SubscriptionKind::Complex as i32,
            conditions: vec![
                FilterCondition {
                    field_name: "category".into(),
                    operator: ComparisonOperator::Eq as i32,
                    value: "Electronics".into(),
                    is_windowed: false,
                },
                FilterCondition {
                    field_name: "avg_rating".into(),
                    operator: ComparisonOperator::Gt as i32,
                    value: "4.0".into(),
                    is_windowed: true,
                },
            ],
            window_config: Some(WindowConfig {
                window_size: 3,
                aggregation_type: "avg".into(),
            }),
            home_broker_id: "broker-0".into(),
            retired: false,
        };
        let msg = BrokerMessage::subscription(sub.clone());
        let decoded = BrokerMessage::from_frame(&msg.to_frame().expect("encode")).expect("decode");
        let Some(broker_message::Body::Subscription(out)) = decoded.body else {
            panic!("expected subscription body");
        };
        assert_eq!(out, sub);
    }

    #[test]
    fn notification_variants_round_trip() {
        let simple = Notification {
            notification_id: "n-1".into(),
            subscription_id: "sub-1".into(),
            subscriber_id: "alice".into(),
            timestamp: 1,
            payload: Some(notification::Payload::Simple(SimpleNotification {
                matched_event: Some(purchase_event()),
            })),
        };
        let complex = Notification {
            notification_id: "n-2".into(),
            subscription_id: "sub-2".into(),
            subscriber_id: "bob".into(),
            timestamp: 2,
            payload: Some(notification::Payload::Complex(ComplexNotification {
                category: "Electronics".into(),
                field_name: "avg_rating".into(),
                aggregated_value: 4.25,
                window_size: 4,
                condition_met: true,
            })),
        };
        for notification in [simple, complex] {
            let msg = BrokerMessage::notification(notification.clone());
            let decoded =
                BrokerMessage::from_frame(&msg.to_frame().expect("encode")).expect("decode");
            let Some(broker_message::Body::Notification(out)) = decoded.body else {
                panic!("expected notification body");
            };
            assert_eq!(out, notification);
        }
    }

    #[test]
    fn unknown_tags_are_skipped() {
        // Append a field with an unused tag (12, varint) to an encoded
        // heartbeat; decoders must tolerate additive fields.
        let msg = BrokerMessage::heartbeat(BrokerHeartbeat {
            broker_id: "broker-0".into(),
            status: "healthy".into(),
            active_subscriptions: 7,
            processed_events: 1234,
        });
        let mut encoded = msg.encode_to_vec();
        encoded.extend_from_slice(&[0x60, 0x2A]); // tag 12, value 42
        let decoded = BrokerMessage::decode(Bytes::from(encoded)).expect("decode");
        assert_eq!(decoded, msg);
    }

    #[test]
    fn decode_rejects_garbage() {
        let err = BrokerMessage::decode(Bytes::from_static(&[0xFF, 0xFF, 0xFF, 0xFF]));
        assert!(err.is_err());
    }
}
