// Client-side building blocks: the publisher, the subscriber and the
// random event/subscription generator used by the test harness.

mod generator;
mod publisher;
mod subscriber;

pub use generator::EventGenerator;
pub use publisher::{Publisher, PublisherStats};
pub use subscriber::{Subscriber, SubscriberStats};
