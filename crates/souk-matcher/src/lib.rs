// Content-based subscription matching: typed field access, condition
// evaluation, tumbling windows and the subscription index. Everything here
// is synchronous; the broker funnels all calls through one task so the
// index and window state stay single-writer.

mod condition;
mod fields;
mod matcher;
mod window;

pub use condition::{evaluate_condition, evaluate_windowed};
pub use fields::{base_field, extract_field, FieldValue};
pub use matcher::{MatcherStats, RegisterError, SubscriptionMatcher, UnregisterError};
pub use window::{Aggregation, WindowTable};
