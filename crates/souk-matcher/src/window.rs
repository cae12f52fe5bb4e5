// Tumbling windows for complex subscriptions. Each (subscription,
// category, field) triple owns a bounded buffer of numeric observations;
// when the buffer fills, the aggregate is computed and the buffer cleared.
use std::collections::{HashMap, VecDeque};
use std::str::FromStr;

/// Aggregation applied when a window closes. All arithmetic is f64.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    Avg,
    Max,
    Min,
    Sum,
    Count,
}

impl FromStr for Aggregation {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s {
            "avg" => Ok(Self::Avg),
            "max" => Ok(Self::Max),
            "min" => Ok(Self::Min),
            "sum" => Ok(Self::Sum),
            "count" => Ok(Self::Count),
            _ => Err(()),
        }
    }
}

impl Aggregation {
    fn apply(self, values: &VecDeque<f64>) -> f64 {
        match self {
            Self::Avg => values.iter().sum::<f64>() / values.len() as f64,
            Self::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Self::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            Self::Sum => values.iter().sum(),
            Self::Count => values.len() as f64,
        }
    }
}

#[derive(Debug)]
struct TumblingWindow {
    size: usize,
    values: VecDeque<f64>,
}

impl TumblingWindow {
    fn new(size: usize) -> Self {
        Self {
            size,
            values: VecDeque::with_capacity(size),
        }
    }

    // Appends one observation; on fill, aggregates and clears.
    fn observe(&mut self, value: f64, aggregation: Aggregation) -> Option<f64> {
        self.values.push_back(value);
        if self.values.len() < self.size {
            return None;
        }
        let aggregated = aggregation.apply(&self.values);
        self.values.clear();
        Some(aggregated)
    }
}

/// Window state for every complex subscription, created lazily on the
/// first matching event and destroyed with the subscription.
#[derive(Debug, Default)]
pub struct WindowTable {
    windows: HashMap<(String, String, String), TumblingWindow>,
}

impl WindowTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one observation into the window for `(subscription, category,
    /// field)`. Returns the aggregate when this observation closed the
    /// window.
    pub fn observe(
        &mut self,
        subscription_id: &str,
        category: &str,
        field_name: &str,
        window_size: usize,
        aggregation: Aggregation,
        value: f64,
    ) -> Option<f64> {
        let key = (
            subscription_id.to_string(),
            category.to_string(),
            field_name.to_string(),
        );
        self.windows
            .entry(key)
            .or_insert_with(|| TumblingWindow::new(window_size.max(1)))
            .observe(value, aggregation)
    }

    /// Drops every window owned by a subscription.
    pub fn remove_subscription(&mut self, subscription_id: &str) {
        self.windows.retain(|key, _| key.0 != subscription_id);
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}
