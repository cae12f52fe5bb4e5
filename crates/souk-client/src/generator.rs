// Random e-commerce data: events with a weighted type mix and
// subscriptions drawn from fixed pools, so runs are reproducible under a
// seed.
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use souk_wire::{
    event, ComparisonOperator, Event, EventType, FilterCondition, InventoryUpdate, ProductView,
    Purchase, Subscription, SubscriptionKind, UserRating, WindowConfig,
};

const CATEGORIES: &[&str] = &[
    "Electronics",
    "Clothing",
    "Books",
    "Home & Garden",
    "Sports",
    "Beauty",
    "Toys",
    "Automotive",
    "Food",
    "Health",
];

const PRODUCTS: &[(&str, &[&str])] = &[
    ("Electronics", &["LAPTOP123", "PHONE456", "TABLET789", "CAMERA001", "HEADPHONE002"]),
    ("Clothing", &["SHIRT001", "PANTS002", "DRESS003", "JACKET004", "SHOES005"]),
    ("Books", &["BOOK001", "BOOK002", "BOOK003", "BOOK004", "BOOK005"]),
    ("Home & Garden", &["CHAIR001", "TABLE002", "LAMP003", "PLANT004", "TOOL005"]),
    ("Sports", &["BALL001", "BIKE002", "SHOES003", "BAG004", "WATCH005"]),
    ("Beauty", &["LIPSTICK001", "CREAM002", "PERFUME003", "BRUSH004", "MASK005"]),
    ("Toys", &["DOLL001", "CAR002", "PUZZLE003", "GAME004", "ROBOT005"]),
    ("Automotive", &["TIRE001", "OIL002", "BATTERY003", "FILTER004", "TOOL005"]),
    ("Food", &["SNACK001", "DRINK002", "CANDY003", "SAUCE004", "SPICE005"]),
    ("Health", &["VITAMIN001", "MEDICINE002", "BANDAGE003", "CREAM004", "SUPPLEMENT005"]),
];

const WAREHOUSES: &[&str] = &["WH001", "WH002", "WH003", "WH004", "WH005"];
const SOURCES: &[&str] = &["web", "mobile", "app"];
const OPERATIONS: &[&str] = &["restock", "sale", "return"];
const REVIEWS: &[&str] = &[
    "Exactly as described, would buy again.",
    "Arrived late but works fine.",
    "Quality is acceptable for the price.",
    "Stopped working after a week.",
    "Great value, fast shipping.",
];

/// Seeded generator for events and subscriptions.
pub struct EventGenerator {
    rng: StdRng,
    users: Vec<String>,
}

impl EventGenerator {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            users: (1..=1000).map(|i| format!("user_{i:04}")).collect(),
        }
    }

    fn category(&mut self) -> &'static str {
        *CATEGORIES.choose(&mut self.rng).expect("categories")
    }

    fn product_in(&mut self, category: &str) -> &'static str {
        let products = PRODUCTS
            .iter()
            .find(|(c, _)| *c == category)
            .map(|(_, p)| *p)
            .unwrap_or(PRODUCTS[0].1);
        *products.choose(&mut self.rng).expect("products")
    }

    fn user(&mut self) -> String {
        self.users.choose(&mut self.rng).expect("users").clone()
    }

    fn stamp(&self, payload: event::Payload, event_type: EventType) -> Event {
        Event {
            event_id: souk_common::ids::event_id(),
            timestamp: souk_common::now_ms(),
            event_type: event_type as i32,
            payload: Some(payload),
        }
    }

    pub fn purchase(&mut self) -> Event {
        let category = self.category();
        let payload = event::Payload::Purchase(Purchase {
            user_id: self.user(),
            product_id: self.product_in(category).into(),
            category: category.into(),
            price: round2(self.rng.gen_range(10.0..2000.0)),
            quantity: self.rng.gen_range(1..=5),
            warehouse_id: (*WAREHOUSES.choose(&mut self.rng).expect("warehouses")).into(),
        });
        self.stamp(payload, EventType::Purchase)
    }

    pub fn product_view(&mut self) -> Event {
        let category = self.category();
        let payload = event::Payload::ProductView(ProductView {
            user_id: self.user(),
            product_id: self.product_in(category).into(),
            category: category.into(),
            view_duration: self.rng.gen_range(5..=300),
            source: (*SOURCES.choose(&mut self.rng).expect("sources")).into(),
        });
        self.stamp(payload, EventType::ProductView)
    }

    pub fn inventory_update(&mut self) -> Event {
        let category = self.category();
        let payload = event::Payload::InventoryUpdate(InventoryUpdate {
            product_id: self.product_in(category).into(),
            category: category.into(),
            stock_level: self.rng.gen_range(0..=1000),
            warehouse_id: (*WAREHOUSES.choose(&mut self.rng).expect("warehouses")).into(),
            operation: (*OPERATIONS.choose(&mut self.rng).expect("operations")).into(),
        });
        self.stamp(payload, EventType::InventoryUpdate)
    }

    pub fn user_rating(&mut self) -> Event {
        let category = self.category();
        let payload = event::Payload::UserRating(UserRating {
            user_id: self.user(),
            product_id: self.product_in(category).into(),
            category: category.into(),
            rating: round1(self.rng.gen_range(1.0..=5.0)),
            review_text: (*REVIEWS.choose(&mut self.rng).expect("reviews")).into(),
        });
        self.stamp(payload, EventType::UserRating)
    }

    /// Weighted mix: views and purchases dominate the stream.
    pub fn random_event(&mut self) -> Event {
        match self.rng.gen_range(0.0..1.0) {
            x if x < 0.4 => self.product_view(),
            x if x < 0.7 => self.purchase(),
            x if x < 0.9 => self.inventory_update(),
            _ => self.user_rating(),
        }
    }

    /// Simple subscription with 1–3 plain conditions.
    pub fn simple_subscription(&mut self, subscriber_id: &str) -> Subscription {
        let count = self.rng.gen_range(1..=3);
        let conditions = (0..count).map(|_| self.plain_condition()).collect();
        Subscription {
            subscription_id: souk_common::ids::subscription_id(),
            subscriber_id: subscriber_id.into(),
            kind: SubscriptionKind::Simple as i32,
            conditions,
            window_config: None,
            home_broker_id: String::new(),
            retired: false,
        }
    }

    /// Complex subscription: 1–2 plain conditions plus one windowed
    /// condition over a 5–20 event window.
    pub fn complex_subscription(&mut self, subscriber_id: &str) -> Subscription {
        let plain = self.rng.gen_range(1..=2);
        let mut conditions: Vec<FilterCondition> =
            (0..plain).map(|_| self.plain_condition()).collect();
        conditions.push(self.windowed_condition());
        Subscription {
            subscription_id: souk_common::ids::subscription_id(),
            subscriber_id: subscriber_id.into(),
            kind: SubscriptionKind::Complex as i32,
            conditions,
            window_config: Some(WindowConfig {
                window_size: self.rng.gen_range(5..=20),
                aggregation_type: (*["avg", "max", "min"].choose(&mut self.rng).expect("agg"))
                    .into(),
            }),
            home_broker_id: String::new(),
            retired: false,
        }
    }

    /// Subscription where `ratio` of the conditions use EQ on an
    /// identity-like field; the rest draw ordered operators. Used by the
    /// matcher throughput experiment.
    pub fn subscription_with_equality_ratio(
        &mut self,
        subscriber_id: &str,
        equality_ratio: f64,
    ) -> Subscription {
        let count = self.rng.gen_range(1..=3);
        let conditions = (0..count)
            .map(|_| {
                if self.rng.gen_range(0.0..1.0) < equality_ratio {
                    self.equality_condition()
                } else {
                    self.plain_condition()
                }
            })
            .collect();
        Subscription {
            subscription_id: souk_common::ids::subscription_id(),
            subscriber_id: subscriber_id.into(),
            kind: SubscriptionKind::Simple as i32,
            conditions,
            window_config: None,
            home_broker_id: String::new(),
            retired: false,
        }
    }

    fn plain_condition(&mut self) -> FilterCondition {
        let field = *["category", "product_id", "user_id", "price", "stock_level", "rating"]
            .choose(&mut self.rng)
            .expect("fields");
        match field {
            "category" | "product_id" | "user_id" => self.equality_on(field),
            _ => {
                let operator = self.ordered_operator();
                let value = match field {
                    "price" => format!("{}", round2(self.rng.gen_range(10.0..1000.0))),
                    "stock_level" => format!("{}", self.rng.gen_range(1..=100)),
                    _ => format!("{}", round1(self.rng.gen_range(1.0..=5.0))),
                };
                FilterCondition {
                    field_name: field.into(),
                    operator: operator as i32,
                    value,
                    is_windowed: false,
                }
            }
        }
    }

    fn windowed_condition(&mut self) -> FilterCondition {
        let field = *["avg_rating", "avg_price", "max_price", "min_rating"]
            .choose(&mut self.rng)
            .expect("windowed fields");
        let value = if field.contains("price") {
            format!("{}", round2(self.rng.gen_range(10.0..1000.0)))
        } else {
            format!("{}", round1(self.rng.gen_range(1.0..=5.0)))
        };
        FilterCondition {
            field_name: field.into(),
            operator: self.ordered_operator() as i32,
            value,
            is_windowed: true,
        }
    }

    fn equality_condition(&mut self) -> FilterCondition {
        let field = *["category", "product_id", "user_id"]
            .choose(&mut self.rng)
            .expect("fields");
        self.equality_on(field)
    }

    fn equality_on(&mut self, field: &str) -> FilterCondition {
        let value = match field {
            "category" => self.category().to_string(),
            "product_id" => {
                let category = self.category();
                self.product_in(category).to_string()
            }
            _ => self.user(),
        };
        FilterCondition {
            field_name: field.into(),
            operator: ComparisonOperator::Eq as i32,
            value,
            is_windowed: false,
        }
    }

    fn ordered_operator(&mut self) -> ComparisonOperator {
        *[
            ComparisonOperator::Gt,
            ComparisonOperator::Ge,
            ComparisonOperator::Lt,
            ComparisonOperator::Le,
        ]
        .choose(&mut self.rng)
        .expect("operators")
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}
