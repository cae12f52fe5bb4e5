// Closed field registry: (event variant, field name) -> typed value.
// Unknown names and fields missing from a variant yield `None`, which
// makes the referencing condition false without failing the event.
use souk_wire::{event::Payload, Event};

/// A field value extracted from an event payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue<'a> {
    Str(&'a str),
    Int(i64),
    Float(f64),
}

impl FieldValue<'_> {
    /// Numeric view; string fields have none.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Str(_) => None,
            FieldValue::Int(v) => Some(*v as f64),
            FieldValue::Float(v) => Some(*v),
        }
    }
}

/// Strips the aggregate prefix from a windowed field name, so that
/// `avg_rating` observes the event's `rating` field.
pub fn base_field(field_name: &str) -> &str {
    for prefix in ["avg_", "max_", "min_", "sum_", "count_"] {
        if let Some(rest) = field_name.strip_prefix(prefix) {
            return rest;
        }
    }
    field_name
}

/// Looks up `field_name` in the event's payload variant.
pub fn extract_field<'a>(event: &'a Event, field_name: &str) -> Option<FieldValue<'a>> {
    match event.payload.as_ref()? {
        Payload::Purchase(p) => match field_name {
            "user_id" => Some(FieldValue::Str(&p.user_id)),
            "product_id" => Some(FieldValue::Str(&p.product_id)),
            "category" => Some(FieldValue::Str(&p.category)),
            "price" => Some(FieldValue::Float(p.price)),
            "quantity" => Some(FieldValue::Int(i64::from(p.quantity))),
            "warehouse_id" => Some(FieldValue::Str(&p.warehouse_id)),
            _ => None,
        },
        Payload::ProductView(v) => match field_name {
            "user_id" => Some(FieldValue::Str(&v.user_id)),
            "product_id" => Some(FieldValue::Str(&v.product_id)),
            "category" => Some(FieldValue::Str(&v.category)),
            "view_duration" => Some(FieldValue::Int(i64::from(v.view_duration))),
            "source" => Some(FieldValue::Str(&v.source)),
            _ => None,
        },
        Payload::InventoryUpdate(u) => match field_name {
            "product_id" => Some(FieldValue::Str(&u.product_id)),
            "category" => Some(FieldValue::Str(&u.category)),
            "stock_level" => Some(FieldValue::Int(i64::from(u.stock_level))),
            "warehouse_id" => Some(FieldValue::Str(&u.warehouse_id)),
            "operation" => Some(FieldValue::Str(&u.operation)),
            _ => None,
        },
        Payload::UserRating(r) => match field_name {
            "user_id" => Some(FieldValue::Str(&r.user_id)),
            "product_id" => Some(FieldValue::Str(&r.product_id)),
            "category" => Some(FieldValue::Str(&r.category)),
            "rating" => Some(FieldValue::Float(r.rating)),
            "review_text" => Some(FieldValue::Str(&r.review_text)),
            _ => None,
        },
    }
}

/// Numeric view of a (possibly aggregate-prefixed) field.
pub fn extract_numeric(event: &Event, field_name: &str) -> Option<f64> {
    extract_field(event, base_field(field_name))?.as_f64()
}
