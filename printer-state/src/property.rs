//! Lazy typed conversion of snapshot field values
//!
//! Category payloads are stored untyped. The `FieldValue` trait defines how a
//! raw JSON value is converted at read time; values of the wrong shape read
//! as `None` so callers can fall back to a default.
//!
//! # Example
//!
//! ```rust
//! use printer_state::FieldValue;
//! use serde_json::json;
//!
//! assert_eq!(f64::from_value(&json!(42)), Some(42.0));
//! assert_eq!(String::from_value(&json!(42)), None);
//! ```

use serde_json::Value;

/// A type that can be read out of a snapshot field
///
/// Implementations must be:
/// - Default: the value used when a field is absent or malformed
/// - Clone: so derived views can own their data
pub trait FieldValue: Default + Clone + Sized {
    /// Convert a raw value, `None` if the shape does not fit
    fn from_value(value: &Value) -> Option<Self>;
}

impl FieldValue for f64 {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_f64().filter(|v| v.is_finite())
    }
}

impl FieldValue for u64 {
    fn from_value(value: &Value) -> Option<Self> {
        value
            .as_u64()
            .or_else(|| value.as_f64().filter(|v| v.is_finite() && *v >= 0.0).map(|v| v as u64))
    }
}

impl FieldValue for bool {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_bool()
    }
}

impl FieldValue for String {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_str().map(str::to_string)
    }
}

impl FieldValue for Vec<f64> {
    /// Arrays of numbers; non-numeric members read as zero
    fn from_value(value: &Value) -> Option<Self> {
        let items = value.as_array()?;
        Some(
            items
                .iter()
                .map(|item| f64::from_value(item).unwrap_or_default())
                .collect(),
        )
    }
}
