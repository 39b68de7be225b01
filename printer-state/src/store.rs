//! Canonical snapshot storage and partial-update merging
//!
//! This module provides the core storage primitives for device state:
//! - `Snapshot`: category name -> open field mapping (or a bare value)
//! - `StateSynchronizer`: sole writer of the snapshot, applying updates in
//!   arrival order

use serde::Serialize;
use serde_json::{Map, Value};

use crate::property::FieldValue;

// ============================================================================
// Snapshot - mirror of every category observed so far
// ============================================================================

/// Mirror of device state, keyed by category
///
/// Category payloads are kept as open JSON mappings so firmware variations
/// never fail ingestion. Typed conversion happens on read, see
/// [`Snapshot::read`].
///
/// # Example
///
/// ```rust
/// use printer_state::Snapshot;
/// use serde_json::json;
///
/// let mut snapshot = Snapshot::new();
/// snapshot.apply_update(json!({"extruder": {"temperature": 189.9, "target": 190.0}})
///     .as_object().cloned().unwrap());
/// snapshot.apply_update(json!({"extruder": {"power": 0.42}})
///     .as_object().cloned().unwrap());
///
/// // target survived the second update
/// assert_eq!(snapshot.read::<f64>("extruder", "target"), 190.0);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Snapshot {
    categories: Map<String, Value>,
}

impl Snapshot {
    /// Create an empty snapshot
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a partial update, returning whether anything changed
    ///
    /// For every top-level key: when both the incoming value and the stored
    /// entry are field mappings, the incoming fields are written one level
    /// deep and unmentioned fields are kept. Anything else (scalar, array,
    /// null, first-time key) replaces the stored entry wholesale. Nested
    /// mappings below the first level are replaced, not merged.
    pub fn apply_update(&mut self, partial: Map<String, Value>) -> bool {
        let mut changed = false;

        for (key, incoming) in partial {
            match incoming {
                Value::Object(fields)
                    if matches!(self.categories.get(&key), Some(Value::Object(_))) =>
                {
                    if let Some(Value::Object(existing)) = self.categories.get_mut(&key) {
                        for (field, value) in fields {
                            if existing.get(&field) != Some(&value) {
                                existing.insert(field, value);
                                changed = true;
                            }
                        }
                    }
                }
                incoming => {
                    if self.categories.get(&key) != Some(&incoming) {
                        self.categories.insert(key, incoming);
                        changed = true;
                    }
                }
            }
        }

        changed
    }

    /// Raw value stored for a category
    pub fn get(&self, category: &str) -> Option<&Value> {
        self.categories.get(category)
    }

    /// Field mapping of a category, `None` if absent or not a mapping
    pub fn category(&self, category: &str) -> Option<&Map<String, Value>> {
        self.categories.get(category)?.as_object()
    }

    /// Raw value of a single field
    pub fn field(&self, category: &str, field: &str) -> Option<&Value> {
        self.category(category)?.get(field)
    }

    /// Read a field converted to `T`, falling back to `T::default()`
    ///
    /// Absent categories, absent fields and values of the wrong shape all
    /// read as the default.
    pub fn read<T: FieldValue>(&self, category: &str, field: &str) -> T {
        self.field(category, field)
            .and_then(T::from_value)
            .unwrap_or_default()
    }

    /// Read a field converted to `T`, `None` if absent or of the wrong shape
    pub fn try_read<T: FieldValue>(&self, category: &str, field: &str) -> Option<T> {
        self.field(category, field).and_then(T::from_value)
    }

    /// Names of every category observed so far
    pub fn category_names(&self) -> Vec<String> {
        self.categories.keys().cloned().collect()
    }

    /// Number of categories
    pub fn len(&self) -> usize {
        self.categories.len()
    }

    /// Check if nothing has been observed yet
    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    /// Forget everything
    pub fn clear(&mut self) {
        self.categories.clear();
    }

    /// Borrow the underlying mapping
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.categories
    }
}

// ============================================================================
// StateSynchronizer - the only writer of the snapshot
// ============================================================================

/// Holds the canonical snapshot and applies updates strictly in call order
///
/// The synchronizer has no internal locking. Its owner serializes access;
/// the connection manager does so by feeding it from one dispatch path.
/// The initial subscription result and streamed notifications both go
/// through [`StateSynchronizer::apply_update`].
#[derive(Debug, Default)]
pub struct StateSynchronizer {
    snapshot: Snapshot,
    updates_applied: u64,
}

impl StateSynchronizer {
    /// Create a synchronizer with an empty snapshot
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a partial update into the snapshot
    ///
    /// Returns `true` if the snapshot changed.
    pub fn apply_update(&mut self, partial: Map<String, Value>) -> bool {
        let categories = partial.len();
        let changed = self.snapshot.apply_update(partial);
        self.updates_applied += 1;

        tracing::trace!(
            categories,
            changed,
            total_updates = self.updates_applied,
            "Merged partial update"
        );

        changed
    }

    /// Current snapshot
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Number of updates applied since creation or the last reset
    pub fn updates_applied(&self) -> u64 {
        self.updates_applied
    }

    /// Clear the snapshot (used on disconnect)
    pub fn reset(&mut self) {
        tracing::debug!(
            categories = self.snapshot.len(),
            "Resetting snapshot"
        );
        self.snapshot.clear();
        self.updates_applied = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn partial(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("test update must be an object")
    }

    #[test]
    fn test_first_time_category_is_inserted() {
        let mut snapshot = Snapshot::new();
        assert!(snapshot.apply_update(partial(json!({"extruder": {"temperature": 20.5}}))));
        assert_eq!(snapshot.field("extruder", "temperature"), Some(&json!(20.5)));
        assert_eq!(snapshot.len(), 1);
    }

    #[test]
    fn test_partial_update_keeps_unmentioned_fields() {
        let mut snapshot = Snapshot::new();
        snapshot.apply_update(partial(json!({
            "extruder": {"temperature": 189.9, "target": 190, "power": 0.42}
        })));
        snapshot.apply_update(partial(json!({"extruder": {"power": 0.0}})));

        assert_eq!(
            snapshot.get("extruder"),
            Some(&json!({"temperature": 189.9, "target": 190, "power": 0.0}))
        );
    }

    #[test]
    fn test_array_value_replaces_wholesale() {
        let mut snapshot = Snapshot::new();
        snapshot.apply_update(partial(json!({"toolhead": {"position": [1, 2, 3, 4]}})));
        snapshot.apply_update(partial(json!({"toolhead": [9]})));
        assert_eq!(snapshot.get("toolhead"), Some(&json!([9])));
        assert!(snapshot.category("toolhead").is_none());
    }

    #[test]
    fn test_scalar_and_null_replace_wholesale() {
        let mut snapshot = Snapshot::new();
        snapshot.apply_update(partial(json!({"fan": {"speed": 0.5}})));
        snapshot.apply_update(partial(json!({"fan": 1})));
        assert_eq!(snapshot.get("fan"), Some(&json!(1)));

        snapshot.apply_update(partial(json!({"fan": null})));
        assert_eq!(snapshot.get("fan"), Some(&Value::Null));
    }

    #[test]
    fn test_mapping_over_scalar_replaces() {
        let mut snapshot = Snapshot::new();
        snapshot.apply_update(partial(json!({"webhooks": "ready"})));
        snapshot.apply_update(partial(json!({"webhooks": {"state": "ready"}})));
        assert_eq!(snapshot.get("webhooks"), Some(&json!({"state": "ready"})));
    }

    #[test]
    fn test_nested_mapping_is_not_merged() {
        let mut snapshot = Snapshot::new();
        snapshot.apply_update(partial(json!({
            "print_stats": {"info": {"current_layer": 3, "total_layer": 40}}
        })));
        snapshot.apply_update(partial(json!({
            "print_stats": {"info": {"current_layer": 4}}
        })));
        assert_eq!(
            snapshot.field("print_stats", "info"),
            Some(&json!({"current_layer": 4}))
        );
    }

    #[test]
    fn test_unchanged_update_reports_no_change() {
        let mut snapshot = Snapshot::new();
        let update = json!({"heater_bed": {"temperature": 60.0}});
        assert!(snapshot.apply_update(partial(update.clone())));
        assert!(!snapshot.apply_update(partial(update)));
    }

    #[test]
    fn test_read_defaults_on_missing_or_wrong_shape() {
        let mut snapshot = Snapshot::new();
        snapshot.apply_update(partial(json!({"print_stats": {"state": 5}})));

        assert_eq!(snapshot.read::<String>("print_stats", "state"), "");
        assert_eq!(snapshot.read::<f64>("missing", "field"), 0.0);
        assert!(snapshot.try_read::<f64>("print_stats", "print_duration").is_none());
    }

    #[test]
    fn test_synchronizer_counts_and_resets() {
        let mut sync = StateSynchronizer::new();
        sync.apply_update(partial(json!({"fan": {"speed": 0.1}})));
        sync.apply_update(partial(json!({"fan": {"speed": 0.2}})));
        assert_eq!(sync.updates_applied(), 2);
        assert_eq!(sync.snapshot().read::<f64>("fan", "speed"), 0.2);

        sync.reset();
        assert!(sync.snapshot().is_empty());
        assert_eq!(sync.updates_applied(), 0);
    }
}
