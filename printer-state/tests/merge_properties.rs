//! Property-based tests for snapshot merging and status derivation

use proptest::prelude::*;
use serde_json::{json, Map, Value};

use printer_state::{remaining_time, to_status, PrintState, Snapshot, StatusInputs};

// ============================================================================
// Strategies
// ============================================================================

fn category_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("extruder".to_string()),
        Just("heater_bed".to_string()),
        Just("print_stats".to_string()),
        Just("toolhead".to_string()),
        Just("fan".to_string()),
    ]
}

fn field_strategy() -> impl Strategy<Value = String> {
    "[a-z_]{1,12}"
}

fn leaf_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        (-1000.0f64..1000.0).prop_map(|v| json!(v)),
        "[a-z]{0,8}".prop_map(Value::from),
        prop::collection::vec(-10i64..10, 0..4).prop_map(|v| json!(v)),
    ]
}

fn fields_strategy() -> impl Strategy<Value = Map<String, Value>> {
    prop::collection::btree_map(field_strategy(), leaf_strategy(), 0..6)
        .prop_map(|fields| fields.into_iter().collect())
}

/// Partial updates whose categories are all field mappings
fn mapping_update_strategy() -> impl Strategy<Value = Map<String, Value>> {
    prop::collection::btree_map(category_strategy(), fields_strategy(), 0..4).prop_map(
        |categories| {
            categories
                .into_iter()
                .map(|(name, fields)| (name, Value::Object(fields)))
                .collect()
        },
    )
}

// ============================================================================
// Merge invariants
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Replaying an update is a no-op
    #[test]
    fn prop_replay_is_idempotent(
        first in mapping_update_strategy(),
        second in mapping_update_strategy(),
    ) {
        let mut snapshot = Snapshot::new();
        snapshot.apply_update(first);
        snapshot.apply_update(second.clone());
        let after_once = snapshot.clone();

        prop_assert!(!snapshot.apply_update(second));
        prop_assert_eq!(snapshot, after_once);
    }

    /// Fields not mentioned by a mapping update survive it
    #[test]
    fn prop_merge_is_non_destructive(
        first in mapping_update_strategy(),
        second in mapping_update_strategy(),
    ) {
        let mut snapshot = Snapshot::new();
        snapshot.apply_update(first.clone());
        snapshot.apply_update(second.clone());

        for (category, fields) in &first {
            let fields = fields.as_object().unwrap();
            let later = second.get(category).and_then(Value::as_object);
            for (field, value) in fields {
                let overwritten = later.map(|l| l.contains_key(field)).unwrap_or(false);
                if !overwritten {
                    prop_assert_eq!(snapshot.field(category, field), Some(value));
                }
            }
        }
    }

    /// The last written value of every field wins
    #[test]
    fn prop_latest_field_wins(
        updates in prop::collection::vec(mapping_update_strategy(), 1..6),
    ) {
        let mut snapshot = Snapshot::new();
        for update in &updates {
            snapshot.apply_update(update.clone());
        }

        for (category, fields) in updates.last().unwrap() {
            for (field, value) in fields.as_object().unwrap() {
                prop_assert_eq!(snapshot.field(category, field), Some(value));
            }
        }
    }

    /// Non-mapping values replace the stored entry wholesale
    #[test]
    fn prop_non_mapping_replaces(
        category in category_strategy(),
        fields in fields_strategy(),
        replacement in leaf_strategy(),
    ) {
        let mut snapshot = Snapshot::new();
        let mut first = Map::new();
        first.insert(category.clone(), Value::Object(fields));
        snapshot.apply_update(first);

        let mut second = Map::new();
        second.insert(category.clone(), replacement.clone());
        snapshot.apply_update(second);

        prop_assert_eq!(snapshot.get(&category), Some(&replacement));
    }
}

// ============================================================================
// Status derivation invariants
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Remaining time is never negative and zero outside of printing
    #[test]
    fn prop_remaining_never_negative(
        progress in -1.0f64..2.0,
        elapsed in 0.0f64..100_000.0,
        estimate in prop::option::of(-100.0f64..100_000.0),
        printing in any::<bool>(),
    ) {
        let state = if printing { PrintState::Printing } else { PrintState::Paused };
        let remaining = remaining_time(state, progress, elapsed, estimate);

        prop_assert!(remaining >= 0.0);
        if !printing || progress <= 0.0 {
            prop_assert_eq!(remaining, 0.0);
        }
    }

    /// The transformer reads but never changes the snapshot
    #[test]
    fn prop_to_status_is_pure(
        update in mapping_update_strategy(),
        device_ready in any::<bool>(),
    ) {
        let mut snapshot = Snapshot::new();
        snapshot.apply_update(update);
        let before = snapshot.clone();
        let inputs = StatusInputs { device_ready, file_estimate: None };

        let first = to_status(&snapshot, &inputs);
        let second = to_status(&snapshot, &inputs);

        prop_assert_eq!(first, second);
        prop_assert_eq!(snapshot, before);
    }
}
