//! Status transformer - derives the consumer-facing view from a snapshot
//!
//! The transformer is a pure function of the snapshot plus two inputs that
//! live outside it: whether the device reported itself ready, and an optional
//! file-declared print-time estimate. It never mutates the snapshot; rounding
//! applies to the produced view only.

use serde::{Deserialize, Serialize};

use crate::store::Snapshot;

/// Normalized print state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrintState {
    /// A job is running
    Printing,
    /// A job is paused
    Paused,
    /// The last job finished
    Complete,
    /// The last job was cancelled
    Cancelled,
    /// The last job failed
    Error,
    /// Idle and able to accept a job
    Ready,
    /// Idle and not able to accept a job
    Offline,
}

impl PrintState {
    /// Parse from the device's print-state string
    ///
    /// Handles the vendor vocabulary:
    /// - "printing", "paused", "complete", "cancelled", "error"
    /// - "standby" and "" (idle): `Ready` if the device is ready, else `Offline`
    ///
    /// Unknown strings are treated as idle.
    pub fn from_device_state(state: &str, device_ready: bool) -> Self {
        match state.trim().to_ascii_lowercase().as_str() {
            "printing" => PrintState::Printing,
            "paused" => PrintState::Paused,
            "complete" => PrintState::Complete,
            "cancelled" => PrintState::Cancelled,
            "error" => PrintState::Error,
            _ if device_ready => PrintState::Ready,
            _ => PrintState::Offline,
        }
    }

    /// Lowercase label used in the dashboard
    pub fn as_str(&self) -> &'static str {
        match self {
            PrintState::Printing => "printing",
            PrintState::Paused => "paused",
            PrintState::Complete => "complete",
            PrintState::Cancelled => "cancelled",
            PrintState::Error => "error",
            PrintState::Ready => "ready",
            PrintState::Offline => "offline",
        }
    }

    /// Whether a job is currently loaded (printing or paused)
    pub fn is_active(&self) -> bool {
        matches!(self, PrintState::Printing | PrintState::Paused)
    }
}

impl Default for PrintState {
    fn default() -> Self {
        PrintState::Offline
    }
}

impl std::fmt::Display for PrintState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One heater's readings, rounded for display
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HeaterReading {
    /// Current temperature, one decimal
    pub temperature: f64,
    /// Target temperature, one decimal
    pub target: f64,
    /// Power ratio 0..1, two decimals
    pub power: f64,
}

/// Toolhead position
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub e: f64,
}

/// Layer progress as reported by the slicer hints
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerInfo {
    pub current: u64,
    pub total: u64,
}

/// Inputs the transformer needs besides the snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatusInputs {
    /// Device reported itself ready
    pub device_ready: bool,
    /// Total print time declared by the loaded file, in seconds
    pub file_estimate: Option<f64>,
}

/// Read-only projection of the snapshot into dashboard vocabulary
///
/// Always fully populated: absent data reads as zero, empty or false.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusView {
    pub state: PrintState,
    /// Final path segment of the loaded file
    pub filename: Option<String>,
    /// Fraction complete, 0..1
    pub progress: f64,
    /// Seconds spent printing
    pub elapsed: f64,
    /// Seconds left, zero unless printing with progress
    pub remaining: f64,
    pub extruder: HeaterReading,
    pub bed: HeaterReading,
    pub position: Position,
    pub homed_axes: String,
    pub speed_factor: f64,
    pub fan_speed: f64,
    pub message: String,
    pub layer: LayerInfo,
}

/// Derive a [`StatusView`] from a snapshot
pub fn to_status(snapshot: &Snapshot, inputs: &StatusInputs) -> StatusView {
    let state = PrintState::from_device_state(
        &snapshot.read::<String>("print_stats", "state"),
        inputs.device_ready,
    );

    let progress = snapshot
        .try_read::<f64>("virtual_sdcard", "progress")
        .or_else(|| snapshot.try_read::<f64>("display_status", "progress"))
        .unwrap_or_default()
        .clamp(0.0, 1.0);

    let elapsed = snapshot
        .read::<f64>("print_stats", "print_duration")
        .max(0.0);

    let message = snapshot
        .try_read::<String>("display_status", "message")
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| snapshot.read::<String>("print_stats", "message"));

    StatusView {
        state,
        filename: file_name(snapshot.try_read::<String>("print_stats", "filename").as_deref()),
        progress,
        elapsed,
        remaining: remaining_time(state, progress, elapsed, inputs.file_estimate),
        extruder: heater(snapshot, "extruder"),
        bed: heater(snapshot, "heater_bed"),
        position: position(snapshot),
        homed_axes: snapshot.read::<String>("toolhead", "homed_axes"),
        speed_factor: round_to(snapshot.read::<f64>("gcode_move", "speed_factor"), 2),
        fan_speed: round_to(snapshot.read::<f64>("fan", "speed"), 2),
        message,
        layer: layer(snapshot),
    }
}

/// Seconds left in the current job
///
/// Only computed while printing with progress above zero. A file-declared
/// estimate wins over extrapolating from progress. Never negative.
pub fn remaining_time(
    state: PrintState,
    progress: f64,
    elapsed: f64,
    file_estimate: Option<f64>,
) -> f64 {
    if state != PrintState::Printing || progress <= 0.0 {
        return 0.0;
    }

    let remaining = match file_estimate.filter(|estimate| *estimate > 0.0) {
        Some(estimate) => estimate - elapsed,
        None => elapsed / progress - elapsed,
    };

    if remaining.is_finite() {
        remaining.max(0.0)
    } else {
        0.0
    }
}

/// Final segment of a path, `None` for an absent or empty path
pub fn file_name(path: Option<&str>) -> Option<String> {
    let name = path?.rsplit('/').next()?;
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Round half away from zero to `places` decimals
pub fn round_to(value: f64, places: i32) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

fn heater(snapshot: &Snapshot, category: &str) -> HeaterReading {
    HeaterReading {
        temperature: round_to(snapshot.read::<f64>(category, "temperature"), 1),
        target: round_to(snapshot.read::<f64>(category, "target"), 1),
        power: round_to(snapshot.read::<f64>(category, "power"), 2),
    }
}

fn position(snapshot: &Snapshot) -> Position {
    let coords = snapshot.read::<Vec<f64>>("toolhead", "position");
    let axis = |index: usize| round_to(coords.get(index).copied().unwrap_or_default(), 2);
    Position {
        x: axis(0),
        y: axis(1),
        z: axis(2),
        e: axis(3),
    }
}

fn layer(snapshot: &Snapshot) -> LayerInfo {
    let info = snapshot.field("print_stats", "info");
    let read = |key: &str| {
        info.and_then(|info| info.get(key))
            .and_then(serde_json::Value::as_u64)
            .unwrap_or_default()
    };
    LayerInfo {
        current: read("current_layer"),
        total: read("total_layer"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::{json, Value};

    fn snapshot_from(value: Value) -> Snapshot {
        let mut snapshot = Snapshot::new();
        snapshot.apply_update(value.as_object().cloned().unwrap());
        snapshot
    }

    #[rstest]
    #[case("printing", false, PrintState::Printing)]
    #[case("paused", false, PrintState::Paused)]
    #[case("complete", true, PrintState::Complete)]
    #[case("cancelled", true, PrintState::Cancelled)]
    #[case("error", true, PrintState::Error)]
    #[case("standby", true, PrintState::Ready)]
    #[case("standby", false, PrintState::Offline)]
    #[case("", true, PrintState::Ready)]
    #[case("", false, PrintState::Offline)]
    #[case("PRINTING", false, PrintState::Printing)]
    #[case("startup", true, PrintState::Ready)]
    fn test_from_device_state(
        #[case] raw: &str,
        #[case] ready: bool,
        #[case] expected: PrintState,
    ) {
        assert_eq!(PrintState::from_device_state(raw, ready), expected);
    }

    #[test]
    fn test_complete_then_empty_with_ready_flag() {
        let inputs = StatusInputs {
            device_ready: true,
            file_estimate: None,
        };
        let mut snapshot = snapshot_from(json!({"print_stats": {"state": "complete"}}));
        assert_eq!(to_status(&snapshot, &inputs).state, PrintState::Complete);

        snapshot.apply_update(json!({"print_stats": {"state": ""}}).as_object().cloned().unwrap());
        assert_eq!(to_status(&snapshot, &inputs).state, PrintState::Ready);
    }

    #[test]
    fn test_remaining_extrapolated_from_progress() {
        let snapshot = snapshot_from(json!({
            "print_stats": {"state": "printing", "print_duration": 600},
            "virtual_sdcard": {"progress": 0.5}
        }));
        let view = to_status(&snapshot, &StatusInputs::default());
        assert_eq!(view.remaining, 600.0);
        assert_eq!(view.elapsed, 600.0);
    }

    #[test]
    fn test_remaining_prefers_file_estimate() {
        assert_eq!(remaining_time(PrintState::Printing, 0.5, 600.0, Some(1000.0)), 400.0);
        assert_eq!(remaining_time(PrintState::Printing, 0.9, 1500.0, Some(1000.0)), 0.0);
    }

    #[rstest]
    #[case(PrintState::Paused, 0.5, 600.0)]
    #[case(PrintState::Printing, 0.0, 600.0)]
    #[case(PrintState::Complete, 1.0, 600.0)]
    fn test_remaining_zero_when_not_computable(
        #[case] state: PrintState,
        #[case] progress: f64,
        #[case] elapsed: f64,
    ) {
        assert_eq!(remaining_time(state, progress, elapsed, None), 0.0);
    }

    #[test]
    fn test_rounding_does_not_touch_snapshot() {
        let snapshot = snapshot_from(json!({
            "extruder": {"temperature": 189.96, "target": 190.04, "power": 0.4249}
        }));
        let view = to_status(&snapshot, &StatusInputs::default());
        assert_eq!(view.extruder.temperature, 190.0);
        assert_eq!(view.extruder.target, 190.0);
        assert_eq!(view.extruder.power, 0.42);
        assert_eq!(snapshot.field("extruder", "temperature"), Some(&json!(189.96)));
    }

    #[rstest]
    #[case(Some("gcodes/parts/bracket.gcode"), Some("bracket.gcode"))]
    #[case(Some("bracket.gcode"), Some("bracket.gcode"))]
    #[case(Some(""), None)]
    #[case(Some("gcodes/"), None)]
    #[case(None, None)]
    fn test_file_name(#[case] path: Option<&str>, #[case] expected: Option<&str>) {
        assert_eq!(file_name(path), expected.map(str::to_string));
    }

    #[test]
    fn test_empty_snapshot_is_fully_populated() {
        let view = to_status(&Snapshot::new(), &StatusInputs::default());
        assert_eq!(view.state, PrintState::Offline);
        assert_eq!(view.filename, None);
        assert_eq!(view.progress, 0.0);
        assert_eq!(view.extruder, HeaterReading::default());
        assert_eq!(view.position, Position::default());
        assert_eq!(view.layer, LayerInfo::default());
        assert!(view.message.is_empty());
    }

    #[test]
    fn test_position_layer_and_message() {
        let snapshot = snapshot_from(json!({
            "toolhead": {"position": [10.123, 20.5, 0.2, 1234.5678], "homed_axes": "xyz"},
            "print_stats": {"message": "stats", "info": {"current_layer": 7, "total_layer": 120}},
            "display_status": {"message": "", "progress": 0.25},
            "fan": {"speed": 0.333}
        }));
        let view = to_status(&snapshot, &StatusInputs::default());
        assert_eq!(view.position, Position { x: 10.12, y: 20.5, z: 0.2, e: 1234.57 });
        assert_eq!(view.homed_axes, "xyz");
        assert_eq!(view.layer, LayerInfo { current: 7, total: 120 });
        assert_eq!(view.message, "stats");
        assert_eq!(view.progress, 0.25);
        assert_eq!(view.fan_speed, 0.33);
    }

    #[test]
    fn test_state_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&PrintState::Cancelled).unwrap(), "\"cancelled\"");
        assert_eq!(PrintState::Ready.to_string(), "ready");
    }
}
