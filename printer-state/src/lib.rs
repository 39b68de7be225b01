//! Printer State
//!
//! Canonical mirror of a printer's device state plus the derived view the
//! dashboard renders.
//!
//! # Features
//!
//! - **Partial merging**: category updates carrying only changed fields never
//!   erase previously observed fields
//! - **Open payloads**: categories are untyped mappings, converted on read
//! - **Pure status derivation**: [`to_status`] maps a snapshot into a fully
//!   populated [`StatusView`]
//!
//! # Quick Start
//!
//! ```rust
//! use printer_state::{to_status, PrintState, StateSynchronizer, StatusInputs};
//! use serde_json::json;
//!
//! let mut sync = StateSynchronizer::new();
//! sync.apply_update(json!({
//!     "print_stats": {"state": "printing", "print_duration": 600.0},
//!     "virtual_sdcard": {"progress": 0.5}
//! }).as_object().cloned().unwrap());
//!
//! let view = to_status(sync.snapshot(), &StatusInputs::default());
//! assert_eq!(view.state, PrintState::Printing);
//! assert_eq!(view.remaining, 600.0);
//! ```
//!
//! # Architecture
//!
//! ```text
//! partial update ──► StateSynchronizer ──► Snapshot ──► to_status ──► StatusView
//!                    (one-level merge)     (open map)   (pure)        (immutable)
//! ```

// Modules
pub mod logging;
pub mod property;
pub mod status;
pub mod store;

// Re-exports - Public API
pub use logging::{init_logging, init_logging_from_env, init_silent, LoggingError, LoggingMode};
pub use property::FieldValue;
pub use status::{
    file_name, remaining_time, round_to, to_status, HeaterReading, LayerInfo, Position,
    PrintState, StatusInputs, StatusView,
};
pub use store::{Snapshot, StateSynchronizer};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::status::{to_status, PrintState, StatusInputs, StatusView};
    pub use crate::store::{Snapshot, StateSynchronizer};
}
