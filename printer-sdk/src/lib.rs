//! # Printer SDK - Live status for 3D printer dashboards
//!
//! Connects to a printer's control daemon over a websocket, keeps a merged
//! snapshot of the device's status objects and exposes it as a flat,
//! display-ready [`StatusView`]:
//!
//! ```rust,no_run
//! use printer_sdk::PrinterSystem;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), printer_sdk::SdkError> {
//!     let system = PrinterSystem::new("printer.local", 7125)?;
//!     system.connect().await?;
//!
//!     let view = system.status();
//!     println!("{} on layer {:?}", view.state, view.layer);
//!
//!     system.send_command("G28")?;            // fire and forget
//!     println!("connected: {}", system.connected());
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Key Features
//!
//! - **Automatic reconnects**: exponential backoff, the handshake reruns on every open
//! - **Incremental merge**: partial status pushes never erase unrelated fields
//! - **Reactive status**: `watch_status()` yields a new view only when something changed
//! - **Sampled flags**: `connected()` and `ready()` for polling UIs
//!
//! ## Architecture
//!
//! ```text
//! printer-sdk (PrinterSystem facade)
//!     ↓
//! printer-stream (ConnectionManager, handshake, reconnects)
//!     ↓
//! printer-state (snapshot merge, status transformer)   moonraker-rpc (wire codec)
//! ```

// Main exports
pub use error::SdkError;
pub use system::{ConnectionFlags, PrinterSystem, PrinterSystemBuilder};

// Re-export commonly used types from the lower crates
pub use printer_state::{
    init_logging, init_logging_from_env, HeaterReading, LayerInfo, LoggingMode, Position,
    PrintState, StatusView,
};
pub use printer_stream::{
    CallError, ConnectionConfig, ConnectionState, Connector, DeviceInfo, ReconnectPolicy, Scheme,
    Transport, TransportError,
};

// Internal modules
mod error;
mod system;
