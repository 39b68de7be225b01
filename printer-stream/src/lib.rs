//! # printer-stream
//!
//! Real-time connection to a printer control daemon over a websocket.
//!
//! The [`ConnectionManager`] owns the transport, runs the subscription
//! handshake on every open, correlates calls with responses, merges pushed
//! status updates into the canonical snapshot and reconnects with
//! exponential backoff when the transport goes away.
//!
//! ```text
//! connect() → Connecting → Identifying → QueryingInfo → Subscribing → Ready
//!                 ▲                          │ device not ready
//!                 │                          ▼
//!            Reconnecting ◄── lost ── AwaitingDevice ── device ready ──► Subscribing
//!                 │
//!                 ▼ budget exhausted
//!             Abandoned
//! ```
//!
//! Lifecycle failures never surface as errors. They show up as
//! [`ConnectionState`] transitions and the `is_connected` / `is_ready`
//! flags. Only configuration errors and per-call failures are returned.

mod backoff;
mod config;
mod connection;
mod error;
pub mod notification;
pub mod subscription;
pub mod transport;

pub use backoff::ReconnectBackoff;
pub use config::{ConnectionConfig, ReconnectPolicy, Scheme};
pub use connection::{ConnectionManager, ConnectionState};
pub use error::{CallError, ConfigError, ConnectionError, Result, TransportError};
pub use notification::{Notice, NotificationRouter};
pub use subscription::{DeviceInfo, SubscriptionSet};
pub use transport::{Connector, Transport, WebSocketConnector};
pub use url::Url;
