//! Notification dispatch table.
//!
//! Inbound notifications are routed by event name to plain handler
//! functions that turn the decoded params into a [`Notice`]. Unrecognized
//! events and malformed params are logged and dropped; neither ever
//! reaches the connection state.

use std::collections::HashMap;

use serde_json::{Map, Value};

/// Partial status update pushed for subscribed categories
pub const STATUS_UPDATE: &str = "notify_status_update";
/// The firmware host finished starting up
pub const DEVICE_READY: &str = "notify_klippy_ready";
/// The daemon lost its link to the firmware host
pub const DEVICE_DISCONNECTED: &str = "notify_klippy_disconnected";
/// The firmware host entered its shutdown state
pub const DEVICE_SHUTDOWN: &str = "notify_klippy_shutdown";

/// A recognized notification, ready to act on
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    /// Partial update to merge into the snapshot
    StatusUpdate(Map<String, Value>),
    /// Device became ready; subscriptions must be re-established
    DeviceReady,
    /// Device link lost while the transport stays open
    DeviceDisconnected,
    /// Device shut down while the transport stays open
    DeviceShutdown,
}

/// Handler entry: decoded params in, notice out (`None` if malformed)
pub type Handler = fn(&[Value]) -> Option<Notice>;

/// Routes notifications by event name
#[derive(Clone)]
pub struct NotificationRouter {
    handlers: HashMap<&'static str, Handler>,
}

impl std::fmt::Debug for NotificationRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationRouter")
            .field("events", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for NotificationRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationRouter {
    /// Router with the handlers the connection manager understands
    pub fn new() -> Self {
        let mut handlers: HashMap<&'static str, Handler> = HashMap::new();
        handlers.insert(STATUS_UPDATE, status_update);
        handlers.insert(DEVICE_READY, device_ready);
        handlers.insert(DEVICE_DISCONNECTED, device_disconnected);
        handlers.insert(DEVICE_SHUTDOWN, device_shutdown);
        Self { handlers }
    }

    /// Whether an event name has a handler
    pub fn is_recognized(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    /// Route a notification to its handler
    ///
    /// Returns `None` for unrecognized events and malformed params.
    pub fn route(&self, method: &str, params: &[Value]) -> Option<Notice> {
        let Some(handler) = self.handlers.get(method) else {
            tracing::trace!(method, "Discarding unrecognized notification");
            return None;
        };

        let notice = handler(params);
        if notice.is_none() {
            tracing::warn!(method, "Dropping malformed notification");
        }
        notice
    }
}

/// `params[0]` must be the partial status object
fn status_update(params: &[Value]) -> Option<Notice> {
    match params.first() {
        Some(Value::Object(partial)) => Some(Notice::StatusUpdate(partial.clone())),
        _ => None,
    }
}

fn device_ready(_params: &[Value]) -> Option<Notice> {
    Some(Notice::DeviceReady)
}

fn device_disconnected(_params: &[Value]) -> Option<Notice> {
    Some(Notice::DeviceDisconnected)
}

fn device_shutdown(_params: &[Value]) -> Option<Notice> {
    Some(Notice::DeviceShutdown)
}
