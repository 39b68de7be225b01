//! Subscription protocol.
//!
//! The handshake run on every freshly opened transport:
//!
//! ```text
//! identify ──► query device info ──► subscribe (only if the device is ready)
//! ```
//!
//! Each step is one correlated call. A failed step is a connection failure;
//! retrying is left to the connection manager's reconnect policy.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::CallError;

/// Identify this client to the daemon
pub const IDENTIFY: &str = "server.connection.identify";
/// Query device readiness and host details
pub const PRINTER_INFO: &str = "printer.info";
/// Register interest in state categories
pub const OBJECTS_SUBSCRIBE: &str = "printer.objects.subscribe";
/// Run a scripted command (sent without an id)
pub const GCODE_SCRIPT: &str = "printer.gcode.script";

/// Anything that can issue correlated calls
#[async_trait]
pub trait RpcCaller: Send + Sync {
    async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, CallError>;
}

/// Which handshake step failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStep {
    Identify,
    QueryInfo,
    Subscribe,
}

impl std::fmt::Display for HandshakeStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            HandshakeStep::Identify => "identify",
            HandshakeStep::QueryInfo => "query info",
            HandshakeStep::Subscribe => "subscribe",
        })
    }
}

/// Handshake failure. Treated as a transport failure by the caller.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    /// The step's call failed
    #[error("{step} call failed: {source}")]
    Call {
        step: HandshakeStep,
        #[source]
        source: CallError,
    },

    /// The step's result did not have the expected shape
    #[error("{step} returned an invalid result: {reason}")]
    InvalidResult { step: HandshakeStep, reason: String },
}

/// Fixed, versioned list of categories to subscribe to
///
/// Each category either asks for all fields or a specific field list. The
/// set is configuration and identical across reconnections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSet {
    version: u32,
    categories: Vec<(String, Option<Vec<String>>)>,
}

impl Default for SubscriptionSet {
    fn default() -> Self {
        Self::v1()
    }
}

impl SubscriptionSet {
    /// Empty set with an explicit version
    pub fn new(version: u32) -> Self {
        Self {
            version,
            categories: Vec::new(),
        }
    }

    /// Categories backing the dashboard status view
    pub fn v1() -> Self {
        Self::new(1)
            .with_all("print_stats")
            .with_all("virtual_sdcard")
            .with_all("display_status")
            .with_fields("extruder", &["temperature", "target", "power"])
            .with_fields("heater_bed", &["temperature", "target", "power"])
            .with_fields(
                "toolhead",
                &["position", "homed_axes", "print_time", "estimated_print_time"],
            )
            .with_fields("gcode_move", &["speed_factor", "extrude_factor"])
            .with_fields("fan", &["speed"])
            .with_all("webhooks")
    }

    /// Subscribe to every field of a category
    pub fn with_all(mut self, category: impl Into<String>) -> Self {
        self.upsert(category.into(), None);
        self
    }

    /// Subscribe to specific fields of a category
    pub fn with_fields(mut self, category: impl Into<String>, fields: &[&str]) -> Self {
        let fields = fields.iter().map(|f| f.to_string()).collect();
        self.upsert(category.into(), Some(fields));
        self
    }

    fn upsert(&mut self, category: String, fields: Option<Vec<String>>) {
        match self.categories.iter_mut().find(|(name, _)| *name == category) {
            Some(entry) => entry.1 = fields,
            None => self.categories.push((category, fields)),
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.categories.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    /// Params for the subscribe call: `{"objects": {category: null | [fields]}}`
    pub fn to_params(&self) -> Value {
        let objects: Map<String, Value> = self
            .categories
            .iter()
            .map(|(name, fields)| {
                let fields = match fields {
                    Some(fields) => json!(fields),
                    None => Value::Null,
                };
                (name.clone(), fields)
            })
            .collect();
        json!({ "objects": objects })
    }
}

/// Device details reported by the info query
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceInfo {
    /// "ready", "startup", "shutdown" or "error"
    pub state: String,
    pub state_message: String,
    pub hostname: String,
    pub software_version: String,
}

impl DeviceInfo {
    pub fn is_ready(&self) -> bool {
        self.state == "ready"
    }
}

/// Identity assigned by the daemon
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientIdentity {
    pub connection_id: u64,
}

/// Identify this client
pub async fn identify<C: RpcCaller + ?Sized>(
    caller: &C,
    client_name: &str,
    client_version: &str,
    url: &str,
) -> Result<ClientIdentity, HandshakeError> {
    let params = json!({
        "client_name": client_name,
        "version": client_version,
        "type": "web",
        "url": url,
    });

    let result = caller
        .call(IDENTIFY, Some(params))
        .await
        .map_err(|source| HandshakeError::Call {
            step: HandshakeStep::Identify,
            source,
        })?;

    parse_result(HandshakeStep::Identify, result)
}

/// Ask the daemon whether the device is ready
pub async fn query_info<C: RpcCaller + ?Sized>(caller: &C) -> Result<DeviceInfo, HandshakeError> {
    let result = caller
        .call(PRINTER_INFO, None)
        .await
        .map_err(|source| HandshakeError::Call {
            step: HandshakeStep::QueryInfo,
            source,
        })?;

    parse_result(HandshakeStep::QueryInfo, result)
}

/// Register the subscription set, returning the initial full snapshot
pub async fn subscribe<C: RpcCaller + ?Sized>(
    caller: &C,
    set: &SubscriptionSet,
) -> Result<Map<String, Value>, HandshakeError> {
    let mut result = caller
        .call(OBJECTS_SUBSCRIBE, Some(set.to_params()))
        .await
        .map_err(|source| HandshakeError::Call {
            step: HandshakeStep::Subscribe,
            source,
        })?;

    match result.get_mut("status").map(Value::take) {
        Some(Value::Object(status)) => Ok(status),
        _ => Err(HandshakeError::InvalidResult {
            step: HandshakeStep::Subscribe,
            reason: "missing status object".to_string(),
        }),
    }
}

fn parse_result<T: serde::de::DeserializeOwned>(
    step: HandshakeStep,
    result: Value,
) -> Result<T, HandshakeError> {
    if !result.is_object() {
        return Err(HandshakeError::InvalidResult {
            step,
            reason: format!("expected an object, got {result}"),
        });
    }
    serde_json::from_value(result).map_err(|e| HandshakeError::InvalidResult {
        step,
        reason: e.to_string(),
    })
}
