//! Test helpers for integration testing.
//!
//! This module provides:
//! - `MockConnector`: an in-memory `Connector` that hands out channel-backed
//!   transports and can refuse a number of opens
//! - `FakeDaemon`: a scripted daemon answering the handshake calls
//! - `DaemonHandle`: lets a test push frames, inspect received calls and
//!   drop the connection

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc as fmpsc;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use url::Url;

use printer_stream::subscription::{IDENTIFY, OBJECTS_SUBSCRIBE, PRINTER_INFO};
use printer_stream::{
    ConnectionConfig, ConnectionManager, ConnectionState, Connector, Transport, TransportError,
};

/// How the fake daemon answers
#[derive(Debug, Clone)]
pub struct DaemonScript {
    /// State reported by the info query
    pub device_state: String,
    /// Status returned by the subscribe call
    pub initial_status: Value,
    /// Answer calls outside the handshake (echoing id and method)
    pub answer_other_calls: bool,
    /// Methods answered with an error object
    pub rejected: Vec<String>,
    /// Status update pushed in the same frame as the subscribe response
    pub update_after_subscribe: Option<Value>,
}

impl Default for DaemonScript {
    fn default() -> Self {
        Self {
            device_state: "ready".to_string(),
            initial_status: json!({
                "extruder": {"temperature": 189.9, "target": 190, "power": 0.42},
                "print_stats": {"state": "standby", "filename": ""}
            }),
            answer_other_calls: true,
            rejected: Vec::new(),
            update_after_subscribe: None,
        }
    }
}

impl DaemonScript {
    pub fn silent() -> Self {
        Self {
            answer_other_calls: false,
            ..Default::default()
        }
    }

    pub fn starting_up() -> Self {
        Self {
            device_state: "startup".to_string(),
            ..Default::default()
        }
    }

    pub fn pushing_after_subscribe(update: Value) -> Self {
        Self {
            update_after_subscribe: Some(update),
            ..Default::default()
        }
    }

    pub fn rejecting(method: &str) -> Self {
        Self {
            rejected: vec![method.to_string()],
            ..Default::default()
        }
    }
}

/// Test side of one open transport
#[derive(Clone)]
pub struct DaemonHandle {
    to_client: fmpsc::UnboundedSender<Result<String, TransportError>>,
    received: Arc<Mutex<Vec<Value>>>,
}

impl DaemonHandle {
    /// Push a notification to the client
    pub fn notify(&self, method: &str, params: Value) {
        self.send_raw(&json!({"jsonrpc": "2.0", "method": method, "params": params}).to_string());
    }

    /// Push arbitrary text to the client
    pub fn send_raw(&self, text: &str) {
        let _ = self.to_client.unbounded_send(Ok(text.to_string()));
    }

    /// Answer a call by id
    pub fn respond(&self, id: u64, result: Value) {
        self.send_raw(&json!({"jsonrpc": "2.0", "id": id, "result": result}).to_string());
    }

    /// Send a close frame, then end the stream
    pub fn send_close(&self) {
        let _ = self.to_client.unbounded_send(Err(TransportError::Closed));
        self.to_client.close_channel();
    }

    /// Close the transport from the daemon side
    pub fn close(&self) {
        self.to_client.close_channel();
    }

    /// Every frame the client sent, decoded
    pub fn received(&self) -> Vec<Value> {
        self.received.lock().clone()
    }

    /// Methods of every frame the client sent, in order
    pub fn received_methods(&self) -> Vec<String> {
        self.received
            .lock()
            .iter()
            .filter_map(|frame| frame.get("method").and_then(Value::as_str))
            .map(str::to_string)
            .collect()
    }

    pub fn count_calls(&self, method: &str) -> usize {
        self.received_methods().iter().filter(|m| *m == method).count()
    }
}

/// In-memory connector that spawns a `FakeDaemon` per open
pub struct MockConnector {
    script: DaemonScript,
    refuse_remaining: AtomicU32,
    hang_remaining: AtomicU32,
    opens: AtomicU32,
    sessions: mpsc::UnboundedSender<DaemonHandle>,
}

impl MockConnector {
    /// Returns the connector and a receiver yielding one handle per open
    pub fn new(script: DaemonScript) -> (Arc<Self>, mpsc::UnboundedReceiver<DaemonHandle>) {
        let (sessions, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            script,
            refuse_remaining: AtomicU32::new(0),
            hang_remaining: AtomicU32::new(0),
            opens: AtomicU32::new(0),
            sessions,
        });
        (connector, rx)
    }

    /// Refuse the next `count` opens
    pub fn refuse(&self, count: u32) {
        self.refuse_remaining.store(count, Ordering::SeqCst);
    }

    /// Never complete the next `count` opens
    pub fn hang(&self, count: u32) {
        self.hang_remaining.store(count, Ordering::SeqCst);
    }

    /// Number of open attempts, refused ones included
    pub fn opens(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self, _url: &Url) -> Result<Transport, TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);

        let refused = self
            .refuse_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportError::Open("connection refused".to_string()));
        }

        let hangs = self
            .hang_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if hangs {
            futures::future::pending::<()>().await;
        }

        let (to_client, client_rx) = fmpsc::unbounded::<Result<String, TransportError>>();
        let (client_tx, from_client) = fmpsc::unbounded::<String>();

        let handle = DaemonHandle {
            to_client,
            received: Arc::new(Mutex::new(Vec::new())),
        };
        tokio::spawn(FakeDaemon::serve(
            self.script.clone(),
            handle.clone(),
            from_client,
        ));
        let _ = self.sessions.send(handle);

        let sink = client_tx.sink_map_err(|e| TransportError::Io(e.to_string()));
        Ok(Transport::new(sink, client_rx))
    }
}

/// Scripted daemon behind one transport
pub struct FakeDaemon;

impl FakeDaemon {
    async fn serve(
        script: DaemonScript,
        handle: DaemonHandle,
        mut from_client: fmpsc::UnboundedReceiver<String>,
    ) {
        let mut connection_id = 7u64;

        while let Some(frame) = from_client.next().await {
            let Ok(request) = serde_json::from_str::<Value>(&frame) else {
                continue;
            };
            handle.received.lock().push(request.clone());

            let Some(id) = request.get("id").and_then(Value::as_u64) else {
                continue;
            };
            let method = request["method"].as_str().unwrap_or_default().to_string();

            if script.rejected.contains(&method) {
                handle.send_raw(
                    &json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "error": {"code": -32601, "message": format!("Method not found: {method}")}
                    })
                    .to_string(),
                );
                continue;
            }

            let result = match method.as_str() {
                IDENTIFY => {
                    connection_id += 1;
                    json!({"connection_id": connection_id})
                }
                PRINTER_INFO => json!({
                    "state": script.device_state,
                    "state_message": "Printer is ready",
                    "hostname": "voron",
                    "software_version": "v0.12.0"
                }),
                OBJECTS_SUBSCRIBE => {
                    let result = json!({"eventtime": 3021.4, "status": script.initial_status});
                    if let Some(update) = &script.update_after_subscribe {
                        let response = json!({"jsonrpc": "2.0", "id": id, "result": result});
                        let push = json!({
                            "jsonrpc": "2.0",
                            "method": "notify_status_update",
                            "params": [update, 3021.5]
                        });
                        handle.send_raw(&format!("{response}\n{push}"));
                        continue;
                    }
                    result
                }
                _ if script.answer_other_calls => json!({"id": id, "method": method}),
                _ => continue,
            };
            handle.respond(id, result);
        }
    }
}

/// Config pointing at a fake endpoint with test-friendly timings
pub fn test_config() -> ConnectionConfig {
    ConnectionConfig::for_printer("printer.test", 7125)
        .with_call_timeout(Duration::from_secs(10))
        .with_reconnect(Duration::from_secs(1), Duration::from_secs(30), 10)
}

/// Manager wired to a fresh mock connector
pub fn mock_manager(
    script: DaemonScript,
    config: ConnectionConfig,
) -> (
    ConnectionManager,
    Arc<MockConnector>,
    mpsc::UnboundedReceiver<DaemonHandle>,
) {
    let (connector, sessions) = MockConnector::new(script);
    let manager = ConnectionManager::with_connector(config, connector.clone());
    (manager, connector, sessions)
}

/// Wait until the state matches, returning the matching state
pub async fn wait_for_state(
    states: &mut watch::Receiver<ConnectionState>,
    predicate: impl Fn(&ConnectionState) -> bool,
) -> ConnectionState {
    let state = tokio::time::timeout(Duration::from_secs(120), states.wait_for(|s| predicate(s)))
        .await
        .expect("timed out waiting for connection state")
        .expect("state channel closed");
    *state
}

/// Yield until `condition` holds
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}
