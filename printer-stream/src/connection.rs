//! Connection manager.
//!
//! Owns exactly one transport at a time, correlates calls with responses,
//! dispatches notifications into the state synchronizer and recovers from
//! transport loss with exponential backoff.
//!
//! # Tasks
//!
//! ```text
//!                 ┌──────────────┐ control (device ready / lost)
//! connect() ───►  │  supervisor  │ ◄─────────────────────────────┐
//!                 └──────┬───────┘                               │
//!                        │ spawns one per open transport         │
//!                        ▼                                       │
//!                 ┌──────────────┐  responses ──► pending table  │
//!  transport ◄──► │   io loop    │  status updates ──► snapshot  │
//!                 └──────────────┘  lifecycle notices ───────────┘
//! ```
//!
//! The supervisor runs the handshake and the reconnect schedule. The io loop
//! is the single serial dispatch path for inbound frames, so merges are
//! applied strictly in arrival order. That includes the initial status
//! carried by a subscribe response, which is merged before the waiting
//! caller is woken. A new transport is only opened after
//! the previous io loop has exited and every pending call has been failed.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use url::Url;

use moonraker_rpc::Incoming;
use printer_state::{to_status, Snapshot, StateSynchronizer, StatusInputs, StatusView};

use crate::backoff::ReconnectBackoff;
use crate::config::ConnectionConfig;
use crate::error::{CallError, ConnectionError, Result, TransportError};
use crate::notification::{Notice, NotificationRouter};
use crate::subscription::{
    self, DeviceInfo, HandshakeError, RpcCaller, GCODE_SCRIPT, OBJECTS_SUBSCRIBE,
};
use crate::transport::{Connector, Transport, WebSocketConnector};

/// Upper bound for waiting on background tasks during teardown
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle of the managed connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected and not trying to
    #[default]
    Idle,
    /// Opening the transport
    Connecting,
    /// Identification call in flight
    Identifying,
    /// Device readiness query in flight
    QueryingInfo,
    /// Subscribe call in flight
    Subscribing,
    /// Receiving the update stream
    Ready,
    /// Transport open but the device is not ready
    AwaitingDevice,
    /// Waiting `delay` before reconnect attempt `attempt` (one based)
    Reconnecting { attempt: u32, delay: Duration },
    /// Reconnect budget exhausted; `connect()` starts over
    Abandoned,
}

impl ConnectionState {
    /// Whether a session is alive or being retried
    pub fn is_active(&self) -> bool {
        !matches!(self, ConnectionState::Idle | ConnectionState::Abandoned)
    }
}

/// Control messages from the io loop to the supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    DeviceReady,
    DeviceLost,
}

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Lost,
    Shutdown,
}

/// An outstanding call awaiting its correlated response
struct PendingCall {
    method: String,
    tx: oneshot::Sender<std::result::Result<Value, CallError>>,
}

struct Session {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// State shared between the public handle and the background tasks
struct Shared {
    config: ConnectionConfig,
    connector: Arc<dyn Connector>,

    next_id: AtomicU64,
    pending: DashMap<u64, PendingCall>,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,

    state_tx: watch::Sender<ConnectionState>,
    connected: AtomicBool,
    ready: AtomicBool,

    sync: Mutex<StateSynchronizer>,
    status_tx: watch::Sender<Arc<StatusView>>,
    file_estimate: Mutex<Option<f64>>,
    device_info: Mutex<Option<DeviceInfo>>,
    connection_id: Mutex<Option<u64>>,
}

/// Real-time connection to the printer daemon
///
/// Construct once and share by reference. Dropping the manager stops any
/// running session.
///
/// # Example
///
/// ```rust,no_run
/// use printer_stream::{ConnectionConfig, ConnectionManager};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let manager = ConnectionManager::new(ConnectionConfig::for_printer("voron.local", 7125));
/// let state = manager.connect().await?;
/// println!("connection state: {state:?}");
///
/// let status = manager.status();
/// println!("{} {:.1}°C", status.state, status.extruder.temperature);
///
/// manager.send_command("G28")?;
/// manager.disconnect().await?;
/// # Ok(())
/// # }
/// ```
pub struct ConnectionManager {
    shared: Arc<Shared>,
    session: tokio::sync::Mutex<Option<Session>>,
}

impl ConnectionManager {
    /// Create a manager using the websocket transport
    pub fn new(config: ConnectionConfig) -> Self {
        Self::with_connector(config, Arc::new(WebSocketConnector))
    }

    /// Create a manager with a custom transport connector
    pub fn with_connector(config: ConnectionConfig, connector: Arc<dyn Connector>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        let (status_tx, _) = watch::channel(Arc::new(StatusView::default()));

        Self {
            shared: Arc::new(Shared {
                config,
                connector,
                next_id: AtomicU64::new(1),
                pending: DashMap::new(),
                outbound: Mutex::new(None),
                state_tx,
                connected: AtomicBool::new(false),
                ready: AtomicBool::new(false),
                sync: Mutex::new(StateSynchronizer::new()),
                status_tx,
                file_estimate: Mutex::new(None),
                device_info: Mutex::new(None),
                connection_id: Mutex::new(None),
            }),
            session: tokio::sync::Mutex::new(None),
        }
    }

    /// Connect and wait for the first handshake outcome
    ///
    /// Returns the state reached by the first attempt: `Ready`,
    /// `AwaitingDevice`, or `Reconnecting` if the attempt failed and a retry
    /// is scheduled. Transport failures are never returned as errors; only
    /// a missing or invalid configuration is.
    ///
    /// While a session is already running this returns its current state
    /// without starting another one.
    pub async fn connect(&self) -> Result<ConnectionState> {
        let url = self.shared.config.endpoint()?;

        let first_rx = {
            let mut slot = self.session.lock().await;
            if let Some(session) = slot.as_ref() {
                if !session.task.is_finished() {
                    tracing::debug!("Connect requested while a session is running");
                    return Ok(self.state());
                }
            }

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let (first_tx, first_rx) = oneshot::channel();

            tracing::info!(%url, "Connecting to printer daemon");
            let task = tokio::spawn(supervise(
                Arc::clone(&self.shared),
                url,
                shutdown_rx,
                first_tx,
            ));

            *slot = Some(Session { shutdown_tx, task });
            first_rx
        };

        match first_rx.await {
            Ok(state) => Ok(state),
            // Disconnected before the first attempt finished
            Err(_) => Ok(self.state()),
        }
    }

    /// Tear everything down
    ///
    /// Closes the transport, fails every pending call with
    /// [`CallError::Cancelled`], cancels any scheduled reconnect and clears
    /// the snapshot. All four effects have happened when this returns.
    pub async fn disconnect(&self) -> Result<()> {
        let session = self.session.lock().await.take();

        let mut result = Ok(());
        if let Some(Session { shutdown_tx, task }) = session {
            let _ = shutdown_tx.send(true);
            let abort = task.abort_handle();

            match timeout(SHUTDOWN_TIMEOUT, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.is_cancelled() => {}
                Ok(Err(e)) => {
                    result = Err(ConnectionError::Shutdown(format!(
                        "Connection task panicked: {e}"
                    )));
                }
                Err(_) => {
                    abort.abort();
                    result = Err(ConnectionError::Shutdown(format!(
                        "Connection task did not stop within {SHUTDOWN_TIMEOUT:?}"
                    )));
                }
            }
        }

        // Covers a task that was aborted before its own teardown ran
        self.shared.outbound.lock().take();
        self.shared.fail_pending();
        self.shared.connected.store(false, Ordering::SeqCst);
        self.shared.ready.store(false, Ordering::SeqCst);

        self.shared.sync.lock().reset();
        *self.shared.device_info.lock() = None;
        *self.shared.connection_id.lock() = None;
        self.shared.status_tx.send_replace(Arc::new(StatusView::default()));
        self.shared.set_state(ConnectionState::Idle);

        tracing::info!("Disconnected from printer daemon");
        result
    }

    /// Issue a correlated call and wait for its response
    ///
    /// Fails with [`CallError::Timeout`] if no response arrives within the
    /// configured call timeout. A timeout never affects the connection.
    pub async fn call(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> std::result::Result<Value, CallError> {
        self.shared.request(method, params).await
    }

    /// Send a fire-and-forget notification
    pub fn notify(&self, method: &str, params: Option<Value>) -> std::result::Result<(), CallError> {
        self.shared.notify(method, params)
    }

    /// Run a scripted command on the device without waiting for it
    pub fn send_command(&self, script: &str) -> std::result::Result<(), CallError> {
        tracing::debug!(script, "Sending scripted command");
        self.notify(GCODE_SCRIPT, Some(json!({ "script": script })))
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    /// Subscribe to lifecycle transitions
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Whether a transport is open
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Whether the device is ready and the update stream is flowing
    pub fn is_ready(&self) -> bool {
        self.shared.ready.load(Ordering::SeqCst)
    }

    /// Latest derived status
    pub fn status(&self) -> Arc<StatusView> {
        Arc::clone(&self.shared.status_tx.borrow())
    }

    /// Subscribe to derived status changes
    pub fn watch_status(&self) -> watch::Receiver<Arc<StatusView>> {
        self.shared.status_tx.subscribe()
    }

    /// Copy of the raw snapshot
    pub fn snapshot(&self) -> Snapshot {
        self.shared.sync.lock().snapshot().clone()
    }

    /// Device details from the last info query
    pub fn device_info(&self) -> Option<DeviceInfo> {
        self.shared.device_info.lock().clone()
    }

    /// Connection id assigned by the daemon during identification
    pub fn connection_id(&self) -> Option<u64> {
        *self.shared.connection_id.lock()
    }

    /// Set the file-declared print time estimate used for remaining time
    pub fn set_file_estimate(&self, estimate: Option<f64>) {
        *self.shared.file_estimate.lock() = estimate;
        self.shared.publish_status();
    }

    /// Number of calls awaiting a response
    pub fn pending_calls(&self) -> usize {
        self.shared.pending.len()
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.shared.config
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .field("connected", &self.is_connected())
            .field("ready", &self.is_ready())
            .field("pending_calls", &self.pending_calls())
            .finish()
    }
}

// ============================================================================
// Shared state operations
// ============================================================================

impl Shared {
    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> std::result::Result<Value, CallError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let frame = moonraker_rpc::encode_call(id, method, params.as_ref())?;
        let (tx, rx) = oneshot::channel();

        // Registered and sent under the outbound lock so teardown either sees
        // the entry or the call sees no transport.
        {
            let outbound = self.outbound.lock();
            let Some(sender) = outbound.as_ref() else {
                return Err(CallError::NotConnected);
            };
            self.pending.insert(
                id,
                PendingCall {
                    method: method.to_string(),
                    tx,
                },
            );
            if sender.send(frame).is_err() {
                self.pending.remove(&id);
                return Err(CallError::NotConnected);
            }
        }

        tracing::debug!(id, method, "Call sent");

        match timeout(self.config.call_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(CallError::Cancelled),
            Err(_) => {
                self.pending.remove(&id);
                tracing::warn!(id, method, "Call timed out");
                Err(CallError::Timeout {
                    method: method.to_string(),
                    after: self.config.call_timeout,
                })
            }
        }
    }

    fn notify(&self, method: &str, params: Option<Value>) -> std::result::Result<(), CallError> {
        let frame = moonraker_rpc::encode_notification(method, params.as_ref())?;
        let outbound = self.outbound.lock();
        let sender = outbound.as_ref().ok_or(CallError::NotConnected)?;
        sender.send(frame).map_err(|_| CallError::NotConnected)
    }

    /// Fail every pending call with `Cancelled`
    fn fail_pending(&self) {
        let ids: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
        if !ids.is_empty() {
            tracing::debug!(count = ids.len(), "Cancelling pending calls");
        }
        for id in ids {
            if let Some((_, call)) = self.pending.remove(&id) {
                let _ = call.tx.send(Err(CallError::Cancelled));
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            tracing::info!(?previous, current = ?state, "Connection state changed");
        }
    }

    fn set_ready(&self, ready: bool) {
        if self.ready.swap(ready, Ordering::SeqCst) != ready {
            self.publish_status();
        }
    }

    fn apply_update(&self, partial: Map<String, Value>) {
        let changed = self.sync.lock().apply_update(partial);
        if changed {
            self.publish_status();
        }
    }

    /// Recompute the view and publish it if it differs
    fn publish_status(&self) {
        let inputs = StatusInputs {
            device_ready: self.ready.load(Ordering::SeqCst),
            file_estimate: *self.file_estimate.lock(),
        };
        let view = to_status(self.sync.lock().snapshot(), &inputs);

        self.status_tx.send_if_modified(move |current| {
            if **current == view {
                false
            } else {
                *current = Arc::new(view);
                true
            }
        });
    }

    fn handle_frame(
        &self,
        router: &NotificationRouter,
        text: &str,
        control: &mpsc::UnboundedSender<Control>,
    ) {
        for decoded in moonraker_rpc::decode_frames(text) {
            match decoded {
                Ok(Incoming::Response { id, outcome }) => match self.pending.remove(&id) {
                    Some((_, call)) => {
                        if call.method == OBJECTS_SUBSCRIBE {
                            if let Ok(result) = &outcome {
                                self.merge_subscribed_status(result);
                            }
                        }
                        let _ = call.tx.send(outcome.map_err(CallError::Remote));
                    }
                    None => tracing::debug!(id, "Response for unknown or expired call"),
                },
                Ok(Incoming::Notification { method, params }) => {
                    match router.route(&method, &params) {
                        Some(Notice::StatusUpdate(partial)) => self.apply_update(partial),
                        Some(Notice::DeviceReady) => {
                            let _ = control.send(Control::DeviceReady);
                        }
                        Some(Notice::DeviceDisconnected) | Some(Notice::DeviceShutdown) => {
                            tracing::warn!(method = %method, "Device went away");
                            let _ = control.send(Control::DeviceLost);
                        }
                        None => {}
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Dropping malformed frame"),
            }
        }
    }

    /// Merge the full status returned by a subscribe call
    fn merge_subscribed_status(&self, result: &Value) {
        match result.get("status").and_then(Value::as_object) {
            Some(status) => self.apply_update(status.clone()),
            None => tracing::warn!("Subscribe response carried no status"),
        }
    }

    /// Handshake: identify, query info, subscribe if the device is ready
    async fn handshake(&self, url: &Url) -> std::result::Result<ConnectionState, HandshakeError> {
        self.set_state(ConnectionState::Identifying);
        let identity = subscription::identify(
            self,
            &self.config.client_name,
            &self.config.client_version,
            url.as_str(),
        )
        .await?;
        *self.connection_id.lock() = Some(identity.connection_id);

        self.set_state(ConnectionState::QueryingInfo);
        let info = subscription::query_info(self).await?;
        let device_ready = info.is_ready();
        if !device_ready {
            tracing::info!(
                state = %info.state,
                message = %info.state_message,
                "Device not ready, waiting for it"
            );
        }
        *self.device_info.lock() = Some(info);

        if !device_ready {
            self.set_ready(false);
            self.set_state(ConnectionState::AwaitingDevice);
            return Ok(ConnectionState::AwaitingDevice);
        }

        self.subscribe().await
    }

    /// Register the subscription set
    ///
    /// The initial status has already been merged by the io loop when the
    /// call returns.
    async fn subscribe(&self) -> std::result::Result<ConnectionState, HandshakeError> {
        self.set_state(ConnectionState::Subscribing);
        let initial = subscription::subscribe(self, &self.config.subscription).await?;

        tracing::debug!(
            categories = initial.len(),
            version = self.config.subscription.version(),
            "Subscribed"
        );
        self.set_ready(true);
        self.set_state(ConnectionState::Ready);
        Ok(ConnectionState::Ready)
    }
}

#[async_trait]
impl RpcCaller for Shared {
    async fn call(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> std::result::Result<Value, CallError> {
        self.request(method, params).await
    }
}

// ============================================================================
// Background tasks
// ============================================================================

fn report_first(first: &mut Option<oneshot::Sender<ConnectionState>>, state: ConnectionState) {
    if let Some(tx) = first.take() {
        let _ = tx.send(state);
    }
}

/// Session loop: open, handshake, serve, tear down, back off, repeat
async fn supervise(
    shared: Arc<Shared>,
    url: Url,
    mut shutdown_rx: watch::Receiver<bool>,
    first_tx: oneshot::Sender<ConnectionState>,
) {
    let mut first = Some(first_tx);
    let mut backoff = ReconnectBackoff::new(shared.config.reconnect.clone());

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        match run_session(&shared, &url, &mut backoff, &mut first, &mut shutdown_rx).await {
            SessionEnd::Shutdown => break,
            SessionEnd::Lost => {}
        }

        let Some(delay) = backoff.next_delay() else {
            tracing::warn!(
                attempts = backoff.attempt(),
                "Reconnect budget exhausted, giving up"
            );
            shared.set_state(ConnectionState::Abandoned);
            report_first(&mut first, ConnectionState::Abandoned);
            break;
        };

        let state = ConnectionState::Reconnecting {
            attempt: backoff.attempt(),
            delay,
        };
        shared.set_state(state);
        report_first(&mut first, state);

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown_rx.changed() => break,
        }
    }
}

/// One transport lifetime
async fn run_session(
    shared: &Arc<Shared>,
    url: &Url,
    backoff: &mut ReconnectBackoff,
    first: &mut Option<oneshot::Sender<ConnectionState>>,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> SessionEnd {
    shared.set_state(ConnectionState::Connecting);

    let open_timeout = shared.config.open_timeout;
    let opened = tokio::select! {
        opened = timeout(open_timeout, shared.connector.open(url)) => opened,
        _ = shutdown_rx.changed() => return SessionEnd::Shutdown,
    };

    let transport = match opened {
        Ok(Ok(transport)) => transport,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Failed to open transport");
            return SessionEnd::Lost;
        }
        Err(_) => {
            tracing::warn!(after = ?open_timeout, "Transport open timed out");
            return SessionEnd::Lost;
        }
    };

    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (control_tx, mut control_rx) = mpsc::unbounded_channel();
    *shared.outbound.lock() = Some(out_tx);
    shared.connected.store(true, Ordering::SeqCst);

    let mut io = tokio::spawn(io_loop(Arc::clone(shared), transport, out_rx, control_tx));
    let mut io_done = false;

    let end = 'session: {
        let handshake = tokio::select! {
            outcome = shared.handshake(url) => outcome,
            _ = shutdown_rx.changed() => break 'session SessionEnd::Shutdown,
        };

        match handshake {
            Ok(state) => {
                if state == ConnectionState::Ready {
                    backoff.reset();
                }
                report_first(first, state);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Handshake failed");
                break 'session SessionEnd::Lost;
            }
        }

        loop {
            tokio::select! {
                _ = &mut io => {
                    io_done = true;
                    break 'session SessionEnd::Lost;
                }
                Some(control) = control_rx.recv() => match control {
                    Control::DeviceReady => {
                        tracing::info!("Device ready, re-subscribing");
                        let outcome = tokio::select! {
                            outcome = shared.subscribe() => outcome,
                            _ = shutdown_rx.changed() => break 'session SessionEnd::Shutdown,
                        };
                        match outcome {
                            Ok(_) => backoff.reset(),
                            Err(e) => {
                                tracing::warn!(error = %e, "Re-subscribe failed");
                                break 'session SessionEnd::Lost;
                            }
                        }
                    }
                    Control::DeviceLost => {
                        shared.set_ready(false);
                        shared.set_state(ConnectionState::AwaitingDevice);
                    }
                },
                _ = shutdown_rx.changed() => break 'session SessionEnd::Shutdown,
            }
        }
    };

    // Teardown: close the transport, then fail whatever is still pending
    shared.outbound.lock().take();
    if !io_done {
        let abort = io.abort_handle();
        if timeout(SHUTDOWN_TIMEOUT, io).await.is_err() {
            tracing::warn!("Io loop did not stop in time, aborting");
            abort.abort();
        }
    }
    shared.connected.store(false, Ordering::SeqCst);
    shared.set_ready(false);
    shared.fail_pending();

    if end == SessionEnd::Lost {
        tracing::warn!("Connection lost");
    }
    end
}

/// Single serial path for all inbound frames of one transport
async fn io_loop(
    shared: Arc<Shared>,
    transport: Transport,
    mut outbound: mpsc::UnboundedReceiver<String>,
    control: mpsc::UnboundedSender<Control>,
) {
    let Transport {
        mut sink,
        mut stream,
    } = transport;
    let router = NotificationRouter::new();

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(text)) => {
                    tracing::trace!(len = text.len(), "Frame received");
                    shared.handle_frame(&router, &text, &control);
                }
                Some(Err(TransportError::Closed)) | None => {
                    tracing::info!("Transport closed by peer");
                    break;
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Transport read failed");
                    break;
                }
            },
            message = outbound.recv() => match message {
                Some(text) => {
                    if let Err(e) = sink.send(text).await {
                        tracing::warn!(error = %e, "Transport write failed");
                        break;
                    }
                }
                None => {
                    let _ = sink.close().await;
                    break;
                }
            },
        }
    }

    shared.outbound.lock().take();
    shared.connected.store(false, Ordering::SeqCst);
    shared.fail_pending();
}
