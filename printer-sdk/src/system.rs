//! PrinterSystem - Main entry point for the SDK
//!
//! Wraps the connection manager for dashboards: connect/disconnect, scripted
//! commands, the latest status view and two booleans (`connected`, `ready`)
//! sampled on a fixed interval.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use printer_state::StatusView;
use printer_stream::{
    ConnectionConfig, ConnectionManager, ConnectionState, Connector, DeviceInfo, WebSocketConnector,
};

use crate::SdkError;

/// Connection booleans as seen by the dashboard
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionFlags {
    /// A transport is open
    pub connected: bool,
    /// The device is ready and status updates are flowing
    pub ready: bool,
}

/// Main system entry point
///
/// # Example
///
/// ```rust,no_run
/// use printer_sdk::PrinterSystem;
///
/// #[tokio::main]
/// async fn main() -> Result<(), printer_sdk::SdkError> {
///     let system = PrinterSystem::from_env()?;
///     system.connect().await?;
///
///     let mut status = system.watch_status();
///     while status.changed().await.is_ok() {
///         let view = status.borrow().clone();
///         println!("{} {:.0}%", view.state, view.progress * 100.0);
///     }
///     Ok(())
/// }
/// ```
pub struct PrinterSystem {
    manager: Arc<ConnectionManager>,
    flags_tx: Arc<watch::Sender<ConnectionFlags>>,
    sample_interval: Duration,
    sampler: Mutex<Option<JoinHandle<()>>>,
}

impl PrinterSystem {
    /// Create a builder
    pub fn builder() -> PrinterSystemBuilder {
        PrinterSystemBuilder::default()
    }

    /// Create a system for a known printer endpoint
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self, SdkError> {
        Self::builder()
            .with_config(ConnectionConfig::for_printer(host, port))
            .build()
    }

    /// Create a system from `PRINTER_HOST`, `PRINTER_PORT` and `PRINTER_SECURE`
    pub fn from_env() -> Result<Self, SdkError> {
        Self::builder()
            .with_config(ConnectionConfig::from_env()?)
            .build()
    }

    /// Connect to the printer
    ///
    /// Waits for the first handshake outcome. A missing host or port fails
    /// here; an unreachable printer does not, it shows up as
    /// `connected() == false` while reconnects run in the background.
    pub async fn connect(&self) -> Result<ConnectionState, SdkError> {
        let state = self.manager.connect().await?;
        self.start_sampler();
        self.sample_now();
        Ok(state)
    }

    /// Disconnect, cancel pending calls and clear the status
    pub async fn disconnect(&self) -> Result<(), SdkError> {
        let result = self.manager.disconnect().await;
        self.sample_now();
        Ok(result?)
    }

    /// Run a scripted command without waiting for it to finish
    pub fn send_command(&self, script: &str) -> Result<(), SdkError> {
        Ok(self.manager.send_command(script)?)
    }

    /// Issue a correlated call for anything beyond scripted commands
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, SdkError> {
        Ok(self.manager.call(method, params).await?)
    }

    /// Transport open, as of the last sample
    pub fn connected(&self) -> bool {
        self.flags_tx.borrow().connected
    }

    /// Device ready, as of the last sample
    pub fn ready(&self) -> bool {
        self.flags_tx.borrow().ready
    }

    /// Subscribe to sampled connection flags
    pub fn watch_flags(&self) -> watch::Receiver<ConnectionFlags> {
        self.flags_tx.subscribe()
    }

    /// Latest status view
    pub fn status(&self) -> Arc<StatusView> {
        self.manager.status()
    }

    /// Subscribe to status view changes
    pub fn watch_status(&self) -> watch::Receiver<Arc<StatusView>> {
        self.manager.watch_status()
    }

    /// Subscribe to lifecycle transitions as they happen
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.manager.watch_state()
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.manager.state()
    }

    /// Device details from the last handshake
    pub fn device_info(&self) -> Option<DeviceInfo> {
        self.manager.device_info()
    }

    /// Provide the loaded file's declared print time, in seconds
    pub fn set_file_estimate(&self, estimate: Option<f64>) {
        self.manager.set_file_estimate(estimate);
    }

    /// Sampling interval of the connection flags
    pub fn sample_interval(&self) -> Duration {
        self.sample_interval
    }

    /// Get the connection manager for advanced usage
    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    fn sample_now(&self) {
        publish_flags(&self.manager, &self.flags_tx);
    }

    fn start_sampler(&self) {
        let Ok(mut sampler) = self.sampler.lock() else {
            return;
        };
        if sampler.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        tracing::debug!(interval = ?self.sample_interval, "Starting connection flag sampler");
        *sampler = Some(tokio::spawn(sample_flags(
            Arc::clone(&self.manager),
            Arc::clone(&self.flags_tx),
            self.sample_interval,
        )));
    }
}

impl Drop for PrinterSystem {
    fn drop(&mut self) {
        if let Ok(mut sampler) = self.sampler.lock() {
            if let Some(task) = sampler.take() {
                task.abort();
            }
        }
    }
}

impl std::fmt::Debug for PrinterSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrinterSystem")
            .field("flags", &*self.flags_tx.borrow())
            .field("sample_interval", &self.sample_interval)
            .field("manager", &self.manager)
            .finish()
    }
}

fn publish_flags(manager: &ConnectionManager, flags_tx: &watch::Sender<ConnectionFlags>) {
    let flags = ConnectionFlags {
        connected: manager.is_connected(),
        ready: manager.is_ready(),
    };
    flags_tx.send_if_modified(|current| {
        if *current == flags {
            false
        } else {
            tracing::debug!(?flags, "Connection flags changed");
            *current = flags;
            true
        }
    });
}

/// Periodically copy the manager's booleans into the flags channel
async fn sample_flags(
    manager: Arc<ConnectionManager>,
    flags_tx: Arc<watch::Sender<ConnectionFlags>>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        publish_flags(&manager, &flags_tx);
    }
}

/// Builder for [`PrinterSystem`]
pub struct PrinterSystemBuilder {
    config: ConnectionConfig,
    sample_interval: Duration,
    connector: Option<Arc<dyn Connector>>,
}

impl Default for PrinterSystemBuilder {
    fn default() -> Self {
        Self {
            config: ConnectionConfig::default(),
            sample_interval: Duration::from_secs(1),
            connector: None,
        }
    }
}

impl PrinterSystemBuilder {
    /// Set the connection configuration
    pub fn with_config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    /// Set how often the connection flags are sampled
    pub fn with_sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval;
        self
    }

    /// Use a custom transport instead of the websocket
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Build the PrinterSystem
    ///
    /// The endpoint is checked on `connect()`, not here.
    pub fn build(self) -> Result<PrinterSystem, SdkError> {
        if self.sample_interval == Duration::ZERO {
            return Err(SdkError::InvalidSampleInterval);
        }

        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(WebSocketConnector));
        let manager = ConnectionManager::with_connector(self.config, connector);
        let (flags_tx, _) = watch::channel(ConnectionFlags::default());

        Ok(PrinterSystem {
            manager: Arc::new(manager),
            flags_tx: Arc::new(flags_tx),
            sample_interval: self.sample_interval,
            sampler: Mutex::new(None),
        })
    }
}
