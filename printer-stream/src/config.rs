//! Configuration types for the printer-stream crate
//!
//! This module defines the structures that control how the connection
//! manager reaches the printer daemon, how long calls may stall and how
//! aggressively lost connections are retried.

use std::time::Duration;

use url::Url;

use crate::error::ConfigError;
use crate::subscription::SubscriptionSet;

/// Websocket scheme, mirroring whether the dashboard itself is served securely
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Scheme {
    /// `ws://`
    #[default]
    Ws,
    /// `wss://`
    Wss,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Ws => "ws",
            Scheme::Wss => "wss",
        }
    }
}

/// Reconnection schedule
///
/// The delay before reconnect attempt `n` (zero based) is
/// `min(base_delay * 2^n, max_delay)`. The first connection attempt counts
/// against `max_attempts`, so at most `max_attempts - 1` reconnects are
/// scheduled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect
    /// Default: 1 second
    pub base_delay: Duration,

    /// Upper bound for any delay
    /// Default: 30 seconds
    pub max_delay: Duration,

    /// Consecutive failed attempts, the first connection included, before
    /// giving up
    /// Default: 10
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 10,
        }
    }
}

/// Configuration for the ConnectionManager
///
/// Host and port have no defaults; [`ConnectionConfig::validate`] reports
/// their absence as a distinct error instead of silently staying offline.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Printer host name or address
    pub host: Option<String>,

    /// Daemon port
    pub port: Option<u16>,

    /// Websocket scheme
    /// Default: ws
    pub scheme: Scheme,

    /// Websocket path on the daemon
    /// Default: "/websocket"
    pub path: String,

    /// Deadline for a single correlated call
    /// Default: 10 seconds
    pub call_timeout: Duration,

    /// Deadline for opening the transport, upgrade included
    /// Default: 10 seconds
    pub open_timeout: Duration,

    /// Reconnection schedule
    pub reconnect: ReconnectPolicy,

    /// Name reported during identification
    pub client_name: String,

    /// Version reported during identification
    pub client_version: String,

    /// Categories registered during subscription
    pub subscription: SubscriptionSet,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
            scheme: Scheme::Ws,
            path: "/websocket".to_string(),
            call_timeout: Duration::from_secs(10),
            open_timeout: Duration::from_secs(10),
            reconnect: ReconnectPolicy::default(),
            client_name: "printer-sdk".to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            subscription: SubscriptionSet::default(),
        }
    }
}

impl ConnectionConfig {
    /// Create a new ConnectionConfig with default values and no endpoint
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a ConnectionConfig for a known host and port
    pub fn for_printer(host: impl Into<String>, port: u16) -> Self {
        Self::default().with_host(host).with_port(port)
    }

    /// Read the endpoint from the environment
    ///
    /// - `PRINTER_HOST`: host name or address
    /// - `PRINTER_PORT`: daemon port
    /// - `PRINTER_SECURE`: "1", "true" or "yes" selects `wss`
    ///
    /// Unset variables stay unset so that [`validate`](Self::validate)
    /// reports them. A port that does not parse is an error here.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("PRINTER_HOST") {
            config.host = Some(host);
        }

        if let Ok(port) = std::env::var("PRINTER_PORT") {
            let port = port
                .trim()
                .parse::<u16>()
                .map_err(|e| ConfigError::Invalid(format!("PRINTER_PORT={port}: {e}")))?;
            config.port = Some(port);
        }

        if let Ok(secure) = std::env::var("PRINTER_SECURE") {
            config.scheme = parse_scheme_flag(&secure);
        }

        Ok(config)
    }

    /// Validate the configuration and return any issues
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.host.as_deref().map(str::trim) {
            None | Some("") => return Err(ConfigError::MissingHost),
            Some(_) => {}
        }

        match self.port {
            None => return Err(ConfigError::MissingPort),
            Some(0) => {
                return Err(ConfigError::Invalid(
                    "Port must be greater than 0".to_string(),
                ))
            }
            Some(_) => {}
        }

        if !self.path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "Path must start with '/': {}",
                self.path
            )));
        }

        if self.call_timeout == Duration::ZERO {
            return Err(ConfigError::Invalid(
                "Call timeout must be greater than 0".to_string(),
            ));
        }

        if self.open_timeout == Duration::ZERO {
            return Err(ConfigError::Invalid(
                "Open timeout must be greater than 0".to_string(),
            ));
        }

        if self.reconnect.base_delay == Duration::ZERO {
            return Err(ConfigError::Invalid(
                "Reconnect base delay must be greater than 0".to_string(),
            ));
        }

        if self.reconnect.base_delay > self.reconnect.max_delay {
            return Err(ConfigError::Invalid(
                "Reconnect base delay must not exceed max delay".to_string(),
            ));
        }

        if self.subscription.is_empty() {
            return Err(ConfigError::Invalid(
                "Subscription set must name at least one category".to_string(),
            ));
        }

        Ok(())
    }

    /// Validate and build the websocket endpoint URL
    pub fn endpoint(&self) -> Result<Url, ConfigError> {
        self.validate()?;

        let host = self.host.as_deref().map(str::trim).unwrap_or_default();
        let port = self.port.unwrap_or_default();
        let host = if host.contains(':') && !host.starts_with('[') {
            format!("[{host}]")
        } else {
            host.to_string()
        };

        let raw = format!("{}://{}:{}{}", self.scheme.as_str(), host, port, self.path);
        Url::parse(&raw).map_err(|e| ConfigError::Invalid(format!("{raw}: {e}")))
    }

    /// Builder pattern methods for fluent configuration

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_scheme(mut self, scheme: Scheme) -> Self {
        self.scheme = scheme;
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    pub fn with_reconnect(mut self, base: Duration, max: Duration, max_attempts: u32) -> Self {
        self.reconnect = ReconnectPolicy {
            base_delay: base,
            max_delay: max,
            max_attempts,
        };
        self
    }

    pub fn with_client(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.client_name = name.into();
        self.client_version = version.into();
        self
    }

    pub fn with_subscription(mut self, subscription: SubscriptionSet) -> Self {
        self.subscription = subscription;
        self
    }
}

fn parse_scheme_flag(value: &str) -> Scheme {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "wss" | "https" => Scheme::Wss,
        _ => Scheme::Ws,
    }
}
