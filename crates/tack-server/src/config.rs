//! Server configuration.
//!
//! Sources, later ones winning:
//! - Built-in defaults (some read `TACK_*` environment variables)
//! - `tack.toml` from the search path
//! - `TACK__SECTION__KEY` environment overrides

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tack_core::{CascadePolicy, Dispatch, HubConfig, ServiceConfig, DEFAULT_ROOM_CAPACITY};

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub realtime: RealtimeConfig,

    #[serde(default)]
    pub notifications: NotificationsConfig,

    #[serde(default)]
    pub cascade: CascadeConfig,

    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,

    /// Maximum message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Broadcast frames queued per channel before new ones are dropped.
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
}

/// Identity verification.
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HS256 secret shared with the token issuer.
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &"<redacted>")
            .finish()
    }
}

/// Board rooms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Broadcast queue capacity per room.
    #[serde(default = "default_room_capacity")]
    pub room_capacity: usize,

    #[serde(default = "default_max_rooms")]
    pub max_rooms_per_connection: usize,

    /// Re-check board access when a channel joins a room.
    #[serde(default)]
    pub authorize_join: bool,
}

/// Notification fan-out and due reminders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    /// Seconds between due-reminder sweeps.
    #[serde(default = "default_reminder_interval")]
    pub reminder_interval_secs: u64,

    /// Cards due within this many hours get a reminder.
    #[serde(default = "default_due_window")]
    pub due_window_hours: i64,

    /// Run cascade and fan-out on spawned tasks instead of inline.
    #[serde(default = "default_true")]
    pub detached: bool,
}

/// Membership cascade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CascadeConfig {
    /// Delete a departed member's comments and activity entries.
    #[serde(default = "default_true")]
    pub purge_history: bool,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Heartbeat interval in milliseconds.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,

    /// Connection timeout in milliseconds.
    #[serde(default = "default_heartbeat_timeout")]
    pub timeout_ms: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_host() -> String {
    std::env::var("TACK_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("TACK_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

fn default_jwt_secret() -> String {
    std::env::var("TACK_JWT_SECRET").unwrap_or_default()
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_message_size() -> usize {
    64 * 1024
}

fn default_outbound_buffer() -> usize {
    256
}

fn default_room_capacity() -> usize {
    DEFAULT_ROOM_CAPACITY
}

fn default_max_rooms() -> usize {
    100
}

fn default_reminder_interval() -> u64 {
    15 * 60
}

fn default_due_window() -> i64 {
    24
}

fn default_heartbeat_interval() -> u64 {
    30_000
}

fn default_heartbeat_timeout() -> u64 {
    60_000
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            auth: AuthConfig::default(),
            realtime: RealtimeConfig::default(),
            notifications: NotificationsConfig::default(),
            cascade: CascadeConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
            max_message_size: default_max_message_size(),
            outbound_buffer: default_outbound_buffer(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
        }
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            room_capacity: default_room_capacity(),
            max_rooms_per_connection: default_max_rooms(),
            authorize_join: false,
        }
    }
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            reminder_interval_secs: default_reminder_interval(),
            due_window_hours: default_due_window(),
            detached: true,
        }
    }
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self { purge_history: true }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
            timeout_ms: default_heartbeat_timeout(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

const SEARCH_PATH: [&str; 3] = ["tack.toml", "/etc/tack/tack.toml", "~/.config/tack/tack.toml"];

impl Config {
    /// Load the first `tack.toml` on the search path, then apply
    /// `TACK__*` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or an
    /// override has the wrong type.
    pub fn load() -> Result<Self> {
        let file = SEARCH_PATH
            .iter()
            .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
            .find(|path| path.exists());

        let mut builder = config::Config::builder();
        if let Some(path) = &file {
            tracing::info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(config::File::from(path.as_path()));
        }
        let layered = builder
            .add_source(
                config::Environment::with_prefix("TACK")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to assemble configuration")?;

        let config: Self = layered
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file, without environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the runtime cannot work with.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first zero interval or buffer.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.heartbeat.interval_ms > 0, "heartbeat.interval_ms must be greater than zero");
        ensure!(self.heartbeat.timeout_ms > 0, "heartbeat.timeout_ms must be greater than zero");
        ensure!(
            self.notifications.reminder_interval_secs > 0,
            "notifications.reminder_interval_secs must be greater than zero"
        );
        ensure!(self.transport.outbound_buffer > 0, "transport.outbound_buffer must be greater than zero");
        ensure!(self.realtime.room_capacity > 0, "realtime.room_capacity must be greater than zero");
        Ok(())
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if `host:port` is not a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }

    #[must_use]
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            room_capacity: self.realtime.room_capacity,
            max_rooms_per_connection: self.realtime.max_rooms_per_connection,
        }
    }

    #[must_use]
    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            dispatch: if self.notifications.detached {
                Dispatch::Detached
            } else {
                Dispatch::Inline
            },
            cascade: CascadePolicy {
                purge_history: self.cascade.purge_history,
            },
        }
    }

    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat.interval_ms)
    }

    #[must_use]
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat.timeout_ms)
    }

    #[must_use]
    pub fn reminder_interval(&self) -> Duration {
        Duration::from_secs(self.notifications.reminder_interval_secs)
    }

    #[must_use]
    pub fn due_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.notifications.due_window_hours)
    }
}
