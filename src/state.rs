use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::error;

use crate::port::PortInfo;

/// Shared handle to one session's state. Cloned into the reader task and the
/// port catalog; there is no process-wide instance.
pub type SharedSession = Arc<RwLock<SessionState>>;

// Default configuration constants
pub const DEFAULT_PORT_PATTERN: &str = "/dev/tty.usb*";
pub const DEFAULT_BAUD_RATE: u32 = 9600;
pub const DEFAULT_BUFFER_LENGTH: usize = 100;

/// Longest message accepted by `send` and by the line reader, in characters.
pub const MAX_MESSAGE_CHARS: usize = 1000;

/// Whether a device is currently open.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionMode {
    Connected,
    #[default]
    Disconnected,
}

impl std::fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// Current connection mode, configuration and last error of a session.
#[derive(Serialize, Debug, Clone)]
pub struct SessionState {
    pub mode: ConnectionMode,
    pub port: Option<String>,
    pub baud_rate: u32,
    pub buffer_length: usize,
    pub last_error: Option<String>,
    /// Port list from the most recent discovery.
    pub available_ports: Vec<PortInfo>,
    /// Wall-clock time of the most recent discovery.
    pub last_ports_check: Option<DateTime<Utc>>,
    #[serde(skip_serializing)]
    pub(crate) ports_checked_at: Option<Instant>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new(DEFAULT_BAUD_RATE, DEFAULT_BUFFER_LENGTH)
    }
}

impl SessionState {
    pub fn new(baud_rate: u32, buffer_length: usize) -> Self {
        Self {
            mode: ConnectionMode::Disconnected,
            port: None,
            baud_rate,
            buffer_length,
            last_error: None,
            available_ports: Vec::new(),
            last_ports_check: None,
            ports_checked_at: None,
        }
    }

    /// Wrap into a shareable handle.
    pub fn shared(self) -> SharedSession {
        Arc::new(RwLock::new(self))
    }

    pub fn is_connected(&self) -> bool {
        self.mode == ConnectionMode::Connected
    }

    /// Record an error and log it.
    pub fn set_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        error!("{}", message);
        self.last_error = Some(message);
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    /// Transition to Connected with the configuration actually in use.
    pub fn mark_connected(&mut self, port: &str, baud_rate: u32, buffer_length: usize) {
        self.mode = ConnectionMode::Connected;
        self.port = Some(port.to_string());
        self.baud_rate = baud_rate;
        self.buffer_length = buffer_length;
    }

    /// Transition to Disconnected after an explicit close.
    pub fn mark_closed(&mut self) {
        self.mode = ConnectionMode::Disconnected;
        self.port = None;
    }

    /// Stay Disconnected but remember what the caller asked for, so a later
    /// reconfiguration can start from it.
    pub fn record_requested(&mut self, port: &str, baud_rate: u32) {
        self.mode = ConnectionMode::Disconnected;
        self.port = Some(port.to_string());
        self.baud_rate = baud_rate;
    }

    /// Replace the port cache.
    pub fn update_port_cache(&mut self, ports: Vec<PortInfo>) {
        self.available_ports = ports;
        self.last_ports_check = Some(Utc::now());
        self.ports_checked_at = Some(Instant::now());
    }

    /// Age of the port cache, if a discovery ever ran.
    pub fn port_cache_age(&self) -> Option<Duration> {
        self.ports_checked_at.map(|at| at.elapsed())
    }
}
