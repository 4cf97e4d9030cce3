//! Tool surface over the connection manager.
//!
//! Every tool takes a JSON parameter object and returns a JSON result object.
//! Failures are reported in the result as
//! `{"success": false, "status": "error", "error_type", "error"}`; no tool
//! call ever fails at the transport level.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::catalog::{ListingStatus, PortListing};
use crate::config::SerialConfig;
use crate::error::ServiceError;
use crate::service::{ConnectionManager, ReadStatus};

/// Names accepted by [`ToolDispatcher::dispatch`].
pub const TOOL_NAMES: &[&str] = &[
    "init",
    "send",
    "read",
    "close",
    "list_ports",
    "status",
    "configure",
    "delay",
    "help",
];

// ========== Parameters ==========

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct InitParams {
    pub port: Option<String>,
    pub baudrate: Option<u32>,
    pub buffer_length: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct SendParams {
    pub message: String,
    #[serde(default = "default_timeout")]
    pub timeout: f64,
    #[serde(default)]
    pub wait_for_response: bool,
    #[serde(default = "default_response_timeout")]
    pub response_timeout: f64,
}

#[derive(Debug, Deserialize)]
pub struct ReadParams {
    #[serde(default)]
    pub wait: bool,
    #[serde(default = "default_timeout")]
    pub timeout: f64,
}

impl Default for ReadParams {
    fn default() -> Self {
        Self {
            wait: false,
            timeout: default_timeout(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ListPortsParams {
    pub force_refresh: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ConfigureParams {
    pub port: Option<String>,
    pub baudrate: Option<u32>,
    pub list_ports: bool,
}

#[derive(Debug, Deserialize)]
pub struct DelayParams {
    pub delay: f64,
}

fn default_timeout() -> f64 {
    1.0
}

fn default_response_timeout() -> f64 {
    0.5
}

// ========== Dispatcher ==========

/// Routes tool calls to the connection manager.
#[derive(Debug, Clone)]
pub struct ToolDispatcher {
    manager: Arc<ConnectionManager>,
    serial: SerialConfig,
}

impl ToolDispatcher {
    pub fn new(manager: Arc<ConnectionManager>, serial: SerialConfig) -> Self {
        Self { manager, serial }
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Run one tool call inside a span carrying a fresh request id.
    pub async fn dispatch(&self, command: &str, params: Value) -> Value {
        let command = command.trim().to_lowercase();
        let span = info_span!("tool", command = %command, request_id = %Uuid::new_v4());
        async move {
            debug!("Tool call with params {}", params);
            match command.as_str() {
                "init" => self.init(params).await,
                "send" => self.send(params).await,
                "read" => self.read(params).await,
                "close" => self.close().await,
                "list_ports" => self.list_ports(params).await,
                "status" => self.status().await,
                "configure" => self.configure(params).await,
                "delay" => self.delay(params).await,
                "help" => help(),
                other => {
                    warn!("Unknown command '{}'", other);
                    json!({
                        "success": false,
                        "status": "error",
                        "error_type": "UnknownCommand",
                        "error": format!("Unknown command: '{}'", other),
                        "available_commands": TOOL_NAMES,
                    })
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn init(&self, params: Value) -> Value {
        let params: InitParams = match parse_params("init", params) {
            Ok(p) => p,
            Err(e) => return error_response(&e),
        };
        let port = params
            .port
            .map(|p| self.serial.resolve_port(&p))
            .unwrap_or_else(|| self.serial.default_port.clone());
        let baudrate = params.baudrate.unwrap_or(self.serial.default_baud);
        let buffer_length = params
            .buffer_length
            .unwrap_or(self.serial.default_buffer_length);

        info!("Initializing serial connection on {} at {} baud", port, baudrate);
        match self.manager.open(&port, baudrate, buffer_length).await {
            Ok(outcome) => json!({
                "success": true,
                "status": "initialized",
                "mode": self.manager.state().mode,
                "port": outcome.port,
                "baudrate": outcome.baud_rate,
                "buffer_length": outcome.buffer_length,
                "message": format!(
                    "Serial connection initialized on {} at {} baud",
                    outcome.port, outcome.baud_rate
                ),
            }),
            Err(e) => error_response(&e),
        }
    }

    async fn send(&self, params: Value) -> Value {
        let params: SendParams = match parse_params("send", params) {
            Ok(p) => p,
            Err(e) => return error_response(&e),
        };
        let timeout = match positive_seconds("timeout", params.timeout) {
            Ok(t) => t,
            Err(e) => return error_response(&e),
        };
        let response_wait = if params.wait_for_response {
            match non_negative_seconds("response_timeout", params.response_timeout) {
                Ok(t) => Some(t),
                Err(e) => return error_response(&e),
            }
        } else {
            None
        };

        let bytes_written = match self.manager.send(&params.message, timeout).await {
            Ok(n) => n,
            Err(e) => return self.with_port_hint(&e).await,
        };

        let mut response_status = "not_checked";
        let mut response_messages = Vec::new();
        if let Some(wait) = response_wait {
            tokio::time::sleep(wait).await;
            match self.manager.read(false, Duration::from_secs(1)).await {
                Ok(outcome) if outcome.status == ReadStatus::Success => {
                    response_status = "received";
                    response_messages = outcome.messages;
                }
                Ok(_) => response_status = "no_response",
                Err(e) => {
                    warn!("Error checking for response: {}", e);
                    response_status = "error";
                }
            }
        }

        json!({
            "success": true,
            "status": "success",
            "bytes_written": bytes_written,
            "response_status": response_status,
            "response_messages": response_messages,
            "message": format!("Message sent ({} bytes)", bytes_written),
        })
    }

    async fn read(&self, params: Value) -> Value {
        let params: ReadParams = match parse_params("read", params) {
            Ok(p) => p,
            Err(e) => return error_response(&e),
        };
        let timeout = match positive_seconds("timeout", params.timeout) {
            Ok(t) => t,
            Err(e) => return error_response(&e),
        };

        match self.manager.read(params.wait, timeout).await {
            Ok(outcome) => {
                let count = outcome.messages.len();
                if count > 0 {
                    info!("Read {} messages", count);
                }
                json!({
                    "success": true,
                    "status": outcome.status,
                    "messages": outcome.messages,
                    "message": format!("Read {} messages", count),
                })
            }
            Err(e) => self.with_port_hint(&e).await,
        }
    }

    async fn close(&self) -> Value {
        match self.manager.close().await {
            Ok(status) => json!({
                "success": true,
                "status": status,
                "mode": self.manager.state().mode,
                "message": "Serial connection closed",
            }),
            Err(e) => error_response(&e),
        }
    }

    async fn list_ports(&self, params: Value) -> Value {
        let params: ListPortsParams = match parse_params("list_ports", params) {
            Ok(p) => p,
            Err(e) => return error_response(&e),
        };
        match self.manager.list_ports(params.force_refresh).await {
            Ok(listing) => listing_response(&listing),
            Err(e) => error_response(&e),
        }
    }

    async fn status(&self) -> Value {
        let listing = match self.manager.list_ports(false).await {
            Ok(listing) => Some(listing),
            Err(e) => {
                warn!("Port listing failed during status: {}", e);
                None
            }
        };
        let state = self.manager.state();
        let devices: Vec<&str> = listing
            .iter()
            .flat_map(|l| l.ports.iter().map(|p| p.device.as_str()))
            .collect();
        let port_available = state
            .port
            .as_deref()
            .is_some_and(|port| devices.contains(&port));

        let mut message = format!("Serial status: {}", state.mode);
        if let Some(port) = &state.port {
            message.push_str(&format!(" on {} at {} baud", port, state.baud_rate));
        }
        if let Some(err) = &state.last_error {
            message.push_str(&format!(" (Error: {})", err));
        }

        json!({
            "success": true,
            "mode": state.mode,
            "port": state.port,
            "baudrate": state.baud_rate,
            "buffer_length": state.buffer_length,
            "buffered_messages": self.manager.buffered(),
            "last_error": state.last_error,
            "available_ports": devices,
            "port_available": port_available,
            "last_ports_check": state.last_ports_check,
            "message": message,
        })
    }

    async fn configure(&self, params: Value) -> Value {
        let params: ConfigureParams = match parse_params("configure", params) {
            Ok(p) => p,
            Err(e) => return error_response(&e),
        };
        if params.list_ports {
            return self.list_ports(json!({})).await;
        }

        let state = self.manager.state();
        if params.port.is_none() && params.baudrate.is_none() {
            return json!({
                "success": true,
                "status": "current",
                "mode": state.mode,
                "port": state.port,
                "baudrate": state.baud_rate,
                "buffer_length": state.buffer_length,
                "message": "Current serial configuration",
            });
        }

        let port = params
            .port
            .or(state.port)
            .unwrap_or_else(|| self.serial.default_port.clone());
        let baudrate = params.baudrate.unwrap_or(state.baud_rate);
        info!("Reconfiguring serial: {} at {} baud", port, baudrate);

        let result = self
            .init(json!({
                "port": port,
                "baudrate": baudrate,
                "buffer_length": state.buffer_length,
            }))
            .await;
        if result["success"] == json!(true) {
            json!({
                "success": true,
                "status": "reconfigured",
                "mode": result["mode"],
                "port": result["port"],
                "baudrate": result["baudrate"],
                "message": format!(
                    "Serial reconfigured to {} at {} baud",
                    result["port"].as_str().unwrap_or_default(),
                    baudrate
                ),
            })
        } else {
            result
        }
    }

    async fn delay(&self, params: Value) -> Value {
        let params: DelayParams = match parse_params("delay", params) {
            Ok(p) => p,
            Err(e) => return error_response(&e),
        };
        let requested = match non_negative_seconds("delay", params.delay) {
            Ok(d) => d,
            Err(e) => return error_response(&e),
        };

        let started = Instant::now();
        tokio::time::sleep(requested).await;
        let actual = started.elapsed().as_secs_f64();

        json!({
            "success": true,
            "status": "completed",
            "requested_delay": params.delay,
            "actual_delay": actual,
            "message": format!("Waited for {:.3} seconds", actual),
        })
    }

    /// Error response, plus the current device list when the failure was
    /// caused by having no session.
    async fn with_port_hint(&self, err: &ServiceError) -> Value {
        let mut response = error_response(err);
        if matches!(err, ServiceError::NotConnected | ServiceError::NotInitialized) {
            if let Ok(listing) = self.manager.list_ports(false).await {
                let devices: Vec<String> = listing.ports.into_iter().map(|p| p.device).collect();
                response["available_ports"] = json!(devices);
            }
            response["message"] =
                json!("Serial not connected. Initialize a connection first using init.");
        }
        response
    }
}

// ========== Helpers ==========

fn parse_params<T: DeserializeOwned>(tool: &str, params: Value) -> Result<T, ServiceError> {
    let params = if params.is_null() { json!({}) } else { params };
    serde_json::from_value(params)
        .map_err(|e| ServiceError::invalid(format!("Invalid parameters for {}: {}", tool, e)))
}

fn positive_seconds(name: &str, value: f64) -> Result<Duration, ServiceError> {
    if value.is_nan() || value <= 0.0 {
        return Err(ServiceError::invalid(format!("{} must be positive", name)));
    }
    Duration::try_from_secs_f64(value)
        .map_err(|e| ServiceError::invalid(format!("{} is out of range: {}", name, e)))
}

fn non_negative_seconds(name: &str, value: f64) -> Result<Duration, ServiceError> {
    if value == 0.0 {
        return Ok(Duration::ZERO);
    }
    positive_seconds(name, value)
}

/// Standard error shape.
pub fn error_response(err: &ServiceError) -> Value {
    json!({
        "success": false,
        "status": "error",
        "error_type": err.error_type(),
        "error": err.to_string(),
    })
}

fn listing_response(listing: &PortListing) -> Value {
    match listing.status {
        ListingStatus::Success => {
            let mut message = format!("Found {} serial ports", listing.ports.len());
            if listing.cached {
                message.push_str(" (cached)");
            }
            json!({
                "success": true,
                "status": listing.status,
                "ports": listing.ports,
                "cached": listing.cached,
                "message": message,
            })
        }
        ListingStatus::Error => json!({
            "success": false,
            "status": listing.status,
            "ports": listing.ports,
            "cached": listing.cached,
            "error": listing.error,
        }),
    }
}

/// Structured description of every tool.
pub fn help() -> Value {
    json!({
        "success": true,
        "status": "ok",
        "description": "Serial line agent: opens one serial device, buffers newline-terminated text received from it and lets callers send and read messages.",
        "tools": {
            "init": {
                "description": "Open a serial connection, replacing any existing one.",
                "parameters": {
                    "port": "Device path or glob pattern (default from configuration)",
                    "baudrate": "Line speed in baud (default 9600)",
                    "buffer_length": "Maximum number of buffered messages (default 100)"
                },
                "example": {"port": "/dev/ttyUSB0", "baudrate": 115200}
            },
            "send": {
                "description": "Write a message to the device.",
                "parameters": {
                    "message": "Text to send, 1 to 1000 characters, sent as-is",
                    "timeout": "Write timeout in seconds (default 1.0)",
                    "wait_for_response": "Drain received messages after sending (default false)",
                    "response_timeout": "Seconds to wait before draining (default 0.5)"
                },
                "example": {"message": "AT\r\n", "wait_for_response": true}
            },
            "read": {
                "description": "Remove and return buffered messages, oldest first.",
                "parameters": {
                    "wait": "Poll until a message arrives (default false)",
                    "timeout": "Seconds to wait when polling (default 1.0)"
                },
                "example": {"wait": true, "timeout": 2.0}
            },
            "close": {
                "description": "Close the connection. Safe to call when already closed.",
                "parameters": {}
            },
            "list_ports": {
                "description": "List serial devices. Results are cached for a few seconds.",
                "parameters": {
                    "force_refresh": "Bypass the cache (default false)"
                }
            },
            "status": {
                "description": "Connection mode, configuration, last error and available ports.",
                "parameters": {}
            },
            "configure": {
                "description": "Change port or baud rate of the running agent, or list ports.",
                "parameters": {
                    "port": "New device path or pattern",
                    "baudrate": "New baud rate",
                    "list_ports": "Only list ports (default false)"
                }
            },
            "delay": {
                "description": "Wait for a number of seconds.",
                "parameters": {
                    "delay": "Seconds to wait, non-negative"
                },
                "example": {"delay": 2.5}
            },
            "help": {
                "description": "This description.",
                "parameters": {}
            }
        },
        "notes": [
            "Received lines are trimmed; empty, non-printable or over-long (more than 1000 characters) lines are dropped.",
            "When the buffer is full the oldest message is discarded.",
            "Messages are timestamped in UTC (RFC 3339)."
        ]
    })
}
