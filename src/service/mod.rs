//! Service layer for serial session operations.
//!
//! [`ConnectionManager`] owns the device handle, the message buffer and the
//! background reader for one session. Transports (the stdio tool surface,
//! tests) call it and branch on the returned [`ServiceError`].
//!
//! # Architecture
//!
//! ```text
//! ToolDispatcher ──> ConnectionManager ──> SerialBackend (native | mock)
//!                        │    │
//!                        │    └──> ReaderLoop ──> MessageBuffer
//!                        └──> PortCatalog ──> SessionState cache
//! ```

pub mod buffer;
pub mod framing;
pub mod reader;

pub use buffer::{MessageBuffer, TimestampedMessage};
pub use framing::{FramerStats, LineFramer};
pub use reader::{ReaderExit, ReaderLoop, ReaderShared};

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::catalog::{is_pattern, CatalogSettings, PortCatalog, PortListing};
use crate::error::{ServiceError, ServiceResult};
use crate::port::{PortAdapter, PortConfiguration, PortError, SerialBackend};
use crate::state::{SessionState, SharedSession, MAX_MESSAGE_CHARS};

/// How long `close` waits for the reader before abandoning it.
pub const CLOSE_GRACE: Duration = Duration::from_secs(2);

const READ_POLL_INTERVAL: Duration = Duration::from_millis(50);
const DEVICE_RELEASE_WAIT: Duration = Duration::from_millis(500);

// ========== Result Types ==========

/// Configuration actually in use after a successful open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpenOutcome {
    pub port: String,
    pub baud_rate: u32,
    pub buffer_length: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadStatus {
    Success,
    NoMessages,
    Timeout,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadOutcome {
    pub status: ReadStatus,
    pub messages: Vec<TimestampedMessage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseStatus {
    Closed,
    AlreadyClosed,
}

// ========== Settings ==========

#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// Line settings applied to every open; the baud rate is overridden per
    /// call.
    pub line: PortConfiguration,
    pub catalog: CatalogSettings,
    pub close_grace: Duration,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            line: PortConfiguration::default(),
            catalog: CatalogSettings::default(),
            close_grace: CLOSE_GRACE,
        }
    }
}

// ========== Connection Manager ==========

/// Handles belonging to one opened device. Each open gets fresh ones, so a
/// reader abandoned by `close` can never touch a later session.
#[derive(Debug)]
struct Connection {
    shared: ReaderShared,
    reader: Option<JoinHandle<ReaderExit>>,
}

/// Owns one serial session: open, send, read, close.
#[derive(Debug)]
pub struct ConnectionManager {
    backend: Arc<dyn SerialBackend>,
    catalog: PortCatalog,
    settings: ManagerSettings,
    session: SharedSession,
    connection: Mutex<Option<Connection>>,
    /// Write side: open/close. Read side: send/read.
    lifecycle: tokio::sync::RwLock<()>,
}

impl ConnectionManager {
    pub fn new(
        backend: Arc<dyn SerialBackend>,
        initial: SessionState,
        settings: ManagerSettings,
    ) -> Self {
        let session = initial.shared();
        let catalog = PortCatalog::new(backend.clone(), session.clone(), settings.catalog.clone());
        Self {
            backend,
            catalog,
            settings,
            session,
            connection: Mutex::new(None),
            lifecycle: tokio::sync::RwLock::new(()),
        }
    }

    /// Snapshot of the session state.
    pub fn state(&self) -> SessionState {
        self.session.read().clone()
    }

    pub fn catalog(&self) -> &PortCatalog {
        &self.catalog
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    /// List ports on the blocking pool.
    pub async fn list_ports(&self, force_refresh: bool) -> ServiceResult<PortListing> {
        let catalog = self.catalog.clone();
        run_blocking(move || catalog.list_ports(force_refresh)).await
    }

    /// Number of buffered messages, if a buffer exists.
    pub fn buffered(&self) -> Option<usize> {
        let shared = self.current()?;
        let buffer = shared.buffer.lock();
        buffer.as_ref().map(MessageBuffer::len)
    }

    /// Open `port` (a device path or glob pattern), replacing any existing
    /// session.
    pub async fn open(
        &self,
        port: &str,
        baud_rate: u32,
        buffer_length: usize,
    ) -> ServiceResult<OpenOutcome> {
        let _gate = self.lifecycle.write().await;
        self.session.write().clear_error();

        if let Err(e) = validate_open(port, baud_rate, buffer_length) {
            self.session.write().set_error(e.to_string());
            return Err(e);
        }

        let requested = port.trim().to_string();
        let target = if is_pattern(&requested) {
            let catalog = self.catalog.clone();
            let pattern = requested.clone();
            run_blocking(move || catalog.resolve(&pattern))
                .await?
                .unwrap_or(requested)
        } else {
            requested
        };

        if self.teardown().await {
            info!("Closed previous session before opening {}", target);
            self.session.write().mark_closed();
        }

        let config = self.settings.line.clone().with_baud_rate(baud_rate);
        let backend = self.backend.clone();
        let name = target.clone();
        let opened = run_blocking(move || backend.open(&name, &config)).await?;

        let adapter = match opened {
            Ok(adapter) => adapter,
            Err(e) => return Err(self.open_failed(&target, baud_rate, e).await),
        };

        let shared = ReaderShared {
            device: Arc::new(Mutex::new(Some(adapter))),
            buffer: Arc::new(Mutex::new(Some(MessageBuffer::new(buffer_length)))),
            session: self.session.clone(),
            closing: Arc::new(AtomicBool::new(false)),
        };

        // Held while the reader starts so a reader failing immediately
        // cannot be overwritten by the Connected transition.
        let mut session = self.session.write();
        let reader = ReaderLoop::new(shared.clone());
        let handle = tokio::task::spawn_blocking(move || reader.run());
        *self.connection.lock() = Some(Connection {
            shared,
            reader: Some(handle),
        });
        session.mark_connected(&target, baud_rate, buffer_length);
        drop(session);

        info!(
            "Serial port initialized: {} at {} baud, buffer length {}",
            target, baud_rate, buffer_length
        );
        Ok(OpenOutcome {
            port: target,
            baud_rate,
            buffer_length,
        })
    }

    async fn open_failed(&self, target: &str, baud_rate: u32, cause: PortError) -> ServiceError {
        let catalog = self.catalog.clone();
        let device = target.to_string();
        let present = match run_blocking(move || catalog.is_present(&device)).await {
            Ok(present) => present,
            Err(e) => {
                warn!("Could not refresh port list: {}", e);
                false
            }
        };

        let mut session = self.session.write();
        if matches!(cause, PortError::NotFound(_)) || !present {
            session.record_requested(target, baud_rate);
            session.set_error(format!("Port {} not found", target));
            ServiceError::PortNotFound(target.to_string())
        } else {
            let message = format!("Failed to open {}: {}", target, cause);
            session.set_error(message.clone());
            ServiceError::ConnectionError(message)
        }
    }

    /// Write `message` as raw bytes and flush. `timeout` bounds the write
    /// only.
    pub async fn send(&self, message: &str, timeout: Duration) -> ServiceResult<usize> {
        validate_send(message, timeout)?;

        let _gate = self.lifecycle.read().await;
        let shared = self.current().ok_or(ServiceError::NotConnected)?;
        if shared.device.lock().is_none() {
            return Err(ServiceError::NotConnected);
        }

        let device = shared.device.clone();
        let data = message.as_bytes().to_vec();
        let result = run_blocking(move || write_with_timeout(&device, &data, timeout)).await?;

        match result {
            Ok(written) => {
                debug!("Sent {} bytes: {}", written, message);
                Ok(written)
            }
            Err(PortError::NotOpen) => Err(ServiceError::NotConnected),
            Err(e) if e.is_timeout() => {
                let err = ServiceError::WriteTimeout(timeout);
                self.session.write().set_error(err.to_string());
                Err(err)
            }
            Err(e) => {
                let err = ServiceError::connection(format!("Failed to send message: {}", e));
                self.session.write().set_error(err.to_string());
                Err(err)
            }
        }
    }

    /// Drain buffered messages, optionally polling until one arrives.
    pub async fn read(&self, wait: bool, timeout: Duration) -> ServiceResult<ReadOutcome> {
        if timeout.is_zero() {
            return Err(ServiceError::invalid("Timeout must be positive"));
        }

        let _gate = self.lifecycle.read().await;
        let shared = self.current().ok_or(ServiceError::NotInitialized)?;

        let messages = drain(&shared)?;
        if !messages.is_empty() {
            return Ok(ReadOutcome {
                status: ReadStatus::Success,
                messages,
            });
        }
        if !wait {
            return Ok(ReadOutcome {
                status: ReadStatus::NoMessages,
                messages,
            });
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(ReadOutcome {
                    status: ReadStatus::Timeout,
                    messages: Vec::new(),
                });
            }
            tokio::time::sleep(READ_POLL_INTERVAL.min(deadline - now)).await;

            let messages = drain(&shared)?;
            if !messages.is_empty() {
                return Ok(ReadOutcome {
                    status: ReadStatus::Success,
                    messages,
                });
            }
        }
    }

    /// Stop the reader, release the device and reset the session.
    pub async fn close(&self) -> ServiceResult<CloseStatus> {
        let _gate = self.lifecycle.write().await;
        let was_connected = self.session.read().is_connected();

        // Also reaps a reader that already tore its own session down.
        self.teardown().await;

        if !was_connected {
            return Ok(CloseStatus::AlreadyClosed);
        }
        self.session.write().mark_closed();
        info!("Serial port closed");
        Ok(CloseStatus::Closed)
    }

    fn current(&self) -> Option<ReaderShared> {
        self.connection.lock().as_ref().map(|c| c.shared.clone())
    }

    /// Release everything owned by the current connection. Returns whether
    /// there was one.
    async fn teardown(&self) -> bool {
        let Some(mut connection) = self.connection.lock().take() else {
            return false;
        };
        connection.shared.closing.store(true, Ordering::SeqCst);

        if let Some(handle) = connection.reader.take() {
            match tokio::time::timeout(self.settings.close_grace, handle).await {
                Ok(Ok(exit)) => debug!("Reader exited: {:?}", exit),
                Ok(Err(e)) => warn!("Reader task failed: {}", e),
                Err(_) => warn!(
                    "Reader did not stop within {:?}, abandoning it",
                    self.settings.close_grace
                ),
            }
        }

        match connection.shared.device.try_lock_for(DEVICE_RELEASE_WAIT) {
            Some(mut guard) => {
                if let Some(device) = guard.take() {
                    let name = device.name().to_string();
                    if let Err(e) = device.close() {
                        warn!("Error closing {}: {}", name, e);
                    }
                }
            }
            None => warn!("Device still busy; it is released when the reader exits"),
        }
        connection.shared.buffer.lock().take();
        true
    }
}

// ========== Helpers ==========

fn validate_open(port: &str, baud_rate: u32, buffer_length: usize) -> ServiceResult<()> {
    if port.trim().is_empty() {
        return Err(ServiceError::invalid("Port name cannot be empty"));
    }
    if baud_rate == 0 {
        return Err(ServiceError::invalid("Baud rate must be positive"));
    }
    if buffer_length == 0 {
        return Err(ServiceError::invalid("Buffer length must be positive"));
    }
    Ok(())
}

fn validate_send(message: &str, timeout: Duration) -> ServiceResult<()> {
    if message.is_empty() {
        return Err(ServiceError::invalid("Message cannot be empty"));
    }
    if message.chars().count() > MAX_MESSAGE_CHARS {
        return Err(ServiceError::invalid(format!(
            "Message too long (max {} characters)",
            MAX_MESSAGE_CHARS
        )));
    }
    if timeout.is_zero() {
        return Err(ServiceError::invalid("Timeout must be positive"));
    }
    Ok(())
}

fn drain(shared: &ReaderShared) -> ServiceResult<Vec<TimestampedMessage>> {
    let mut buffer = shared.buffer.lock();
    buffer
        .as_mut()
        .map(MessageBuffer::drain)
        .ok_or(ServiceError::NotInitialized)
}

fn write_with_timeout(
    device: &Mutex<Option<PortAdapter>>,
    data: &[u8],
    timeout: Duration,
) -> Result<usize, PortError> {
    let mut guard = device.lock();
    let port = guard.as_mut().ok_or(PortError::NotOpen)?;

    let previous = port.timeout();
    port.set_timeout(timeout)?;
    let result = port
        .write_bytes(data)
        .and_then(|written| port.flush().map(|()| written));
    if let Err(e) = port.set_timeout(previous) {
        warn!("Failed to restore timeout on {}: {}", port.name(), e);
    }
    result
}

async fn run_blocking<T, F>(f: F) -> ServiceResult<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ServiceError::connection(format!("Background task failed: {}", e)))
}
