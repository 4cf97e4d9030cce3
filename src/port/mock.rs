//! Mock serial port and backend implementations for testing.
//!
//! `MockSerialPort` simulates a device: bytes queued with
//! [`MockSerialPort::enqueue_read`] become visible to the reader, writes are
//! logged, and failures can be injected. `MockBackend` simulates the host's
//! device list so discovery and open failures can be exercised without
//! hardware. Clones share state, so a test can keep a handle to a port after
//! handing it to the connection manager.

use super::backend::{PortInfo, SerialBackend};
use super::error::PortError;
use super::traits::{PortAdapter, PortConfiguration, SerialPortAdapter};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// Inner state of the mock port.
#[derive(Debug, Default)]
struct MockPortState {
    /// Queue of bytes to be returned by read operations.
    read_queue: VecDeque<u8>,
    /// Log of all bytes written to the port.
    write_log: Vec<Vec<u8>>,
    /// Expected write operations (for verification).
    expected_writes: VecDeque<Vec<u8>>,
    /// Whether the next write should time out.
    should_timeout: bool,
    /// Whether the next write should fail with an I/O error.
    fail_next_write: bool,
    /// Number of upcoming read-side calls that fail.
    read_failures: u32,
    /// Every read-side call fails while set.
    disconnected: bool,
    /// Whether `close` should report an error.
    fail_close: bool,
    /// Configured timeout duration.
    timeout: Duration,
    /// Set once the handle has been closed.
    closed: bool,
    /// `bytes_to_read` blocks while set, like a driver stuck in a syscall.
    stalled: bool,
    /// Number of flushes performed.
    flushes: usize,
}

/// Mock serial port implementation for testing.
///
/// # Example
/// ```
/// use serial_line_agent::port::{MockSerialPort, SerialPortAdapter};
///
/// let mut port = MockSerialPort::new("MOCK0");
///
/// port.enqueue_read(b"Hello, World!");
/// assert_eq!(port.bytes_to_read().unwrap(), 13);
///
/// let mut buffer = [0u8; 13];
/// let n = port.read_bytes(&mut buffer).unwrap();
/// assert_eq!(&buffer[..n], b"Hello, World!");
///
/// port.write_bytes(b"Response").unwrap();
/// assert_eq!(port.get_write_log(), vec![b"Response".to_vec()]);
/// ```
#[derive(Clone)]
pub struct MockSerialPort {
    name: String,
    state: Arc<Mutex<MockPortState>>,
}

impl MockSerialPort {
    /// Create a new mock serial port with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(MockPortState {
                timeout: Duration::from_millis(100),
                ..Default::default()
            })),
        }
    }

    /// Enqueue bytes to be returned by subsequent read operations.
    pub fn enqueue_read(&self, data: &[u8]) {
        self.state.lock().read_queue.extend(data);
    }

    /// Expect a specific write operation.
    ///
    /// Use `verify_expectations()` to check that all expected writes occurred.
    pub fn expect_write(&self, data: &[u8]) {
        self.state.lock().expected_writes.push_back(data.to_vec());
    }

    /// Verify that all expected writes have occurred in order.
    pub fn verify_expectations(&self) -> Result<(), String> {
        let state = self.state.lock();
        if !state.expected_writes.is_empty() {
            return Err(format!(
                "Expected {} more write(s), but none occurred",
                state.expected_writes.len()
            ));
        }
        Ok(())
    }

    /// Get a copy of all data written to the port.
    pub fn get_write_log(&self) -> Vec<Vec<u8>> {
        self.state.lock().write_log.clone()
    }

    /// Make the next write time out.
    pub fn set_should_timeout(&self, should_timeout: bool) {
        self.state.lock().should_timeout = should_timeout;
    }

    /// Make the next write fail with a broken-pipe I/O error.
    pub fn fail_next_write(&self) {
        self.state.lock().fail_next_write = true;
    }

    /// Make the next `count` read-side calls fail.
    pub fn fail_reads(&self, count: u32) {
        self.state.lock().read_failures = count;
    }

    /// Simulate the device disappearing: every read-side call fails.
    pub fn set_disconnected(&self, disconnected: bool) {
        self.state.lock().disconnected = disconnected;
    }

    /// Make `close` report an error.
    pub fn set_fail_close(&self, fail: bool) {
        self.state.lock().fail_close = fail;
    }

    /// Block every `bytes_to_read` call until cleared again.
    pub fn set_stalled(&self, stalled: bool) {
        self.state.lock().stalled = stalled;
    }

    /// Whether the handle has been closed.
    pub fn was_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Number of flushes performed.
    pub fn flush_count(&self) -> usize {
        self.state.lock().flushes
    }

    /// Get the number of bytes available to read.
    pub fn available_bytes(&self) -> usize {
        self.state.lock().read_queue.len()
    }

    fn read_side_failure(state: &mut MockPortState) -> Option<PortError> {
        if state.disconnected {
            return Some(PortError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "device disconnected",
            )));
        }
        if state.read_failures > 0 {
            state.read_failures -= 1;
            return Some(PortError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "simulated read failure",
            )));
        }
        None
    }
}

impl SerialPortAdapter for MockSerialPort {
    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, PortError> {
        let mut state = self.state.lock();

        if state.should_timeout {
            state.should_timeout = false;
            return Err(PortError::timeout(state.timeout));
        }
        if state.fail_next_write {
            state.fail_next_write = false;
            return Err(PortError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "simulated write failure",
            )));
        }

        state.write_log.push(data.to_vec());

        if let Some(expected) = state.expected_writes.pop_front() {
            if expected != data {
                return Err(PortError::config(format!(
                    "Expected write: {:?}, got: {:?}",
                    expected, data
                )));
            }
        }

        Ok(data.len())
    }

    fn read_bytes(&mut self, buffer: &mut [u8]) -> Result<usize, PortError> {
        let mut state = self.state.lock();
        if let Some(err) = Self::read_side_failure(&mut state) {
            return Err(err);
        }

        let mut bytes_read = 0;
        for byte in buffer.iter_mut() {
            match state.read_queue.pop_front() {
                Some(queued) => {
                    *byte = queued;
                    bytes_read += 1;
                }
                None => break,
            }
        }

        if bytes_read == 0 {
            Err(PortError::Io(std::io::Error::new(
                std::io::ErrorKind::WouldBlock,
                "No data available",
            )))
        } else {
            Ok(bytes_read)
        }
    }

    fn flush(&mut self) -> Result<(), PortError> {
        self.state.lock().flushes += 1;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Duration {
        self.state.lock().timeout
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), PortError> {
        self.state.lock().timeout = timeout;
        Ok(())
    }

    fn bytes_to_read(&self) -> Result<usize, PortError> {
        while self.state.lock().stalled {
            std::thread::sleep(Duration::from_millis(5));
        }
        let mut state = self.state.lock();
        if let Some(err) = Self::read_side_failure(&mut state) {
            return Err(err);
        }
        Ok(state.read_queue.len())
    }

    fn close(self: Box<Self>) -> Result<(), PortError> {
        let mut state = self.state.lock();
        state.closed = true;
        if state.fail_close {
            return Err(PortError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "simulated close failure",
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for MockSerialPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSerialPort")
            .field("name", &self.name)
            .field("available_bytes", &self.available_bytes())
            .finish()
    }
}

/// One simulated device on the mock host.
#[derive(Debug)]
struct MockDevice {
    info: PortInfo,
    port: MockSerialPort,
    /// Reported by `enumerate` (otherwise only visible to `scan_paths`).
    enumerated: bool,
    /// Error message returned by `open` instead of the port.
    open_failure: Option<String>,
}

#[derive(Debug, Default)]
struct MockBackendState {
    devices: BTreeMap<String, MockDevice>,
    unavailable: bool,
    enumeration_error: bool,
    enumerations: usize,
    opened: Vec<(String, PortConfiguration)>,
}

/// Simulated host device list.
///
/// # Example
/// ```
/// use serial_line_agent::port::{MockBackend, MockSerialPort, SerialBackend};
///
/// let backend = MockBackend::new();
/// backend.add_port("/dev/ttyUSB0", MockSerialPort::new("/dev/ttyUSB0"));
/// let ports = backend.enumerate().unwrap();
/// assert_eq!(ports[0].device, "/dev/ttyUSB0");
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<MockBackendState>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device reported by platform enumeration.
    pub fn add_port(&self, device: &str, port: MockSerialPort) {
        let info = PortInfo {
            device: device.to_string(),
            name: device.rsplit('/').next().unwrap_or(device).to_string(),
            description: format!("Mock device {}", device),
            hwid: "MOCK".to_string(),
        };
        self.insert(info, port, true);
    }

    /// Register a device that enumeration misses but a path scan finds.
    pub fn add_scanned_path(&self, device: &str, port: MockSerialPort) {
        self.insert(PortInfo::from_path(device), port, false);
    }

    fn insert(&self, info: PortInfo, port: MockSerialPort, enumerated: bool) {
        self.state.lock().devices.insert(
            info.device.clone(),
            MockDevice {
                info,
                port,
                enumerated,
                open_failure: None,
            },
        );
    }

    /// Remove a device, as if it had been unplugged.
    pub fn remove_port(&self, device: &str) {
        self.state.lock().devices.remove(device);
    }

    /// Make opening `device` fail even though it is listed (e.g. busy).
    pub fn fail_open(&self, device: &str, message: &str) {
        if let Some(dev) = self.state.lock().devices.get_mut(device) {
            dev.open_failure = Some(message.to_string());
        }
    }

    /// Report the whole serial capability as missing.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }

    /// Make platform enumeration fail transiently.
    pub fn set_enumeration_error(&self, failing: bool) {
        self.state.lock().enumeration_error = failing;
    }

    /// Number of platform enumerations performed.
    pub fn enumeration_count(&self) -> usize {
        self.state.lock().enumerations
    }

    /// Devices opened so far with the configuration used.
    pub fn opened(&self) -> Vec<(String, PortConfiguration)> {
        self.state.lock().opened.clone()
    }
}

impl SerialBackend for MockBackend {
    fn enumerate(&self) -> Result<Vec<PortInfo>, PortError> {
        let mut state = self.state.lock();
        if state.unavailable {
            return Err(PortError::unavailable("mock backend disabled"));
        }
        state.enumerations += 1;
        if state.enumeration_error {
            return Err(PortError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "simulated enumeration failure",
            )));
        }
        Ok(state
            .devices
            .values()
            .filter(|d| d.enumerated)
            .map(|d| d.info.clone())
            .collect())
    }

    fn scan_paths(&self, pattern: &str) -> Vec<String> {
        let Ok(pattern) = glob::Pattern::new(pattern) else {
            return Vec::new();
        };
        self.state
            .lock()
            .devices
            .keys()
            .filter(|device| pattern.matches(device))
            .cloned()
            .collect()
    }

    fn open(&self, port_name: &str, config: &PortConfiguration) -> Result<PortAdapter, PortError> {
        let mut state = self.state.lock();
        if state.unavailable {
            return Err(PortError::unavailable("mock backend disabled"));
        }
        let port = match state.devices.get(port_name) {
            None => return Err(PortError::not_found(port_name)),
            Some(dev) => match &dev.open_failure {
                Some(message) => {
                    return Err(PortError::Io(std::io::Error::new(
                        std::io::ErrorKind::PermissionDenied,
                        message.clone(),
                    )))
                }
                None => dev.port.clone(),
            },
        };
        state.opened.push((port_name.to_string(), config.clone()));
        Ok(Box::new(port))
    }
}
