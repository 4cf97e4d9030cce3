//! Shared test utilities for serial line agent tests.
//!
//! This module provides common test infrastructure including:
//! - A harness wiring a mock backend to a connection manager and dispatcher
//! - Helpers for waiting on the background reader
//! - JSON assertion helpers

#![allow(dead_code)]

use serde_json::Value;
use serial_line_agent::config::SerialConfig;
use serial_line_agent::port::{MockBackend, MockSerialPort};
use serial_line_agent::service::{ConnectionManager, ManagerSettings};
use serial_line_agent::state::SessionState;
use serial_line_agent::tools::ToolDispatcher;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const MOCK_DEVICE: &str = "/dev/ttyUSB0";

/// Assert that a JSON value contains specific fields with expected values.
///
/// # Example
/// ```ignore
/// let actual = json!({"status": "initialized", "port": "/dev/ttyUSB0"});
/// let expected = json!({"status": "initialized"});
/// assert_json_contains(&actual, &expected); // Passes - actual contains all of expected
/// ```
pub fn assert_json_contains(actual: &Value, expected: &Value) {
    match (actual, expected) {
        (Value::Object(actual_map), Value::Object(expected_map)) => {
            for (key, expected_value) in expected_map {
                let actual_value = actual_map.get(key).unwrap_or_else(|| {
                    panic!("Expected key '{}' not found in actual JSON: {}", key, actual)
                });
                assert_json_contains(actual_value, expected_value);
            }
        }
        (Value::Array(actual_arr), Value::Array(expected_arr)) => {
            assert_eq!(actual_arr.len(), expected_arr.len(), "Array lengths differ");
            for (actual_item, expected_item) in actual_arr.iter().zip(expected_arr.iter()) {
                assert_json_contains(actual_item, expected_item);
            }
        }
        _ => {
            assert_eq!(
                actual, expected,
                "JSON values differ: expected {:?}, got {:?}",
                expected, actual
            );
        }
    }
}

/// Complete test environment: a simulated host with one device, a
/// connection manager over it and the tool dispatcher on top.
pub struct TestHarness {
    pub backend: MockBackend,
    pub port: MockSerialPort,
    pub manager: Arc<ConnectionManager>,
    pub tools: ToolDispatcher,
}

impl TestHarness {
    /// Harness with [`MOCK_DEVICE`] attached.
    pub fn new() -> Self {
        Self::with_device(MOCK_DEVICE)
    }

    pub fn with_device(device: &str) -> Self {
        let backend = MockBackend::new();
        let port = MockSerialPort::new(device);
        backend.add_port(device, port.clone());
        Self::from_backend(backend, port, ManagerSettings::default())
    }

    /// Harness with [`MOCK_DEVICE`] attached and custom manager settings.
    pub fn with_settings(settings: ManagerSettings) -> Self {
        let backend = MockBackend::new();
        let port = MockSerialPort::new(MOCK_DEVICE);
        backend.add_port(MOCK_DEVICE, port.clone());
        Self::from_backend(backend, port, settings)
    }

    /// Harness over a host with no devices at all.
    pub fn empty() -> Self {
        Self::from_backend(
            MockBackend::new(),
            MockSerialPort::new("UNATTACHED"),
            ManagerSettings::default(),
        )
    }

    fn from_backend(backend: MockBackend, port: MockSerialPort, settings: ManagerSettings) -> Self {
        let manager = Arc::new(ConnectionManager::new(
            Arc::new(backend.clone()),
            SessionState::default(),
            settings,
        ));
        let serial = SerialConfig {
            default_port: MOCK_DEVICE.to_string(),
            ..SerialConfig::default()
        };
        let tools = ToolDispatcher::new(manager.clone(), serial);
        Self {
            backend,
            port,
            manager,
            tools,
        }
    }

    /// Open the default device with a buffer of `buffer_length`.
    pub async fn open(&self, buffer_length: usize) {
        self.manager
            .open(MOCK_DEVICE, 9600, buffer_length)
            .await
            .expect("open mock device");
    }

    /// Wait until the reader has buffered `count` messages.
    pub async fn wait_for_buffered(&self, count: usize) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while self.manager.buffered().unwrap_or(0) < count {
            assert!(
                Instant::now() < deadline,
                "timed out waiting for {} buffered messages",
                count
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Wait until the reader has consumed everything queued on the mock.
    pub async fn wait_for_drained_input(&self) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while self.port.available_bytes() > 0 {
            assert!(Instant::now() < deadline, "reader never consumed input");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        // One more reader iteration for framing to finish.
        tokio::time::sleep(Duration::from_millis(30)).await;
    }
}
