//! Connection manager behavior against the mock backend.
//!
//! Covers the session lifecycle (open, send, read, close), line framing as
//! seen through the buffer, eviction, and failure handling.

mod common;

use common::{TestHarness, MOCK_DEVICE};
use pretty_assertions::assert_eq;
use serial_line_agent::port::{MockBackend, MockSerialPort};
use serial_line_agent::service::{
    CloseStatus, ConnectionManager, ManagerSettings, ReadOutcome, ReadStatus,
};
use serial_line_agent::state::{ConnectionMode, SessionState};
use serial_line_agent::ServiceError;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn texts(outcome: &ReadOutcome) -> Vec<&str> {
    outcome.messages.iter().map(|m| m.message.as_str()).collect()
}

// ============================================================================
// Open
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn open_records_connected_state() {
    let harness = TestHarness::new();

    let outcome = harness.manager.open(MOCK_DEVICE, 115200, 10).await.unwrap();

    let state = harness.manager.state();
    assert_eq!(outcome.port, MOCK_DEVICE);
    assert_eq!(state.mode, ConnectionMode::Connected);
    assert_eq!(state.port.as_deref(), Some(MOCK_DEVICE));
    assert_eq!(state.baud_rate, 115200);
    assert_eq!(state.buffer_length, 10);
    assert!(state.last_error.is_none());
    assert_eq!(harness.backend.opened()[0].1.baud_rate, 115200);
}

#[tokio::test(flavor = "multi_thread")]
async fn open_missing_device_is_port_not_found() {
    let harness = TestHarness::new();

    let err = harness.manager.open("/dev/ttyFAKE", 9600, 10).await.unwrap_err();

    assert_eq!(err.error_type(), "PortNotFound");
    let state = harness.manager.state();
    assert_eq!(state.mode, ConnectionMode::Disconnected);
    // Requested values are kept for a later reconfiguration.
    assert_eq!(state.port.as_deref(), Some("/dev/ttyFAKE"));
    assert_eq!(state.baud_rate, 9600);
    assert!(state.last_error.unwrap().contains("/dev/ttyFAKE"));
}

#[tokio::test(flavor = "multi_thread")]
async fn open_busy_device_is_connection_error() {
    let harness = TestHarness::new();
    harness.backend.fail_open(MOCK_DEVICE, "device busy");

    let err = harness.manager.open(MOCK_DEVICE, 9600, 10).await.unwrap_err();

    assert!(matches!(err, ServiceError::ConnectionError(ref msg) if msg.contains("device busy")));
    assert_eq!(harness.manager.state().mode, ConnectionMode::Disconnected);
    assert!(harness.manager.state().last_error.is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn open_rejects_invalid_parameters() {
    let harness = TestHarness::new();

    for (port, baud, length) in [("", 9600, 10), (MOCK_DEVICE, 0, 10), (MOCK_DEVICE, 9600, 0)] {
        let err = harness.manager.open(port, baud, length).await.unwrap_err();
        assert_eq!(err.error_type(), "InvalidParameter");
    }
    assert_eq!(harness.manager.state().mode, ConnectionMode::Disconnected);
    assert!(harness.backend.opened().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn open_clears_previous_error() {
    let harness = TestHarness::new();
    let _ = harness.manager.open("/dev/ttyFAKE", 9600, 10).await;
    assert!(harness.manager.state().last_error.is_some());

    harness.open(10).await;

    assert!(harness.manager.state().last_error.is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn open_resolves_wildcard_to_first_match() {
    let backend = MockBackend::new();
    backend.add_scanned_path("/dev/tty.usbserial-B", MockSerialPort::new("b"));
    backend.add_scanned_path("/dev/tty.usbmodem1101", MockSerialPort::new("a"));
    let manager = ConnectionManager::new(
        Arc::new(backend),
        SessionState::default(),
        ManagerSettings::default(),
    );

    let outcome = manager.open("/dev/tty.usb*", 9600, 10).await.unwrap();

    assert_eq!(outcome.port, "/dev/tty.usbmodem1101");
    assert_eq!(manager.state().port.as_deref(), Some("/dev/tty.usbmodem1101"));
}

#[tokio::test(flavor = "multi_thread")]
async fn open_unmatched_wildcard_fails_as_not_found() {
    let harness = TestHarness::new();

    let err = harness.manager.open("/dev/tty.usb*", 9600, 10).await.unwrap_err();

    assert_eq!(err, ServiceError::PortNotFound("/dev/tty.usb*".to_string()));
}

#[tokio::test(flavor = "multi_thread")]
async fn reopening_closes_previous_device() {
    let harness = TestHarness::new();
    let second = MockSerialPort::new("/dev/ttyUSB1");
    harness.backend.add_port("/dev/ttyUSB1", second.clone());
    harness.open(10).await;

    harness.manager.open("/dev/ttyUSB1", 9600, 10).await.unwrap();

    assert!(harness.port.was_closed());
    assert!(!second.was_closed());
    assert_eq!(harness.manager.state().port.as_deref(), Some("/dev/ttyUSB1"));
}

// ============================================================================
// Read
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn read_before_open_is_not_initialized() {
    let harness = TestHarness::new();

    let err = harness.manager.read(false, Duration::from_secs(1)).await.unwrap_err();

    assert_eq!(err, ServiceError::NotInitialized);
}

#[tokio::test(flavor = "multi_thread")]
async fn drain_twice_never_duplicates() {
    let harness = TestHarness::new();
    harness.port.enqueue_read(b"first\nsecond\n");
    harness.open(10).await;
    harness.wait_for_buffered(2).await;

    let first = harness.manager.read(false, Duration::from_secs(1)).await.unwrap();
    let second = harness.manager.read(false, Duration::from_secs(1)).await.unwrap();

    assert_eq!(first.status, ReadStatus::Success);
    assert_eq!(texts(&first), vec!["first", "second"]);
    assert_eq!(second.status, ReadStatus::NoMessages);
    assert!(second.messages.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn full_buffer_evicts_oldest() {
    let harness = TestHarness::new();
    harness.port.enqueue_read(b"m1\nm2\nm3\nm4\nm5\n");
    harness.open(3).await;
    harness.wait_for_drained_input().await;

    let outcome = harness.manager.read(false, Duration::from_secs(1)).await.unwrap();

    assert_eq!(texts(&outcome), vec!["m3", "m4", "m5"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn waiting_read_times_out_after_timeout() {
    let harness = TestHarness::new();
    harness.open(10).await;
    let timeout = Duration::from_millis(300);

    let started = Instant::now();
    let outcome = harness.manager.read(true, timeout).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(outcome.status, ReadStatus::Timeout);
    assert!(outcome.messages.is_empty());
    assert!(elapsed >= timeout, "returned early after {:?}", elapsed);
    assert!(elapsed < timeout + Duration::from_millis(250), "took {:?}", elapsed);
}

#[tokio::test(flavor = "multi_thread")]
async fn waiting_read_returns_when_message_arrives() {
    let harness = TestHarness::new();
    harness.open(10).await;
    let port = harness.port.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        port.enqueue_read(b"late\n");
    });

    let started = Instant::now();
    let outcome = harness.manager.read(true, Duration::from_secs(3)).await.unwrap();

    assert_eq!(outcome.status, ReadStatus::Success);
    assert_eq!(texts(&outcome), vec!["late"]);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test(flavor = "multi_thread")]
async fn read_rejects_zero_timeout() {
    let harness = TestHarness::new();
    harness.open(10).await;

    let err = harness.manager.read(true, Duration::ZERO).await.unwrap_err();

    assert_eq!(err.error_type(), "InvalidParameter");
}

// ============================================================================
// Framing through the reader
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn line_split_across_chunks_is_reassembled() {
    let harness = TestHarness::new();
    harness.open(10).await;

    harness.port.enqueue_read(b"hello\nwor");
    harness.wait_for_buffered(1).await;
    harness.port.enqueue_read(b"ld\n");
    harness.wait_for_buffered(2).await;

    let outcome = harness.manager.read(false, Duration::from_secs(1)).await.unwrap();
    assert_eq!(texts(&outcome), vec!["hello", "world"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn overlong_line_is_dropped_silently() {
    let harness = TestHarness::new();
    let mut input = vec![b'x'; 1001];
    input.extend_from_slice(b"\nok\n");
    harness.port.enqueue_read(&input);
    harness.open(10).await;
    harness.wait_for_buffered(1).await;
    harness.wait_for_drained_input().await;

    let outcome = harness.manager.read(false, Duration::from_secs(1)).await.unwrap();

    assert_eq!(texts(&outcome), vec!["ok"]);
    assert_eq!(harness.manager.state().mode, ConnectionMode::Connected);
    assert!(harness.manager.state().last_error.is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn messages_carry_utc_timestamps() {
    let harness = TestHarness::new();
    let before = chrono::Utc::now();
    harness.port.enqueue_read(b"stamp\n");
    harness.open(10).await;
    harness.wait_for_buffered(1).await;

    let outcome = harness.manager.read(false, Duration::from_secs(1)).await.unwrap();

    let stamp = outcome.messages[0].timestamp;
    assert!(stamp >= before && stamp <= chrono::Utc::now());
}

// ============================================================================
// Send
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn send_before_open_is_not_connected() {
    let harness = TestHarness::new();

    let err = harness.manager.send("AT", Duration::from_secs(1)).await.unwrap_err();

    assert_eq!(err, ServiceError::NotConnected);
}

#[tokio::test(flavor = "multi_thread")]
async fn send_length_boundary() {
    let harness = TestHarness::new();
    harness.open(10).await;

    let exact = "a".repeat(1000);
    let written = harness.manager.send(&exact, Duration::from_secs(1)).await.unwrap();
    assert_eq!(written, 1000);

    let err = harness
        .manager
        .send(&"a".repeat(1001), Duration::from_secs(1))
        .await
        .unwrap_err();
    assert_eq!(err.error_type(), "InvalidParameter");
    assert_eq!(harness.port.get_write_log().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn send_writes_raw_bytes() {
    let harness = TestHarness::new();
    harness.open(10).await;
    harness.port.expect_write(b"AT+GMR\r\n");

    harness.manager.send("AT+GMR\r\n", Duration::from_secs(1)).await.unwrap();

    harness.port.verify_expectations().unwrap();
    assert_eq!(harness.port.flush_count(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn write_timeout_keeps_connection_open() {
    let harness = TestHarness::new();
    harness.open(10).await;
    harness.port.set_should_timeout(true);

    let err = harness
        .manager
        .send("slow", Duration::from_millis(200))
        .await
        .unwrap_err();

    assert_eq!(err, ServiceError::WriteTimeout(Duration::from_millis(200)));
    assert_eq!(harness.manager.state().mode, ConnectionMode::Connected);
    assert!(harness.manager.send("again", Duration::from_secs(1)).await.is_ok());
}

#[tokio::test(flavor = "multi_thread")]
async fn write_failure_is_connection_error_without_disconnect() {
    let harness = TestHarness::new();
    harness.open(10).await;
    harness.port.fail_next_write();

    let err = harness.manager.send("x", Duration::from_secs(1)).await.unwrap_err();

    assert_eq!(err.error_type(), "ConnectionError");
    assert_eq!(harness.manager.state().mode, ConnectionMode::Connected);
}

// ============================================================================
// Close and failure
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn close_twice_reports_already_closed() {
    let harness = TestHarness::new();
    harness.open(10).await;

    assert_eq!(harness.manager.close().await.unwrap(), CloseStatus::Closed);
    assert_eq!(harness.manager.close().await.unwrap(), CloseStatus::AlreadyClosed);

    let state = harness.manager.state();
    assert_eq!(state.mode, ConnectionMode::Disconnected);
    assert!(state.port.is_none());
    assert!(harness.port.was_closed());
}

#[tokio::test(flavor = "multi_thread")]
async fn close_discards_buffer() {
    let harness = TestHarness::new();
    harness.port.enqueue_read(b"pending\n");
    harness.open(10).await;
    harness.wait_for_buffered(1).await;

    harness.manager.close().await.unwrap();

    let err = harness.manager.read(false, Duration::from_secs(1)).await.unwrap_err();
    assert_eq!(err, ServiceError::NotInitialized);
}

#[tokio::test(flavor = "multi_thread")]
async fn close_device_error_is_not_fatal() {
    let harness = TestHarness::new();
    harness.open(10).await;
    harness.port.set_fail_close(true);

    assert_eq!(harness.manager.close().await.unwrap(), CloseStatus::Closed);
    assert_eq!(harness.manager.state().mode, ConnectionMode::Disconnected);
}

#[tokio::test(flavor = "multi_thread")]
async fn close_waits_for_in_flight_read() {
    let harness = TestHarness::new();
    harness.open(10).await;
    let manager = harness.manager.clone();
    let reader = tokio::spawn(async move { manager.read(true, Duration::from_millis(400)).await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let status = harness.manager.close().await.unwrap();
    let read = reader.await.unwrap().unwrap();

    assert_eq!(status, CloseStatus::Closed);
    assert_eq!(read.status, ReadStatus::Timeout);
}

#[tokio::test(flavor = "multi_thread")]
async fn close_abandons_stuck_reader_after_grace() {
    let grace = Duration::from_millis(200);
    let harness = TestHarness::with_settings(ManagerSettings {
        close_grace: grace,
        ..ManagerSettings::default()
    });
    harness.open(10).await;
    harness.port.set_stalled(true);
    // Let the reader enter the stalled call while holding the device.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = Instant::now();
    let status = harness.manager.close().await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(status, CloseStatus::Closed);
    assert!(elapsed >= grace, "closed before the grace period: {:?}", elapsed);
    assert!(
        elapsed < grace + Duration::from_millis(500) + Duration::from_millis(300),
        "close blocked for {:?}",
        elapsed
    );
    let state = harness.manager.state();
    assert_eq!(state.mode, ConnectionMode::Disconnected);
    assert!(state.port.is_none());
    assert!(!harness.port.was_closed(), "device is still held by the reader");

    // The abandoned reader cannot touch the next session.
    harness.port.set_stalled(false);
    // Give the old reader its last iteration before sharing the mock queue.
    tokio::time::sleep(Duration::from_millis(100)).await;
    harness.port.enqueue_read(b"fresh\n");
    harness.open(10).await;
    harness.wait_for_buffered(1).await;
    let outcome = harness.manager.read(false, Duration::from_secs(1)).await.unwrap();
    assert_eq!(texts(&outcome), vec!["fresh"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn repeated_read_errors_force_disconnect() {
    let harness = TestHarness::new();
    harness.open(10).await;

    harness.port.set_disconnected(true);
    let deadline = Instant::now() + Duration::from_secs(3);
    while harness.manager.state().mode == ConnectionMode::Connected {
        assert!(Instant::now() < deadline, "reader never gave up");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let state = harness.manager.state();
    assert!(state
        .last_error
        .as_deref()
        .unwrap()
        .contains("Too many consecutive errors"));
    assert!(harness.port.was_closed());
    assert_eq!(
        harness.manager.read(false, Duration::from_secs(1)).await.unwrap_err(),
        ServiceError::NotInitialized
    );
    assert_eq!(
        harness.manager.send("x", Duration::from_secs(1)).await.unwrap_err(),
        ServiceError::NotConnected
    );
    assert_eq!(harness.manager.close().await.unwrap(), CloseStatus::AlreadyClosed);
}

#[tokio::test(flavor = "multi_thread")]
async fn session_can_reopen_after_reader_failure() {
    let harness = TestHarness::new();
    harness.open(10).await;
    harness.port.set_disconnected(true);
    let deadline = Instant::now() + Duration::from_secs(3);
    while harness.manager.state().is_connected() {
        assert!(Instant::now() < deadline);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    harness.port.set_disconnected(false);
    harness.port.enqueue_read(b"back\n");
    harness.open(10).await;
    harness.wait_for_buffered(1).await;

    let outcome = harness.manager.read(false, Duration::from_secs(1)).await.unwrap();
    assert_eq!(texts(&outcome), vec!["back"]);
}
