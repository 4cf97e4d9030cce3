//! Background task that drains the device into the message buffer.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::buffer::{MessageBuffer, TimestampedMessage};
use super::framing::LineFramer;
use crate::port::{PortAdapter, PortError};
use crate::state::SharedSession;

/// Consecutive device errors after which the session is torn down.
pub const MAX_CONSECUTIVE_ERRORS: u32 = 5;

const IDLE_SLEEP: Duration = Duration::from_millis(10);
const ERROR_SLEEP: Duration = Duration::from_millis(100);
const READ_CHUNK: usize = 4096;

/// Handles shared between the connection manager and its reader.
#[derive(Clone, Debug)]
pub struct ReaderShared {
    pub device: Arc<Mutex<Option<PortAdapter>>>,
    pub buffer: Arc<Mutex<Option<MessageBuffer>>>,
    pub session: SharedSession,
    pub closing: Arc<AtomicBool>,
}

/// Why the loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderExit {
    /// The closing flag was raised.
    Stopped,
    /// The device disappeared underneath the loop.
    DeviceGone,
    /// Too many consecutive device errors; the session was torn down.
    Failed,
}

enum Poll {
    Idle,
    Data(Vec<u8>),
    Gone,
}

/// Blocking read loop. Run it on the blocking pool.
pub struct ReaderLoop {
    shared: ReaderShared,
    framer: LineFramer,
    consecutive_errors: u32,
}

impl ReaderLoop {
    pub fn new(shared: ReaderShared) -> Self {
        Self {
            shared,
            framer: LineFramer::default(),
            consecutive_errors: 0,
        }
    }

    pub fn run(mut self) -> ReaderExit {
        info!("Started background reader");
        let exit = loop {
            if self.shared.closing.load(Ordering::SeqCst) {
                break ReaderExit::Stopped;
            }

            match self.poll_device() {
                Ok(Poll::Idle) => {
                    self.consecutive_errors = 0;
                    std::thread::sleep(IDLE_SLEEP);
                }
                Ok(Poll::Data(bytes)) => {
                    self.consecutive_errors = 0;
                    self.deliver(&bytes);
                }
                Ok(Poll::Gone) => break ReaderExit::DeviceGone,
                Err(e) => {
                    if self.shared.closing.load(Ordering::SeqCst) {
                        break ReaderExit::Stopped;
                    }
                    self.consecutive_errors += 1;
                    warn!(
                        "Error in receive loop ({}/{}): {}",
                        self.consecutive_errors, MAX_CONSECUTIVE_ERRORS, e
                    );
                    if self.consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                        self.tear_down(&e);
                        break ReaderExit::Failed;
                    }
                    std::thread::sleep(ERROR_SLEEP);
                }
            }
        };
        info!("Background reader stopped: {:?}", exit);
        exit
    }

    fn poll_device(&mut self) -> Result<Poll, PortError> {
        let mut guard = self.shared.device.lock();
        let Some(device) = guard.as_mut() else {
            return Ok(Poll::Gone);
        };

        let waiting = device.bytes_to_read()?;
        if waiting == 0 {
            return Ok(Poll::Idle);
        }

        let mut chunk = vec![0u8; waiting.min(READ_CHUNK)];
        match device.read_bytes(&mut chunk) {
            Ok(n) => {
                chunk.truncate(n);
                Ok(Poll::Data(chunk))
            }
            Err(PortError::Io(e))
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                Ok(Poll::Idle)
            }
            Err(e) => Err(e),
        }
    }

    fn deliver(&mut self, bytes: &[u8]) {
        let lines = self.framer.push(bytes);
        if lines.is_empty() {
            return;
        }

        let mut buffer = self.shared.buffer.lock();
        let Some(buffer) = buffer.as_mut() else {
            debug!("Buffer gone, dropping {} received lines", lines.len());
            return;
        };
        for line in lines {
            debug!("Received: {}", line);
            buffer.push(TimestampedMessage::now(line));
        }
    }

    fn tear_down(&self, cause: &PortError) {
        if let Some(device) = self.shared.device.lock().take() {
            if let Err(e) = device.close() {
                warn!("Error closing failed device: {}", e);
            }
        }
        self.shared.buffer.lock().take();

        let mut session = self.shared.session.write();
        session.set_error(format!(
            "Too many consecutive errors in receive loop: {}",
            cause
        ));
        session.mark_closed();
    }
}
