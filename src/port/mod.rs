//! Port abstraction layer for serial communication.
//!
//! Provides the device-handle trait, the backend trait used for enumeration
//! and opening, their `serialport`-based implementations, and mocks for
//! testing without hardware.

pub mod backend;
pub mod error;
pub mod mock;
pub mod sync_port;
pub mod traits;

pub use backend::{NativeBackend, PortInfo, SerialBackend};
pub use error::PortError;
pub use mock::{MockBackend, MockSerialPort};
pub use sync_port::SyncSerialPort;
pub use traits::*;
