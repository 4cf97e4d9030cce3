//! Serial Line Agent Library
//!
//! Manages one serial session for an automated caller: opens a device,
//! buffers the newline-terminated text it sends, and exposes send/read/close
//! plus port discovery as JSON tools.
//!
//! # Modules
//!
//! - `config`: Configuration management with TOML support
//! - `state`: Session state and defaults
//! - `error`: Session-level error classification
//! - `port`: Port abstraction layer for serial communication
//! - `catalog`: Device discovery with caching
//! - `service`: Connection manager, background reader and message buffer
//! - `tools`: JSON tool surface
//! - `stdio`: Line-delimited JSON transport
//! - `logging`: Tracing subscriber setup

pub mod catalog;
pub mod config;
pub mod error;
pub mod logging;
pub mod port;
pub mod service;
pub mod state;
pub mod stdio;
pub mod tools;

// Re-export commonly used types for convenience
pub use catalog::{CatalogSettings, ListingStatus, PortCatalog, PortListing};
pub use error::{ServiceError, ServiceResult};
pub use port::{
    DataBits, FlowControl, MockBackend, MockSerialPort, NativeBackend, Parity, PortConfiguration,
    PortError, PortInfo, SerialBackend, SerialPortAdapter, StopBits, SyncSerialPort,
};
pub use service::{
    CloseStatus, ConnectionManager, ManagerSettings, MessageBuffer, OpenOutcome, ReadOutcome,
    ReadStatus, TimestampedMessage,
};
pub use state::{ConnectionMode, SessionState, SharedSession};
pub use tools::ToolDispatcher;

// Re-export config types
pub use config::{Config, ConfigError, ConfigLoader, ConfigResult};
