//! Platform serial capability: device enumeration and opening.
//!
//! The session layer only talks to [`SerialBackend`]. [`NativeBackend`] is the
//! real implementation on top of `serialport` and `glob`; tests swap in
//! [`MockBackend`](super::mock::MockBackend).

use super::error::PortError;
use super::sync_port::SyncSerialPort;
use super::traits::{PortAdapter, PortConfiguration};
use serde::{Deserialize, Serialize};
use serialport::{SerialPortInfo, SerialPortType};
use std::path::Path;
use tracing::{debug, warn};

/// Snapshot of one serial device visible on the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortInfo {
    /// Unique identifier, usually the device path (`/dev/ttyUSB0`, `COM3`).
    pub device: String,
    /// Short display name.
    pub name: String,
    pub description: String,
    pub hwid: String,
}

impl PortInfo {
    /// Entry for a device known only by its path (found by a filesystem scan).
    pub fn from_path(device: impl Into<String>) -> Self {
        let device = device.into();
        Self {
            name: display_name(&device),
            description: format!("Serial port {}", device),
            hwid: "UNKNOWN".to_string(),
            device,
        }
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let (description, hwid) = match info.port_type {
            SerialPortType::UsbPort(usb) => {
                let description = usb
                    .product
                    .clone()
                    .or_else(|| usb.manufacturer.clone())
                    .unwrap_or_else(|| "USB serial device".to_string());
                let mut hwid = format!("USB VID:PID={:04X}:{:04X}", usb.vid, usb.pid);
                if let Some(serial) = usb.serial_number {
                    hwid.push_str(&format!(" SER={}", serial));
                }
                (description, hwid)
            }
            SerialPortType::PciPort => ("PCI serial port".to_string(), "PCI".to_string()),
            SerialPortType::BluetoothPort => {
                ("Bluetooth serial port".to_string(), "BLUETOOTH".to_string())
            }
            SerialPortType::Unknown => ("n/a".to_string(), "n/a".to_string()),
        };

        Self {
            name: display_name(&info.port_name),
            device: info.port_name,
            description,
            hwid,
        }
    }
}

fn display_name(device: &str) -> String {
    Path::new(device)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(device)
        .to_string()
}

/// Enumerate and open serial devices.
pub trait SerialBackend: Send + Sync + std::fmt::Debug {
    /// Devices reported by the platform serial library.
    ///
    /// `PortError::Unavailable` means there is no serial support at all; any
    /// other error is treated as a transient enumeration failure.
    fn enumerate(&self) -> Result<Vec<PortInfo>, PortError>;

    /// Device paths matching a glob pattern on the filesystem.
    fn scan_paths(&self, pattern: &str) -> Vec<String>;

    /// Open a device for exclusive use.
    fn open(&self, port_name: &str, config: &PortConfiguration) -> Result<PortAdapter, PortError>;
}

/// Backend using the host's serial devices.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeBackend;

impl NativeBackend {
    pub fn new() -> Self {
        Self
    }
}

impl SerialBackend for NativeBackend {
    fn enumerate(&self) -> Result<Vec<PortInfo>, PortError> {
        let ports = serialport::available_ports()?;
        debug!("Platform enumeration found {} ports", ports.len());
        Ok(ports.into_iter().map(PortInfo::from).collect())
    }

    fn scan_paths(&self, pattern: &str) -> Vec<String> {
        match glob::glob(pattern) {
            Ok(paths) => paths
                .filter_map(|entry| match entry {
                    Ok(path) => path.to_str().map(str::to_string),
                    Err(e) => {
                        debug!("Skipping unreadable path while scanning {}: {}", pattern, e);
                        None
                    }
                })
                .collect(),
            Err(e) => {
                warn!("Invalid device pattern '{}': {}", pattern, e);
                Vec::new()
            }
        }
    }

    fn open(&self, port_name: &str, config: &PortConfiguration) -> Result<PortAdapter, PortError> {
        let port = SyncSerialPort::open(port_name, config)?;
        Ok(Box::new(port))
    }
}
