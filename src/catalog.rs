//! Serial device discovery with a short-lived cache.
//!
//! Platform enumeration and a filesystem scan of USB-serial naming patterns
//! are merged, since a vendor path may show up in one source but not the
//! other.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::port::{PortError, PortInfo, SerialBackend};
use crate::state::SharedSession;

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5);

pub fn default_usb_patterns() -> Vec<String> {
    vec![
        "/dev/tty.usb*".to_string(),
        "/dev/ttyUSB*".to_string(),
        "/dev/ttyACM*".to_string(),
    ]
}

/// Discovery tuning.
#[derive(Debug, Clone)]
pub struct CatalogSettings {
    pub cache_ttl: Duration,
    pub usb_patterns: Vec<String>,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_CACHE_TTL,
            usb_patterns: default_usb_patterns(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingStatus {
    Success,
    Error,
}

/// Result of one `list_ports` call.
#[derive(Debug, Clone, Serialize)]
pub struct PortListing {
    pub status: ListingStatus,
    pub ports: Vec<PortInfo>,
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PortListing {
    pub fn contains(&self, device: &str) -> bool {
        self.ports.iter().any(|p| p.device == device)
    }
}

/// True when `port` should be treated as a glob pattern.
pub fn is_pattern(port: &str) -> bool {
    port.contains(['*', '?', '['])
}

/// Enumerates devices and caches the result in the session state.
#[derive(Debug, Clone)]
pub struct PortCatalog {
    backend: Arc<dyn SerialBackend>,
    session: SharedSession,
    settings: CatalogSettings,
}

impl PortCatalog {
    pub fn new(
        backend: Arc<dyn SerialBackend>,
        session: SharedSession,
        settings: CatalogSettings,
    ) -> Self {
        Self {
            backend,
            session,
            settings,
        }
    }

    /// List serial devices. A non-empty cache younger than the TTL is
    /// returned as-is unless `force_refresh` is set.
    pub fn list_ports(&self, force_refresh: bool) -> PortListing {
        if !force_refresh {
            let session = self.session.read();
            let fresh = session
                .port_cache_age()
                .is_some_and(|age| age < self.settings.cache_ttl);
            if fresh && !session.available_ports.is_empty() {
                debug!("Using cached port list");
                return PortListing {
                    status: ListingStatus::Success,
                    ports: session.available_ports.clone(),
                    cached: true,
                    error: None,
                };
            }
        }

        let enumerated = match self.backend.enumerate() {
            Ok(ports) => ports,
            Err(PortError::Unavailable(reason)) => {
                warn!("Serial support unavailable: {}", reason);
                self.session.write().update_port_cache(Vec::new());
                return PortListing {
                    status: ListingStatus::Error,
                    ports: Vec::new(),
                    cached: false,
                    error: Some(format!("Serial support unavailable: {}", reason)),
                };
            }
            Err(e) => {
                warn!("Port enumeration failed, using path scan only: {}", e);
                Vec::new()
            }
        };

        let mut merged: BTreeMap<String, PortInfo> = enumerated
            .into_iter()
            .map(|port| (port.device.clone(), port))
            .collect();
        for pattern in &self.settings.usb_patterns {
            for path in self.backend.scan_paths(pattern) {
                merged
                    .entry(path.clone())
                    .or_insert_with(|| PortInfo::from_path(path));
            }
        }

        let ports: Vec<PortInfo> = merged.into_values().collect();
        info!("Found {} serial ports", ports.len());
        self.session.write().update_port_cache(ports.clone());

        PortListing {
            status: ListingStatus::Success,
            ports,
            cached: false,
            error: None,
        }
    }

    /// Whether `device` is currently present, bypassing the cache.
    pub fn is_present(&self, device: &str) -> bool {
        self.list_ports(true).contains(device)
    }

    /// First device (in sorted order) matching a glob pattern, drawn from a
    /// fresh listing plus a direct path scan.
    pub fn resolve(&self, pattern: &str) -> Option<String> {
        let matcher = match glob::Pattern::new(pattern) {
            Ok(matcher) => matcher,
            Err(e) => {
                warn!("Invalid port pattern '{}': {}", pattern, e);
                return None;
            }
        };

        let mut candidates: BTreeSet<String> = self
            .list_ports(true)
            .ports
            .into_iter()
            .map(|p| p.device)
            .filter(|device| matcher.matches(device))
            .collect();
        candidates.extend(self.backend.scan_paths(pattern));

        let resolved = candidates.into_iter().next();
        match &resolved {
            Some(device) => info!("Resolved port pattern {} to {}", pattern, device),
            None => warn!("No port matches pattern {}", pattern),
        }
        resolved
    }
}
