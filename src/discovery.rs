//! Locating the device's serial port.
//!
//! The device enumerates as a CH343 bridge; ports are matched on its USB
//! vendor/product pair, with a configured fallback when nothing matches.

use serialport::{SerialPortInfo, SerialPortType};
use std::io;
use tracing::{debug, info};

use crate::error::{Error, Result};

pub const DEVICE_VID: u16 = 0x1A86;
pub const DEVICE_PID: u16 = 0x55D3;

/// A port reported by the system, with USB metadata when available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortCandidate {
    pub name: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub product: Option<String>,
}

impl PortCandidate {
    pub fn is_device(&self) -> bool {
        self.vid == Some(DEVICE_VID) && self.pid == Some(DEVICE_PID)
    }
}

impl From<SerialPortInfo> for PortCandidate {
    fn from(info: SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb) => Self {
                name: info.port_name,
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                product: usb.product,
            },
            _ => Self {
                name: info.port_name,
                vid: None,
                pid: None,
                product: None,
            },
        }
    }
}

/// Source of candidate ports.
pub trait PortLister: Send + Sync {
    fn list(&self) -> io::Result<Vec<PortCandidate>>;
}

/// Lists the host's serial ports through `serialport`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialPortLister;

impl PortLister for SerialPortLister {
    fn list(&self) -> io::Result<Vec<PortCandidate>> {
        let ports = serialport::available_ports().map_err(io::Error::from)?;
        Ok(ports.into_iter().map(PortCandidate::from).collect())
    }
}

/// Picks the port to open.
///
/// With `override_port` set the fallback is used verbatim and the lister is
/// never consulted. Otherwise the first candidate matching the device's
/// vendor/product pair wins; a listing failure or a miss falls back to
/// `fallback` when one is configured.
pub fn resolve_port(
    lister: &dyn PortLister,
    fallback: Option<&str>,
    override_port: bool,
) -> Result<String> {
    if override_port {
        return match fallback {
            Some(port) => {
                debug!(port, "port override enabled");
                Ok(port.to_string())
            }
            None => Err(Error::Connection(
                "port override enabled but no port configured".into(),
            )),
        };
    }

    let candidates = match lister.list() {
        Ok(c) => c,
        Err(e) => {
            debug!(error = %e, "port enumeration failed");
            return fallback
                .map(str::to_string)
                .ok_or_else(|| Error::Connection(format!("failed to list serial ports: {e}")));
        }
    };

    debug!(count = candidates.len(), "enumerated serial ports");
    for c in &candidates {
        debug!(port = %c.name, vid = ?c.vid, pid = ?c.pid, "candidate");
    }

    if let Some(found) = candidates.into_iter().find(PortCandidate::is_device) {
        info!(port = %found.name, "device found");
        return Ok(found.name);
    }

    match fallback {
        Some(port) => {
            info!(port, "device not found, using fallback port");
            Ok(port.to_string())
        }
        None => Err(Error::Connection("device not found".into())),
    }
}
