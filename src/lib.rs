//! Host-side driver for MAKCU-style USB-serial mouse injection devices.
//!
//! The device speaks a line-oriented ASCII command language at 4 Mbaud and
//! interleaves its replies with raw button-state bytes. [`Transport`] owns
//! the link and the background reader; [`Device`] is the typed API on top.

pub mod channel;
pub mod correlator;
pub mod demux;
pub mod device;
pub mod discovery;
pub mod error;
pub mod inputs;
pub mod locks;
pub mod proto;
pub mod transport;

#[cfg(test)]
mod testing;

pub use device::{CursorPositioning, Device, DeviceInfo, NoCursor};
pub use error::{Error, ErrorKind, Result};
pub use inputs::{InputObserver, MouseButton};
pub use locks::LockTarget;
pub use transport::{
    CommandSink, ConnectionObserver, ConnectionState, ObserverId, Transport, TransportConfig,
};
