use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{self, ErrorKind, Read, Write};
use std::time::Duration;

/// Byte-level link to the device. Reads must return promptly: a read that
/// times out with nothing available yields `Ok(0)`, never an error.
pub trait ByteChannel: Send {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;
    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()>;
    fn set_baud_rate(&mut self, baud: u32) -> io::Result<()>;
    /// Second handle onto the same link, so reads and writes can live on
    /// different threads.
    fn try_clone(&self) -> io::Result<Box<dyn ByteChannel>>;
    fn close(&mut self);
}

/// Opens a [`ByteChannel`] on a named port at a given baud rate, 8N1.
pub trait ChannelOpener: Send + Sync {
    fn open(&self, port: &str, baud: u32) -> io::Result<Box<dyn ByteChannel>>;
}

/// [`ByteChannel`] over a `serialport` handle.
pub struct SerialChannel {
    name: String,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialChannel {
    fn port(&mut self) -> io::Result<&mut Box<dyn SerialPort>> {
        self.port
            .as_mut()
            .ok_or_else(|| io::Error::new(ErrorKind::NotConnected, format!("{} closed", self.name)))
    }
}

impl ByteChannel for SerialChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.port()?.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::Interrupted) => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        let port = self.port()?;
        port.write_all(bytes)?;
        port.flush()
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.port()?.set_timeout(timeout).map_err(io::Error::from)
    }

    fn set_baud_rate(&mut self, baud: u32) -> io::Result<()> {
        self.port()?.set_baud_rate(baud).map_err(io::Error::from)
    }

    fn try_clone(&self) -> io::Result<Box<dyn ByteChannel>> {
        let port = self
            .port
            .as_ref()
            .ok_or_else(|| io::Error::new(ErrorKind::NotConnected, format!("{} closed", self.name)))?
            .try_clone()
            .map_err(io::Error::from)?;
        Ok(Box::new(SerialChannel {
            name: self.name.clone(),
            port: Some(port),
        }))
    }

    fn close(&mut self) {
        self.port = None;
    }
}

/// Opens real serial ports.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialOpener;

impl ChannelOpener for SerialOpener {
    fn open(&self, port: &str, baud: u32) -> io::Result<Box<dyn ByteChannel>> {
        let handle = serialport::new(port, baud)
            .timeout(Duration::from_millis(100))
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open()
            .map_err(|e| io::Error::other(format!("open {port}: {e}")))?;
        Ok(Box::new(SerialChannel {
            name: port.to_string(),
            port: Some(handle),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opening_missing_port_reports_port_name() {
        let err = match SerialOpener.open("/dev/makcu-link-does-not-exist", 115_200) {
            Ok(_) => panic!("opened a port that does not exist"),
            Err(e) => e,
        };
        assert!(err.to_string().contains("/dev/makcu-link-does-not-exist"));
    }

    #[test]
    fn closed_channel_refuses_io() {
        let mut ch = SerialChannel {
            name: "COM9".into(),
            port: None,
        };
        let mut buf = [0u8; 4];
        assert_eq!(ch.read(&mut buf).unwrap_err().kind(), ErrorKind::NotConnected);
        assert_eq!(ch.write_all(b"x").unwrap_err().kind(), ErrorKind::NotConnected);
        assert!(ch.try_clone().is_err());
    }
}
