//! In-memory device link for exercising the transport without hardware.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::{self, ErrorKind};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::channel::{ByteChannel, ChannelOpener};
use crate::discovery::{DEVICE_PID, DEVICE_VID, PortCandidate, PortLister};

pub const MOCK_PORT: &str = "/dev/mock0";

type Responder = Box<dyn FnMut(&[u8]) -> Vec<u8> + Send>;

#[derive(Default)]
struct LinkState {
    inbound: VecDeque<u8>,
    outbound: Vec<u8>,
    baud: u32,
    read_timeout: Duration,
    open_attempts: usize,
    fail_opens: bool,
    fail_baud: bool,
    fail_reads: bool,
    responder: Option<Responder>,
}

/// Shared state behind every handle the mock hands out. Acts as opener,
/// lister, and (through its channels) the device.
#[derive(Clone, Default)]
pub struct MockLink {
    state: Arc<Mutex<LinkState>>,
}

impl MockLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_inbound(&self, bytes: &[u8]) {
        self.state.lock().inbound.extend(bytes.iter().copied());
    }

    /// Everything written so far.
    pub fn written(&self) -> Vec<u8> {
        self.state.lock().outbound.clone()
    }

    pub fn written_text(&self) -> String {
        String::from_utf8_lossy(&self.written()).into_owned()
    }

    pub fn baud(&self) -> u32 {
        self.state.lock().baud
    }

    pub fn open_attempts(&self) -> usize {
        self.state.lock().open_attempts
    }

    pub fn set_fail_opens(&self, fail: bool) {
        self.state.lock().fail_opens = fail;
    }

    pub fn set_fail_baud(&self, fail: bool) {
        self.state.lock().fail_baud = fail;
    }

    /// Reads error until the next successful open.
    pub fn set_fail_reads(&self, fail: bool) {
        self.state.lock().fail_reads = fail;
    }

    /// Called with every write; whatever it returns is queued for reading.
    pub fn set_responder(&self, f: impl FnMut(&[u8]) -> Vec<u8> + Send + 'static) {
        self.state.lock().responder = Some(Box::new(f));
    }
}

impl ChannelOpener for MockLink {
    fn open(&self, port: &str, baud: u32) -> io::Result<Box<dyn ByteChannel>> {
        let mut st = self.state.lock();
        st.open_attempts += 1;
        if st.fail_opens {
            return Err(io::Error::new(ErrorKind::NotFound, format!("{port} vanished")));
        }
        st.baud = baud;
        st.fail_reads = false;
        Ok(Box::new(MockChannel {
            state: self.state.clone(),
            open: true,
        }))
    }
}

impl PortLister for MockLink {
    fn list(&self) -> io::Result<Vec<PortCandidate>> {
        Ok(vec![PortCandidate {
            name: MOCK_PORT.to_string(),
            vid: Some(DEVICE_VID),
            pid: Some(DEVICE_PID),
            product: Some("USB Single Serial".to_string()),
        }])
    }
}

struct MockChannel {
    state: Arc<Mutex<LinkState>>,
    open: bool,
}

impl ByteChannel for MockChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.open {
            return Err(io::Error::new(ErrorKind::NotConnected, "closed"));
        }
        let wait = {
            let mut st = self.state.lock();
            if st.fail_reads {
                return Err(io::Error::new(ErrorKind::BrokenPipe, "device unplugged"));
            }
            if !st.inbound.is_empty() {
                let n = buf.len().min(st.inbound.len());
                for (slot, b) in buf.iter_mut().zip(st.inbound.drain(..n)) {
                    *slot = b;
                }
                return Ok(n);
            }
            st.read_timeout.max(Duration::from_millis(1))
        };
        thread::sleep(wait);
        Ok(0)
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        if !self.open {
            return Err(io::Error::new(ErrorKind::NotConnected, "closed"));
        }
        let mut st = self.state.lock();
        st.outbound.extend_from_slice(bytes);
        if let Some(mut responder) = st.responder.take() {
            let reply = responder(bytes);
            st.inbound.extend(reply);
            st.responder = Some(responder);
        }
        Ok(())
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.state.lock().read_timeout = timeout;
        Ok(())
    }

    fn set_baud_rate(&mut self, baud: u32) -> io::Result<()> {
        let mut st = self.state.lock();
        if st.fail_baud {
            return Err(io::Error::other("baud change rejected"));
        }
        st.baud = baud;
        Ok(())
    }

    fn try_clone(&self) -> io::Result<Box<dyn ByteChannel>> {
        Ok(Box::new(MockChannel {
            state: self.state.clone(),
            open: self.open,
        }))
    }

    fn close(&mut self) {
        self.open = false;
    }
}

/// Polls `cond` until it holds or `limit` passes.
pub fn wait_until(limit: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}
