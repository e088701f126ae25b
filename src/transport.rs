//! Connection lifecycle and the background read loop.
//!
//! [`Transport`] owns the serial link: it resolves and opens the port,
//! performs the baud switch, runs one reader thread per connection that
//! feeds the demultiplexer, and reconnects a bounded number of times when
//! reads fail. All writes go through a single mutex around the writer half
//! of the link.

use crossbeam_channel::{Receiver, Sender, TryRecvError, unbounded};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

use crate::channel::{ByteChannel, ChannelOpener, SerialOpener};
use crate::correlator::{CommandCorrelator, DEFAULT_TIMEOUT, STALE_AFTER};
use crate::demux::{Event, StreamDemux};
use crate::discovery::{PortCandidate, PortLister, SerialPortLister, resolve_port};
use crate::error::{Error, Result};
use crate::inputs::{InputObserver, InputStateCache, MouseButton};
use crate::proto::DeviceCommand;
use crate::proto::format::{INIT_COMMAND, format_command};

pub const INITIAL_BAUD: u32 = 115_200;
pub const OPERATING_BAUD: u32 = 4_000_000;

/// Tells the device to switch its UART to [`OPERATING_BAUD`].
pub const BAUD_SWITCH_MAGIC: [u8; 9] = [0xDE, 0xAD, 0x05, 0x00, 0xA5, 0x00, 0x09, 0x3D, 0x00];

const BAUD_SETTLE: Duration = Duration::from_millis(20);
const POLL_TIMEOUT: Duration = Duration::from_millis(1);
const READ_CHUNK: usize = 4096;
const LIFECYCLE_POLL: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Port used when discovery finds nothing, or always with `override_port`.
    pub fallback_port: Option<String>,
    pub override_port: bool,
    /// Send `km.buttons(1)` after every (re)connect.
    pub send_init: bool,
    pub auto_reconnect: bool,
    pub default_timeout: Duration,
    pub stale_after: Duration,
    pub cleanup_interval: Duration,
    pub max_reconnect_attempts: u32,
    pub reconnect_delay: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            fallback_port: None,
            override_port: false,
            send_init: true,
            auto_reconnect: true,
            default_timeout: DEFAULT_TIMEOUT,
            stale_after: STALE_AFTER,
            cleanup_interval: Duration::from_millis(50),
            max_reconnect_attempts: 3,
            reconnect_delay: Duration::from_millis(100),
        }
    }
}

/// Anything that can carry a device command. Implemented by [`Transport`];
/// the lock cache and device facade only depend on this.
pub trait CommandSink {
    /// Writes `command`. With `expect_response` the call blocks for the
    /// reply, up to `timeout` (the transport default when `None` or zero).
    fn send_command(
        &self,
        command: &str,
        expect_response: bool,
        timeout: Option<Duration>,
    ) -> Result<String>;
}

/// Receives `true` when a connection is established and `false` when it
/// ends, whether by [`Transport::disconnect`] or after reconnection gave up.
/// Transient reconnects are not reported.
///
/// Called with no transport lock held, so observers may reconnect.
pub trait ConnectionObserver: Send + Sync {
    fn on_connection_changed(&self, connected: bool);
}

impl<F> ConnectionObserver for F
where
    F: Fn(bool) + Send + Sync,
{
    fn on_connection_changed(&self, connected: bool) {
        self(connected)
    }
}

/// Handle returned by [`Transport::add_connection_observer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Writer half of an open link and where it points.
pub struct PortHandle {
    writer: Box<dyn ByteChannel>,
    pub port: String,
    pub baud: u32,
}

impl PortHandle {
    fn close(mut self) {
        debug!(port = %self.port, "closing port");
        self.writer.close();
    }
}

/// Per-connection stop signal and reader thread. Dropping `stop` wakes every
/// caller blocked on a reply.
struct Session {
    stop: Sender<()>,
    stop_rx: Receiver<()>,
    reader: Option<JoinHandle<()>>,
}

impl Session {
    fn finish(self) {
        drop(self.stop);
        if let Some(handle) = self.reader {
            // The reader tears itself down on reconnect failure.
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                warn!("reader thread panicked");
            }
        }
    }
}

struct Shared {
    config: TransportConfig,
    opener: Arc<dyn ChannelOpener>,
    lister: Arc<dyn PortLister>,
    connected: AtomicBool,
    link: Mutex<Option<PortHandle>>,
    session: Mutex<Option<Session>>,
    last_port: Mutex<Option<String>>,
    correlator: CommandCorrelator,
    inputs: InputStateCache,
    /// Serializes connect, disconnect, and the reader's own teardown.
    lifecycle: Mutex<()>,
    observers: RwLock<Vec<(ObserverId, Arc<dyn ConnectionObserver>)>>,
    next_observer: AtomicU64,
}

pub struct Transport {
    shared: Arc<Shared>,
}

impl Transport {
    /// Transport over real serial ports.
    pub fn new(config: TransportConfig) -> Self {
        Self::with_backend(config, Arc::new(SerialOpener), Arc::new(SerialPortLister))
    }

    pub fn with_backend(
        config: TransportConfig,
        opener: Arc<dyn ChannelOpener>,
        lister: Arc<dyn PortLister>,
    ) -> Self {
        debug!(?config, "transport created");
        Self {
            shared: Arc::new(Shared {
                config,
                opener,
                lister,
                connected: AtomicBool::new(false),
                link: Mutex::new(None),
                session: Mutex::new(None),
                last_port: Mutex::new(None),
                correlator: CommandCorrelator::new(),
                inputs: InputStateCache::new(),
                lifecycle: Mutex::new(()),
                observers: RwLock::new(Vec::new()),
                next_observer: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.shared.config
    }

    /// Opens the device and starts the reader. A no-op when already connected.
    pub fn connect(&self) -> Result<()> {
        let established = {
            let _guard = self.shared.lifecycle.lock();
            self.connect_locked()?
        };
        if established {
            self.shared.notify(true);
        }
        Ok(())
    }

    /// Returns whether a new connection was made.
    fn connect_locked(&self) -> Result<bool> {
        if self.is_connected() {
            debug!("already connected");
            return Ok(false);
        }
        // A session whose reader gave up on its own still needs reaping.
        let stale = self.shared.session.lock().take();
        if let Some(stale) = stale {
            stale.finish();
        }

        let (reader, handle) = self.shared.open_link()?;
        let port = handle.port.clone();
        *self.shared.link.lock() = Some(handle);

        let (stop, stop_rx) = unbounded();
        self.shared.connected.store(true, Ordering::Release);

        let shared = self.shared.clone();
        let loop_stop = stop_rx.clone();
        let spawned = thread::Builder::new()
            .name("makcu-reader".into())
            .spawn(move || read_loop(shared, reader, loop_stop));
        let reader = match spawned {
            Ok(h) => h,
            Err(e) => {
                self.shared.connected.store(false, Ordering::Release);
                if let Some(handle) = self.shared.link.lock().take() {
                    handle.close();
                }
                return Err(Error::io("failed to start reader thread", e));
            }
        };

        *self.shared.session.lock() = Some(Session {
            stop,
            stop_rx,
            reader: Some(reader),
        });
        info!(%port, "connected");
        Ok(true)
    }

    /// Stops the reader, fails every pending command, and closes the port.
    pub fn disconnect(&self) -> Result<()> {
        let guard = self.shared.lifecycle.lock();
        let was_connected = self.shared.connected.swap(false, Ordering::AcqRel);
        let session = self.shared.session.lock().take();
        if let Some(session) = session {
            session.finish();
        }
        let dropped = self.shared.correlator.clear();
        if dropped > 0 {
            debug!(dropped, "cancelled pending commands");
        }
        if let Some(handle) = self.shared.link.lock().take() {
            handle.close();
        }
        drop(guard);
        info!("disconnected");
        if was_connected {
            self.shared.notify(false);
        }
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    pub fn state(&self) -> ConnectionState {
        if self.is_connected() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    pub fn add_connection_observer(&self, observer: Arc<dyn ConnectionObserver>) -> ObserverId {
        let id = ObserverId(self.shared.next_observer.fetch_add(1, Ordering::Relaxed));
        self.shared.observers.write().push((id, observer));
        id
    }

    /// Returns whether `id` was registered.
    pub fn remove_connection_observer(&self, id: ObserverId) -> bool {
        let mut observers = self.shared.observers.write();
        let before = observers.len();
        observers.retain(|(i, _)| *i != id);
        observers.len() != before
    }

    /// Registers (or with `None` removes) the button-transition observer.
    pub fn set_state_callback(&self, observer: Option<Arc<dyn InputObserver>>) {
        self.shared.inputs.set_observer(observer);
    }

    pub fn button_mask(&self) -> u8 {
        self.shared.inputs.mask()
    }

    pub fn button_states(&self) -> BTreeMap<&'static str, bool> {
        self.shared.inputs.states()
    }

    pub fn is_pressed(&self, button: MouseButton) -> bool {
        self.shared.inputs.is_pressed(button)
    }

    /// Turns the device's asynchronous button telegrams on or off.
    pub fn enable_button_monitoring(&self, enable: bool) -> Result<()> {
        let cmd = format_command(&DeviceCommand::Buttons(enable))?;
        debug!(enable, "button monitoring");
        self.send_command(&cmd, false, None).map(drop)
    }

    /// Port of the current or most recent connection.
    pub fn port_name(&self) -> Option<String> {
        self.shared.last_port.lock().clone()
    }

    /// Enumeration entry for the current port, if the system still lists it.
    pub fn port_candidate(&self) -> Option<PortCandidate> {
        let port = self.port_name()?;
        match self.shared.lister.list() {
            Ok(ports) => ports.into_iter().find(|p| p.name == port),
            Err(e) => {
                debug!(error = %e, "port listing failed");
                None
            }
        }
    }

    pub fn baud_rate(&self) -> Option<u32> {
        self.shared.link.lock().as_ref().map(|h| h.baud)
    }

    pub fn pending_commands(&self) -> usize {
        self.shared.correlator.len()
    }
}

impl CommandSink for Transport {
    fn send_command(
        &self,
        command: &str,
        expect_response: bool,
        timeout: Option<Duration>,
    ) -> Result<String> {
        if !self.is_connected() {
            return Err(Error::Connection("not connected".into()));
        }
        let stop = match self.shared.session.lock().as_ref() {
            Some(s) => s.stop_rx.clone(),
            None => return Err(Error::Connection("not connected".into())),
        };
        let timeout = timeout
            .filter(|t| !t.is_zero())
            .unwrap_or(self.shared.config.default_timeout);
        self.shared
            .correlator
            .send(command, expect_response, timeout, &stop, |bytes| {
                self.shared.write(bytes)
            })
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        if self.is_connected() {
            let _ = self.disconnect();
        }
    }
}

impl Shared {
    /// Resolves the port, opens it, and brings it to operating speed.
    /// Returns the reader half plus the handle carrying the writer half.
    fn open_link(&self) -> Result<(Box<dyn ByteChannel>, PortHandle)> {
        let port = resolve_port(
            &*self.lister,
            self.config.fallback_port.as_deref(),
            self.config.override_port,
        )?;
        debug!(%port, "opening");

        let mut channel = self
            .opener
            .open(&port, INITIAL_BAUD)
            .map_err(|e| Error::io(format!("failed to open {port}"), e))?;

        if let Err(e) = switch_baud(&mut *channel) {
            channel.close();
            return Err(Error::io(format!("failed to switch {port} to 4M baud"), e));
        }

        if self.config.send_init {
            debug!("sending init command");
            if let Err(e) = channel.write_all(format!("{INIT_COMMAND}\r").as_bytes()) {
                warn!(error = %e, "init command not sent");
            }
        }

        let prepared = channel
            .set_read_timeout(POLL_TIMEOUT)
            .and_then(|_| channel.try_clone());
        let writer = match prepared {
            Ok(w) => w,
            Err(e) => {
                channel.close();
                return Err(Error::io(format!("failed to prepare {port}"), e));
            }
        };

        *self.last_port.lock() = Some(port.clone());
        Ok((
            channel,
            PortHandle {
                writer,
                port,
                baud: OPERATING_BAUD,
            },
        ))
    }

    fn write(&self, bytes: &[u8]) -> Result<()> {
        let mut link = self.link.lock();
        let handle = link
            .as_mut()
            .ok_or_else(|| Error::Connection("not connected".into()))?;
        handle
            .writer
            .write_all(bytes)
            .map_err(|e| Error::io(format!("write to {}", handle.port), e))
    }

    fn dispatch(&self, event: Event) {
        match event {
            Event::TextLine(line) => {
                trace!(%line, "rx line");
                self.correlator.route_response(&line);
            }
            Event::Telegram(mask) => self.inputs.apply(mask),
        }
    }

    /// Up to `max_reconnect_attempts` tries at reopening the link. Returns
    /// the new reader on success.
    fn reconnect(&self, stop: &Receiver<()>) -> Option<Box<dyn ByteChannel>> {
        let max = self.config.max_reconnect_attempts;
        for attempt in 1..=max {
            if is_stopped(stop) || !self.connected.load(Ordering::Acquire) {
                return None;
            }
            info!(attempt, max, "attempting reconnect");
            if let Some(old) = self.link.lock().take() {
                old.close();
            }
            thread::sleep(self.config.reconnect_delay);

            match self.open_link() {
                Ok((mut reader, handle)) => {
                    let mut link = self.link.lock();
                    if !self.connected.load(Ordering::Acquire) {
                        reader.close();
                        handle.close();
                        return None;
                    }
                    *link = Some(handle);
                    info!("reconnected");
                    return Some(reader);
                }
                Err(e) => warn!(attempt, error = %e, "reconnect failed"),
            }
        }
        warn!("max reconnect attempts reached, giving up");
        None
    }

    fn notify(&self, connected: bool) {
        let observers: Vec<_> = self.observers.read().iter().map(|(_, o)| o.clone()).collect();
        for observer in observers {
            observer.on_connection_changed(connected);
        }
    }

    /// Tears the connection down from inside the reader thread that owns
    /// `stop`. Does nothing if that session was already ended elsewhere.
    fn drop_connection(&self, stop: &Receiver<()>) {
        // connect/disconnect hold the lifecycle lock while joining this
        // thread, after dropping our stop signal.
        let guard = loop {
            if let Some(guard) = self.lifecycle.try_lock_for(LIFECYCLE_POLL) {
                break guard;
            }
            if is_stopped(stop) {
                return;
            }
        };
        if is_stopped(stop) {
            return;
        }

        self.connected.store(false, Ordering::Release);
        if let Some(handle) = self.link.lock().take() {
            handle.close();
        }
        let session = self.session.lock().take();
        if let Some(session) = session {
            session.finish();
        }
        self.correlator.clear();
        drop(guard);

        info!("connection lost");
        self.notify(false);
    }
}

fn switch_baud(channel: &mut dyn ByteChannel) -> std::io::Result<()> {
    channel.write_all(&BAUD_SWITCH_MAGIC)?;
    thread::sleep(BAUD_SETTLE);
    channel.set_baud_rate(OPERATING_BAUD)?;
    debug!("baud rate changed: {INITIAL_BAUD} -> {OPERATING_BAUD}");
    Ok(())
}

fn is_stopped(stop: &Receiver<()>) -> bool {
    matches!(stop.try_recv(), Err(TryRecvError::Disconnected))
}

fn read_loop(shared: Arc<Shared>, mut reader: Box<dyn ByteChannel>, stop: Receiver<()>) {
    debug!("reader started");
    let mut demux = StreamDemux::new();
    let mut buf = [0u8; READ_CHUNK];
    let mut last_cleanup = Instant::now();

    while shared.connected.load(Ordering::Acquire) && !is_stopped(&stop) {
        match reader.read(&mut buf) {
            Ok(n) => {
                for &b in &buf[..n] {
                    demux.push(b, shared.inputs.mask(), |ev| shared.dispatch(ev));
                }
            }
            Err(e) => {
                if !shared.connected.load(Ordering::Acquire) || is_stopped(&stop) {
                    break;
                }
                warn!(error = %e, "serial read failed");
                reader.close();
                let recovered = if shared.config.auto_reconnect {
                    shared.reconnect(&stop)
                } else {
                    None
                };
                match recovered {
                    Some(r) => {
                        reader = r;
                        demux.reset();
                    }
                    None => {
                        shared.drop_connection(&stop);
                        break;
                    }
                }
            }
        }

        if last_cleanup.elapsed() >= shared.config.cleanup_interval {
            shared
                .correlator
                .cleanup(Instant::now(), shared.config.stale_after);
            last_cleanup = Instant::now();
        }
    }

    reader.close();
    debug!("reader stopped");
}
