//! High-level device API on top of [`Transport`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::inputs::MouseButton;
use crate::locks::{LockStateCache, LockTarget};
use crate::proto::DeviceCommand;
use crate::proto::format::format_command;
use crate::transport::{CommandSink, Transport, TransportConfig};

const VERSION_TIMEOUT: Duration = Duration::from_millis(100);

/// Upper bound on relative steps issued by one [`Device::move_absolute`].
const MAX_ABSOLUTE_STEPS: usize = 2000;

/// Reads the host cursor so absolute targets can be reached with relative
/// moves. Only some platforms can provide this.
pub trait CursorPositioning: Send + Sync {
    fn cursor_position(&self) -> Result<(i32, i32)>;

    /// Host pointer-speed factor relative moves are divided by.
    fn speed_multiplier(&self) -> Result<f64> {
        Ok(1.0)
    }
}

/// Stand-in for platforms without cursor access.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCursor;

impl CursorPositioning for NoCursor {
    fn cursor_position(&self) -> Result<(i32, i32)> {
        Err(Error::Command(
            "absolute positioning unsupported on this platform".into(),
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub port: Option<String>,
    pub description: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub connected: bool,
}

pub struct Device {
    transport: Arc<Transport>,
    locks: LockStateCache,
    cursor: Box<dyn CursorPositioning>,
}

impl Device {
    pub fn new(transport: Arc<Transport>) -> Self {
        Self {
            transport,
            locks: LockStateCache::new(),
            cursor: Box::new(NoCursor),
        }
    }

    /// Device over real serial ports, not yet connected.
    pub fn open(config: TransportConfig) -> Self {
        Self::new(Arc::new(Transport::new(config)))
    }

    pub fn with_cursor(mut self, cursor: impl CursorPositioning + 'static) -> Self {
        self.cursor = Box::new(cursor);
        self
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    pub fn connect(&self) -> Result<()> {
        self.transport.connect()
    }

    pub fn disconnect(&self) -> Result<()> {
        self.transport.disconnect()
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.transport.is_connected() {
            Ok(())
        } else {
            Err(Error::Connection("not connected".into()))
        }
    }

    fn fire(&self, cmd: DeviceCommand) -> Result<()> {
        self.ensure_connected()?;
        let text = format_command(&cmd)?;
        self.transport.send_command(&text, false, None).map(drop)
    }

    // ---- Buttons

    pub fn press(&self, button: MouseButton) -> Result<()> {
        self.fire(DeviceCommand::Press(button))
    }

    pub fn release(&self, button: MouseButton) -> Result<()> {
        self.fire(DeviceCommand::Release(button))
    }

    pub fn click(&self, button: MouseButton) -> Result<()> {
        self.press(button)?;
        self.release(button)
    }

    // ---- Movement

    pub fn move_by(&self, dx: i32, dy: i32) -> Result<()> {
        self.fire(DeviceCommand::Move { dx, dy })
    }

    /// Relative move the device spreads over `segments` steps.
    pub fn move_smooth(&self, dx: i32, dy: i32, segments: u32) -> Result<()> {
        self.fire(DeviceCommand::MoveSmooth { dx, dy, segments })
    }

    /// Relative move along a quadratic curve. The control point defaults to
    /// the midpoint of the move.
    pub fn move_bezier(
        &self,
        dx: i32,
        dy: i32,
        segments: u32,
        control: Option<(i32, i32)>,
    ) -> Result<()> {
        let (ctrl_x, ctrl_y) = control.unwrap_or((dx / 2, dy / 2));
        self.fire(DeviceCommand::MoveBezier {
            dx,
            dy,
            segments,
            ctrl_x,
            ctrl_y,
        })
    }

    pub fn scroll(&self, delta: i32) -> Result<()> {
        self.fire(DeviceCommand::Wheel(delta))
    }

    /// Walks the cursor to `target` with relative moves of at most `speed`
    /// counts per axis (clamped to 1..=14), pausing `step_delay` between
    /// steps. Stops once within one pixel.
    pub fn move_absolute(&self, target: (i32, i32), speed: i32, step_delay: Duration) -> Result<()> {
        self.ensure_connected()?;
        let multiplier = self.cursor.speed_multiplier()?;
        if multiplier <= 0.0 {
            return Err(Error::Command(format!("invalid pointer speed {multiplier}")));
        }
        let speed = speed.clamp(1, 14);

        for _ in 0..MAX_ABSOLUTE_STEPS {
            let (cx, cy) = self.cursor.cursor_position()?;
            let (dx, dy) = (target.0 - cx, target.1 - cy);
            if dx.abs() <= 1 && dy.abs() <= 1 {
                return Ok(());
            }
            let step = |d: i32| ((f64::from(d) / multiplier) as i32).clamp(-speed, speed);
            self.move_by(step(dx), step(dy))?;
            if !step_delay.is_zero() {
                thread::sleep(step_delay);
            }
        }
        Err(Error::Timeout(format!(
            "cursor did not reach {target:?} within {MAX_ABSOLUTE_STEPS} steps"
        )))
    }

    // ---- Locks

    pub fn lock(&self, target: LockTarget) -> Result<()> {
        self.ensure_connected()?;
        self.locks.set_lock(&*self.transport, target, true)
    }

    pub fn unlock(&self, target: LockTarget) -> Result<()> {
        self.ensure_connected()?;
        self.locks.set_lock(&*self.transport, target, false)
    }

    pub fn is_locked(&self, target: LockTarget) -> Result<bool> {
        self.ensure_connected()?;
        self.locks.query_lock(&*self.transport, target)
    }

    /// Every lock target, keyed by name.
    pub fn lock_states(&self) -> Result<BTreeMap<&'static str, bool>> {
        self.ensure_connected()?;
        let states = self.locks.query_all(&*self.transport)?;
        Ok(states.into_iter().map(|(t, l)| (t.name(), l)).collect())
    }

    /// Forces the next lock query to ask the device.
    pub fn invalidate_locks(&self) {
        self.locks.invalidate();
    }

    // ---- Inputs

    pub fn button_mask(&self) -> Result<u8> {
        self.ensure_connected()?;
        Ok(self.transport.button_mask())
    }

    pub fn button_states(&self) -> Result<BTreeMap<&'static str, bool>> {
        self.ensure_connected()?;
        Ok(self.transport.button_states())
    }

    pub fn is_pressed(&self, button: MouseButton) -> Result<bool> {
        self.ensure_connected()?;
        Ok(self.transport.is_pressed(button))
    }

    pub fn enable_button_monitoring(&self, enable: bool) -> Result<()> {
        self.ensure_connected()?;
        self.transport.enable_button_monitoring(enable)
    }

    // ---- Identity

    pub fn spoof_serial(&self, serial: &str) -> Result<()> {
        self.fire(DeviceCommand::SpoofSerial(serial.to_string()))?;
        info!(serial, "serial spoofed");
        Ok(())
    }

    pub fn reset_serial(&self) -> Result<()> {
        self.fire(DeviceCommand::ResetSerial)?;
        info!("serial reset");
        Ok(())
    }

    pub fn firmware_version(&self) -> Result<String> {
        self.ensure_connected()?;
        let cmd = format_command(&DeviceCommand::Version)?;
        let reply = self
            .transport
            .send_command(&cmd, true, Some(VERSION_TIMEOUT))?;
        debug!(version = %reply, "firmware version");
        Ok(reply)
    }

    pub fn device_info(&self) -> Result<DeviceInfo> {
        self.ensure_connected()?;
        let mut info = DeviceInfo {
            port: self.transport.port_name(),
            description: "Connected Device".to_string(),
            vid: None,
            pid: None,
            connected: true,
        };
        if let Some(candidate) = self.transport.port_candidate() {
            if let Some(product) = candidate.product.filter(|p| !p.is_empty()) {
                info.description = product;
            }
            info.vid = candidate.vid;
            info.pid = candidate.pid;
        }
        Ok(info)
    }
}
