use anyhow::{Context, Result, bail};
use crossbeam_channel::{RecvTimeoutError, unbounded};
use makcu_link::{Device, MouseButton};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cli::{ConnOpts, MonitorOpts};

pub fn run(conn: &ConnOpts, opts: MonitorOpts) -> Result<()> {
    let device = Device::open(conn.config());
    let (tx, rx) = unbounded::<(MouseButton, bool)>();
    device
        .transport()
        .set_state_callback(Some(Arc::new(move |b: MouseButton, pressed: bool| {
            let _ = tx.send((b, pressed));
        })));
    device.connect().context("connecting to device")?;
    device.enable_button_monitoring(true)?;

    let deadline = opts
        .seconds
        .and_then(|s| Duration::try_from_secs_f64(s.max(0.0)).ok())
        .map(|d| Instant::now() + d);
    eprintln!("monitoring buttons (ctrl-c to stop)");

    loop {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok((button, pressed)) => {
                println!("{button:<7} {}", if pressed { "down" } else { "up" });
            }
            Err(RecvTimeoutError::Timeout) => {
                if !device.is_connected() {
                    bail!("device disconnected");
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    device.disconnect()?;
    Ok(())
}
