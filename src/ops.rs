use anyhow::{Context, Result};
use makcu_link::discovery::{PortLister, SerialPortLister};
use makcu_link::{CommandSink, Device};

use crate::cli::{ConnOpts, LockOpts, SendOpts, Switch};

fn connect(conn: &ConnOpts) -> Result<Device> {
    let device = Device::open(conn.config());
    device.connect().context("connecting to device")?;
    Ok(device)
}

pub fn ports() -> Result<()> {
    let ports = SerialPortLister.list().context("listing serial ports")?;
    if ports.is_empty() {
        eprintln!("no serial ports found");
    }
    for p in ports {
        let ids = match (p.vid, p.pid) {
            (Some(vid), Some(pid)) => format!("{vid:04X}:{pid:04X}"),
            _ => "----:----".to_string(),
        };
        let mark = if p.is_device() { "*" } else { " " };
        println!(
            "{mark} {:<20} {ids}  {}",
            p.name,
            p.product.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

pub fn send(conn: &ConnOpts, opts: SendOpts) -> Result<()> {
    let device = connect(conn)?;
    let reply = device
        .transport()
        .send_command(&opts.command, opts.expect, opts.timeout())
        .with_context(|| format!("sending {}", opts.command))?;
    if opts.expect {
        println!("{reply}");
    }
    device.disconnect()?;
    Ok(())
}

pub fn lock(conn: &ConnOpts, opts: LockOpts) -> Result<()> {
    let device = connect(conn)?;
    match opts.state {
        Switch::On => device.lock(opts.target)?,
        Switch::Off => device.unlock(opts.target)?,
    }
    println!("{}: {}", opts.target, if opts.state == Switch::On { "locked" } else { "unlocked" });
    device.disconnect()?;
    Ok(())
}

pub fn locks(conn: &ConnOpts) -> Result<()> {
    let device = connect(conn)?;
    for (name, locked) in device.lock_states()? {
        println!("{name:<7} {}", if locked { "locked" } else { "-" });
    }
    device.disconnect()?;
    Ok(())
}

pub fn version(conn: &ConnOpts) -> Result<()> {
    let device = connect(conn)?;
    let info = device.device_info()?;
    let version = device.firmware_version().context("querying firmware version")?;
    println!("{version}");
    eprintln!(
        "port {} ({})",
        info.port.as_deref().unwrap_or("?"),
        info.description
    );
    device.disconnect()?;
    Ok(())
}
