use clap::{Args, Parser, Subcommand, ValueEnum};
use makcu_link::{LockTarget, TransportConfig};
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(name = "makcu", about = "Drive a MAKCU mouse-injection device over USB serial")]
pub struct Cli {
    #[command(flatten)]
    pub conn: ConnOpts,
    /// Verbose logging (RUST_LOG overrides)
    #[arg(long, global = true, default_value_t = false)]
    pub debug: bool,
    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Cmd {
    /// List serial ports and mark the ones that look like the device
    Ports,
    /// Send a raw command line
    Send(SendOpts),
    /// Print button transitions as they happen
    Monitor(MonitorOpts),
    /// Lock or unlock a button or axis
    Lock(LockOpts),
    /// Show the lock state of every target
    Locks,
    /// Print the firmware version
    Version,
}

#[derive(Args, Debug, Clone)]
pub struct ConnOpts {
    /// Serial port to use when discovery finds nothing
    #[arg(long, global = true)]
    pub port: Option<String>,
    /// Skip discovery and always use --port
    #[arg(long, global = true, default_value_t = false, requires = "port")]
    pub override_port: bool,
    /// Do not send km.buttons(1) after connecting
    #[arg(long, global = true, default_value_t = false)]
    pub no_init: bool,
    /// Do not reconnect after read failures
    #[arg(long, global = true, default_value_t = false)]
    pub no_reconnect: bool,
}

impl ConnOpts {
    pub fn config(&self) -> TransportConfig {
        TransportConfig {
            fallback_port: self.port.clone(),
            override_port: self.override_port,
            send_init: !self.no_init,
            auto_reconnect: !self.no_reconnect,
            ..TransportConfig::default()
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct SendOpts {
    /// Command text, e.g. "km.move(10,0)"
    pub command: String,
    /// Wait for and print the reply
    #[arg(long, default_value_t = false)]
    pub expect: bool,
    /// Reply timeout in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,
}

impl SendOpts {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Args, Debug, Clone)]
pub struct MonitorOpts {
    /// Stop after this many seconds (runs until interrupted otherwise)
    #[arg(long)]
    pub seconds: Option<f64>,
}

#[derive(Args, Debug, Clone)]
pub struct LockOpts {
    /// left, right, middle, mouse4, mouse5, x or y
    pub target: LockTarget,
    pub state: Switch,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Switch {
    On,
    Off,
}
