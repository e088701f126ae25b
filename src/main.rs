use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod monitor;
mod ops;

fn main() -> Result<()> {
    let args = cli::Cli::parse();
    init_logging(args.debug);
    match args.cmd {
        cli::Cmd::Ports => ops::ports(),
        cli::Cmd::Send(opts) => ops::send(&args.conn, opts),
        cli::Cmd::Monitor(opts) => monitor::run(&args.conn, opts),
        cli::Cmd::Lock(opts) => ops::lock(&args.conn, opts),
        cli::Cmd::Locks => ops::locks(&args.conn),
        cli::Cmd::Version => ops::version(&args.conn),
    }
}

fn init_logging(debug: bool) {
    let fallback = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
