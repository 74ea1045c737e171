//! usb-mon - list USB devices, then report them as they come and go.
use clap::{Parser, ValueEnum};
use std::{io, path::PathBuf, process::ExitCode};
use tracing::{error, Level};
use tracing_subscriber::EnvFilter;
use usb_mon::{
    dispatch::DEFAULT_MAX_EVENTS,
    lifecycle::{self, Config, DEFAULT_BUFFER_SIZE},
    system::monitor::Source,
    util::SYSFS_PATH,
};

#[derive(Parser)]
#[command(name = "usb-mon", version, about = "USB hot-plug monitor")]
struct Cli {
    /// Subsystem to list and watch.
    #[arg(short, long, default_value = "usb")]
    subsystem: String,

    /// Only devices of this type, such as `usb_device`.
    #[arg(short = 't', long)]
    devtype: Option<String>,

    /// Where events come from.
    #[arg(long, value_enum, default_value_t = SourceArg::Udev)]
    source: SourceArg,

    /// Print every property of each device.
    #[arg(short, long)]
    verbose: bool,

    /// Don't list existing devices first.
    #[arg(long)]
    no_snapshot: bool,

    /// Event receive buffer size, in bytes.
    #[arg(long, default_value_t = DEFAULT_BUFFER_SIZE)]
    buffer_size: usize,

    /// Descriptors handled per wakeup.
    #[arg(long, default_value_t = DEFAULT_MAX_EVENTS)]
    max_events: usize,

    /// sysfs mount point.
    #[arg(long, default_value = SYSFS_PATH)]
    sysfs: PathBuf,

    /// Debug logging.
    #[arg(short, long)]
    debug: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum SourceArg {
    /// After udev rules have run.
    Udev,
    /// Straight from the kernel.
    Kernel,
}

impl From<SourceArg> for Source {
    fn from(s: SourceArg) -> Self {
        match s {
            SourceArg::Udev => Source::Udev,
            SourceArg::Kernel => Source::Kernel,
        }
    }
}

impl From<Cli> for Config {
    fn from(cli: Cli) -> Self {
        Config {
            subsystem: cli.subsystem,
            devtype: cli.devtype,
            source: cli.source.into(),
            verbose: cli.verbose,
            snapshot: !cli.no_snapshot,
            buffer_size: cli.buffer_size,
            max_events: cli.max_events,
            sysfs: cli.sysfs,
        }
    }
}

/// `RUST_LOG` style `directives` if any, otherwise warnings, or everything
/// down to debug with `--debug`.
fn log_filter(debug: bool, directives: Option<&str>) -> EnvFilter {
    let level = if debug { Level::DEBUG } else { Level::WARN };
    EnvFilter::builder()
        .with_default_directive(level.into())
        .parse_lossy(directives.unwrap_or_default())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(cli.debug, env.as_deref()))
        .with_writer(io::stderr)
        .with_target(false)
        .compact()
        .init();

    if let Err(e) = lifecycle::install_signal_handlers() {
        error!("{}", e);
        return ExitCode::FAILURE;
    }

    let pid = nix::unistd::getpid().as_raw();
    let config = Config::from(cli);
    let stdout = io::stdout();
    match lifecycle::run(&config, pid, stdout.lock(), lifecycle::shutdown_flag()) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
