//! Startup, the monitoring loop, and shutdown
//!
//! Resources are acquired in order: the [`Context`], the [`Epoll`] instance,
//! then the [`Monitor`]. They're released in reverse, on every path, by
//! dropping them.
use crate::{
    dispatch::{Dispatcher, Stats, DEFAULT_MAX_EVENTS},
    epoll::{Epoll, Interest},
    error::StartupError,
    output::{banner, Format},
    system::{
        devices::Devices,
        monitor::{MonitorBuilder, Source},
        Context,
    },
    util::{local_timestamp, SYSFS_PATH},
};
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::{
    io::Write,
    path::PathBuf,
    sync::atomic::{AtomicBool, Ordering},
};
use tracing::{debug, info};

/// Default subscription receive buffer, 128MiB
pub const DEFAULT_BUFFER_SIZE: usize = 128 * 1024 * 1024;

/// Set from the signal handler, read by the dispatch loop
static SHUTDOWN: AtomicBool = AtomicBool::new(false);

/// Everything [`run`] needs to know
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Subsystem to list and watch
    pub subsystem: String,

    /// Optional device type within [`Config::subsystem`]
    pub devtype: Option<String>,

    pub source: Source,

    /// Print full property dumps
    pub verbose: bool,

    /// List existing devices before watching
    pub snapshot: bool,

    /// Subscription receive buffer, in bytes
    pub buffer_size: usize,

    /// Ready descriptors taken per wait
    pub max_events: usize,

    /// Where sysfs is mounted
    pub sysfs: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            subsystem: "usb".into(),
            devtype: None,
            source: Source::Udev,
            verbose: false,
            snapshot: true,
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_events: DEFAULT_MAX_EVENTS,
            sysfs: SYSFS_PATH.into(),
        }
    }
}

extern "C" fn on_shutdown_signal(_: libc::c_int) {
    // Only async-signal-safe work here.
    SHUTDOWN.store(true, Ordering::SeqCst);
}

/// The process wide shutdown flag, set by `SIGINT` and `SIGTERM` once
/// [`install_signal_handlers`] has been called.
pub fn shutdown_flag() -> &'static AtomicBool {
    &SHUTDOWN
}

/// Whether a shutdown signal has been received
pub fn shutdown_requested() -> bool {
    SHUTDOWN.load(Ordering::SeqCst)
}

/// Route `SIGINT` and `SIGTERM` to the shutdown flag, and make sure neither is
/// blocked.
///
/// # Errors
///
/// - If a handler couldn't be installed
pub fn install_signal_handlers() -> Result<(), StartupError> {
    let action = SigAction::new(
        SigHandler::Handler(on_shutdown_signal),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    let mut mask = SigSet::empty();
    for sig in [Signal::SIGINT, Signal::SIGTERM] {
        // SAFETY: The handler only stores to an atomic.
        unsafe { sigaction(sig, &action) }.map_err(StartupError::Signal)?;
        mask.add(sig);
    }
    mask.thread_unblock().map_err(StartupError::Signal)?;
    debug!("signal handlers installed");
    Ok(())
}

/// Section title naming the subsystem, `usb` becomes `USB`
fn title(subsystem: &str) -> String {
    subsystem.to_uppercase()
}

/// Column header, preceded by a blank line
fn header<W: Write>(out: &mut W, format: &Format) -> std::io::Result<()> {
    write!(out, "\n{}\n", format.header())
}

/// Print every existing device matching `config`.
///
/// Returns how many were printed.
pub fn snapshot<W: Write>(
    ctx: &Context,
    config: &Config,
    format: &Format,
    out: &mut W,
) -> Result<usize, StartupError> {
    let devices = Devices::scan(ctx, &config.subsystem)?.match_devtype(config.devtype.clone());
    write!(out, "\nListing {} Devices\n", title(&config.subsystem))?;
    header(out, format)?;
    let mut count = 0;
    for rec in devices {
        out.write_all(format.render(&rec).as_bytes())?;
        count += 1;
    }
    out.flush()?;
    debug!("listed {} existing devices", count);
    Ok(count)
}

/// Run the monitor until `shutdown` is set.
///
/// Prints the banner, the snapshot, then live events as they arrive, and
/// finally the shutdown time.
///
/// # Errors
///
/// - If any resource couldn't be acquired. Everything acquired until then
///   has been released by the time this returns.
pub fn run<W: Write>(
    config: &Config,
    pid: i32,
    mut out: W,
    shutdown: &AtomicBool,
) -> Result<Stats, StartupError> {
    out.write_all(
        banner(
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            pid,
            &local_timestamp(),
        )
        .as_bytes(),
    )?;
    out.flush()?;

    let ctx = Context::with_sysfs(&config.sysfs)?;
    let format = Format::new(config.verbose);

    if config.snapshot {
        snapshot(&ctx, config, &format, &mut out)?;
    }

    let stats = watch(&ctx, config, &format, &mut out, shutdown)?;
    drop(ctx);

    writeln!(out, "Finished : {}", local_timestamp())?;
    out.flush()?;
    Ok(stats)
}

/// Subscribe, and dispatch events until `shutdown` is set.
fn watch<W: Write>(
    ctx: &Context,
    config: &Config,
    format: &Format,
    out: &mut W,
    shutdown: &AtomicBool,
) -> Result<Stats, StartupError> {
    let mut epoll = Epoll::new()?;

    let mut builder = MonitorBuilder::new(ctx, config.source)?
        .receive_buffer_size(config.buffer_size)
        .match_subsystem(&config.subsystem)?;
    if let Some(devtype) = &config.devtype {
        builder = builder.match_devtype(devtype)?;
    }
    let monitor = builder.listen()?;
    epoll.register(&monitor, Interest::READABLE | Interest::EDGE)?;

    write!(out, "\nStarted {} Monitor\n", title(&config.subsystem))?;
    header(out, format)?;
    out.flush()?;

    let mut dispatcher =
        Dispatcher::new(monitor, epoll, &mut *out, *format).max_events(config.max_events);
    let stats = dispatcher.run(shutdown);
    // Monitor first, then epoll.
    drop(dispatcher);

    if shutdown.load(Ordering::SeqCst) {
        write!(out, "\n** Signal Triggered **\n")?;
    }
    info!(
        "{} events printed, {} without device node, {} overruns, {} receive errors, {} wait errors",
        stats.emitted, stats.skipped, stats.overruns, stats.receive_errors, stats.wait_errors
    );
    Ok(stats)
}
