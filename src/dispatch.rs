//! The event loop
//!
//! Waits for the subscription to become readable, then drains every queued
//! event, printing the ones that have a device node. Readiness is
//! edge-triggered, so a wakeup that isn't fully drained would leave events
//! sitting in the socket until the next, unrelated, event arrives.
use crate::{
    epoll::Multiplexer,
    error::ReceiveError,
    output::Format,
    system::{
        devices::Device,
        monitor::{Event, Monitor},
        record::DeviceRecord,
    },
};
use std::{
    io::Write,
    os::unix::io::AsRawFd,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};
use tracing::{debug, error, warn};

/// Default number of ready descriptors taken per wait.
pub const DEFAULT_MAX_EVENTS: usize = 5;

/// Consecutive failed receives after which a drain gives up until the next
/// wakeup.
const MAX_RECEIVE_ERRORS: usize = 8;

/// A pollable source of device events
pub trait EventSource: AsRawFd {
    /// Next queued event, [`None`] once the queue is empty. Never blocks.
    fn receive(&mut self) -> Result<Option<Event>, ReceiveError>;
}

impl EventSource for Monitor {
    fn receive(&mut self) -> Result<Option<Event>, ReceiveError> {
        Monitor::receive(self)
    }
}

/// Counters kept by a [`Dispatcher`]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Stats {
    /// Records printed
    pub emitted: u64,

    /// Events dropped for lacking a device node
    pub skipped: u64,

    /// Times the kernel reported dropped events
    pub overruns: u64,

    /// Failed receives, other than overruns
    pub receive_errors: u64,

    /// Failed waits, not counting interruptions
    pub wait_errors: u64,
}

/// Runs the event loop, owning the source and the multiplexer it's
/// registered with.
///
/// The source is dropped before the multiplexer.
#[derive(Debug)]
pub struct Dispatcher<S, M, W> {
    source: S,
    mux: M,
    out: W,
    format: Format,
    max_events: usize,
    timeout: Option<Duration>,
    stats: Stats,
}

impl<S, M, W> Dispatcher<S, M, W>
where
    S: EventSource,
    M: Multiplexer,
    W: Write,
{
    /// `source` must already be registered with `mux`.
    pub fn new(source: S, mux: M, out: W, format: Format) -> Self {
        Self {
            source,
            mux,
            out,
            format,
            max_events: DEFAULT_MAX_EVENTS,
            timeout: None,
            stats: Stats::default(),
        }
    }

    /// Ready descriptors taken per wait
    pub fn max_events(mut self, max_events: usize) -> Self {
        self.max_events = max_events.max(1);
        self
    }

    /// Wait timeout. [`None`], the default, waits forever.
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    /// Give back the output
    pub fn into_output(self) -> W {
        self.out
    }

    /// Loop until `shutdown` is set.
    ///
    /// The flag is only checked between waits, an event being handled when
    /// it is set is finished first.
    pub fn run(&mut self, shutdown: &AtomicBool) -> Stats {
        while !shutdown.load(Ordering::SeqCst) {
            self.poll_once();
        }
        debug!("dispatcher stopping: {:?}", self.stats);
        self.stats
    }

    /// Wait once, and handle everything that became ready.
    ///
    /// Returns the number of records printed.
    pub fn poll_once(&mut self) -> usize {
        let ready = match self.mux.wait(self.max_events, self.timeout) {
            Ok(r) => r,
            Err(e) => {
                self.stats.wait_errors += 1;
                error!("{}", e);
                return 0;
            }
        };
        let fd = self.source.as_raw_fd();
        let mut emitted = 0;
        for ev in ready {
            if ev.fd() == fd && ev.is_readable() {
                emitted += self.drain();
            }
        }
        if emitted > 0 {
            if let Err(e) = self.out.flush() {
                warn!("unable to flush output: {}", e);
            }
        }
        emitted
    }

    /// Receive until the source is empty.
    ///
    /// Failed receives are skipped over, unless [`MAX_RECEIVE_ERRORS`] of them
    /// happen in a row.
    fn drain(&mut self) -> usize {
        let mut emitted = 0;
        let mut failures = 0;
        loop {
            match self.source.receive() {
                Ok(Some(event)) => {
                    failures = 0;
                    if self.emit(event) {
                        emitted += 1;
                    }
                }
                Ok(None) => break,
                Err(e @ ReceiveError::Overrun) => {
                    self.stats.overruns += 1;
                    warn!("{}", e);
                }
                Err(e) => {
                    self.stats.receive_errors += 1;
                    warn!("{}", e);
                    failures += 1;
                    if failures >= MAX_RECEIVE_ERRORS {
                        error!(
                            "{} receive errors in a row, waiting for the next wakeup",
                            failures
                        );
                        break;
                    }
                }
            }
        }
        emitted
    }

    /// Print `event` if it has a device node. The event is released on
    /// return either way.
    fn emit(&mut self, event: Event) -> bool {
        // Removed devices often have no node any more, and are dropped here
        // too.
        if event.devnode().is_none() {
            self.stats.skipped += 1;
            return false;
        }
        let rec = DeviceRecord::read(&event);
        if let Err(e) = self.out.write_all(self.format.render(&rec).as_bytes()) {
            warn!("unable to write record: {}", e);
            return false;
        }
        self.stats.emitted += 1;
        true
    }
}
