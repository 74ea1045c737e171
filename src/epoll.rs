//! Readiness notification
//!
//! A thin owner of an `epoll(7)` instance. Registered descriptors are
//! identified in [`ReadyEvent`]s by their raw fd.
//!
//! With [`Interest::EDGE`], readiness is reported once per transition to
//! ready, so whoever handles a [`ReadyEvent`] must consume everything that is
//! available before waiting again.
use crate::error::MultiplexerError;
use bitflags::bitflags;
use nix::{
    errno::Errno,
    sys::epoll::{
        epoll_create1,
        epoll_ctl,
        epoll_wait,
        EpollCreateFlags,
        EpollEvent,
        EpollFlags,
        EpollOp,
    },
};
use std::{
    os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd},
    time::Duration,
};

pub type Result<T, E = MultiplexerError> = std::result::Result<T, E>;

bitflags! {
    /// What to be notified about for a registered descriptor
    pub struct Interest: u32 {
        /// Data is available to read
        const READABLE = 1;

        /// Writing won't block
        const WRITABLE = 1 << 1;

        /// Edge-triggered, see the [module docs](self)
        const EDGE = 1 << 2;
    }
}

bitflags! {
    /// Readiness reported by [`Multiplexer::wait`]
    pub struct Ready: u32 {
        const READABLE = 1;
        const WRITABLE = 1 << 1;

        /// The peer hung up
        const HANGUP = 1 << 2;

        /// Error condition on the descriptor
        const ERROR = 1 << 3;
    }
}

impl From<Interest> for EpollFlags {
    fn from(i: Interest) -> Self {
        let mut flags = EpollFlags::empty();
        if i.contains(Interest::READABLE) {
            flags |= EpollFlags::EPOLLIN;
        }
        if i.contains(Interest::WRITABLE) {
            flags |= EpollFlags::EPOLLOUT;
        }
        if i.contains(Interest::EDGE) {
            flags |= EpollFlags::EPOLLET;
        }
        flags
    }
}

impl From<EpollFlags> for Ready {
    fn from(f: EpollFlags) -> Self {
        let mut ready = Ready::empty();
        if f.contains(EpollFlags::EPOLLIN) {
            ready |= Ready::READABLE;
        }
        if f.contains(EpollFlags::EPOLLOUT) {
            ready |= Ready::WRITABLE;
        }
        if f.intersects(EpollFlags::EPOLLHUP | EpollFlags::EPOLLRDHUP) {
            ready |= Ready::HANGUP;
        }
        if f.contains(EpollFlags::EPOLLERR) {
            ready |= Ready::ERROR;
        }
        ready
    }
}

/// A descriptor that became ready
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ReadyEvent {
    fd: RawFd,
    ready: Ready,
}

impl ReadyEvent {
    pub fn new(fd: RawFd, ready: Ready) -> Self {
        Self { fd, ready }
    }

    /// The registered descriptor
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn ready(&self) -> Ready {
        self.ready
    }

    pub fn is_readable(&self) -> bool {
        self.ready.contains(Ready::READABLE)
    }
}

/// Something that blocks until registered descriptors become ready
pub trait Multiplexer {
    /// Wait for at most `max_events` descriptors to become ready.
    ///
    /// `timeout` of [`None`] waits forever.
    ///
    /// Being interrupted by a signal is not an error, an empty list is
    /// returned instead.
    fn wait(&mut self, max_events: usize, timeout: Option<Duration>) -> Result<Vec<ReadyEvent>>;
}

/// An `epoll(7)` instance.
///
/// Closed on drop. Descriptors that are still registered are dropped from
/// the interest list by the kernel when they are closed, so they should be
/// closed first.
#[derive(Debug)]
pub struct Epoll {
    fd: OwnedFd,
    events: Vec<EpollEvent>,
}

impl Epoll {
    /// Create a new close-on-exec epoll instance.
    ///
    /// # Errors
    ///
    /// - If the kernel refused, usually due to descriptor limits
    pub fn new() -> Result<Self> {
        let fd = epoll_create1(EpollCreateFlags::EPOLL_CLOEXEC).map_err(MultiplexerError::Create)?;
        // SAFETY: `fd` was just created and nothing else owns it.
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(Self {
            fd,
            events: Vec::new(),
        })
    }

    /// Start watching `target`
    ///
    /// # Errors
    ///
    /// - If `target` is already registered, or not pollable
    pub fn register<F: AsRawFd + ?Sized>(&mut self, target: &F, interest: Interest) -> Result<()> {
        let fd = target.as_raw_fd();
        let mut event = EpollEvent::new(interest.into(), fd as u64);
        epoll_ctl(self.fd.as_raw_fd(), EpollOp::EpollCtlAdd, fd, &mut event)
            .map_err(MultiplexerError::Register)
    }

    /// Stop watching `target`
    ///
    /// # Errors
    ///
    /// - If `target` wasn't registered
    pub fn deregister<F: AsRawFd + ?Sized>(&mut self, target: &F) -> Result<()> {
        epoll_ctl(
            self.fd.as_raw_fd(),
            EpollOp::EpollCtlDel,
            target.as_raw_fd(),
            None::<&mut EpollEvent>,
        )
        .map_err(MultiplexerError::Register)
    }
}

impl Multiplexer for Epoll {
    fn wait(&mut self, max_events: usize, timeout: Option<Duration>) -> Result<Vec<ReadyEvent>> {
        self.events.clear();
        self.events.resize(max_events.max(1), EpollEvent::empty());
        let n = settle(epoll_wait(
            self.fd.as_raw_fd(),
            &mut self.events,
            timeout_ms(timeout),
        ))?;
        Ok(self.events[..n]
            .iter()
            .map(|e| ReadyEvent::new(e.data() as RawFd, e.events().into()))
            .collect())
    }
}

impl AsRawFd for Epoll {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

/// Interrupted waits become "nothing ready".
fn settle(res: nix::Result<usize>) -> Result<usize> {
    match res {
        Ok(n) => Ok(n),
        Err(Errno::EINTR) => Ok(0),
        Err(e) => Err(MultiplexerError::Wait(e)),
    }
}

/// `epoll_wait` timeout, rounding up so short timeouts don't busy-loop.
fn timeout_ms(timeout: Option<Duration>) -> isize {
    match timeout {
        None => -1,
        Some(t) => {
            let ms = t.as_millis() + u128::from(t.subsec_nanos() % 1_000_000 != 0);
            ms.min(isize::MAX as u128) as isize
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use nix::unistd::{pipe, write};

    /// Both ends of a pipe, closed on drop.
    pub(crate) struct Pipe {
        pub read: OwnedFd,
        pub write: OwnedFd,
    }

    impl Pipe {
        pub fn new() -> Self {
            let (r, w) = pipe().unwrap();
            // SAFETY: fresh descriptors owned by nothing else.
            unsafe {
                Self {
                    read: OwnedFd::from_raw_fd(r),
                    write: OwnedFd::from_raw_fd(w),
                }
            }
        }

        pub fn poke(&self) {
            write(self.write.as_raw_fd(), b"x").unwrap();
        }
    }

    #[test]
    fn interrupted_is_empty() {
        assert_eq!(settle(Err(Errno::EINTR)).unwrap(), 0);
        assert_eq!(settle(Ok(3)).unwrap(), 3);
        assert!(matches!(
            settle(Err(Errno::EBADF)),
            Err(MultiplexerError::Wait(Errno::EBADF))
        ));
    }

    #[test]
    fn timeouts() {
        assert_eq!(timeout_ms(None), -1);
        assert_eq!(timeout_ms(Some(Duration::ZERO)), 0);
        assert_eq!(timeout_ms(Some(Duration::from_millis(10))), 10);
        assert_eq!(timeout_ms(Some(Duration::from_micros(1500))), 2);
    }

    #[test]
    fn flags() {
        let f: EpollFlags = (Interest::READABLE | Interest::EDGE).into();
        assert_eq!(f, EpollFlags::EPOLLIN | EpollFlags::EPOLLET);
        let r: Ready = (EpollFlags::EPOLLIN | EpollFlags::EPOLLHUP).into();
        assert_eq!(r, Ready::READABLE | Ready::HANGUP);
    }

    #[test]
    fn nothing_ready() {
        let mut ep = Epoll::new().unwrap();
        let p = Pipe::new();
        ep.register(&p.read, Interest::READABLE).unwrap();
        let ready = ep.wait(4, Some(Duration::ZERO)).unwrap();
        assert!(ready.is_empty());
    }

    #[test]
    fn readable_pipe() {
        let mut ep = Epoll::new().unwrap();
        let p = Pipe::new();
        ep.register(&p.read, Interest::READABLE).unwrap();
        p.poke();
        let ready = ep.wait(4, Some(Duration::from_millis(100))).unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].fd(), p.read.as_raw_fd());
        assert!(ready[0].is_readable());
    }

    #[test]
    fn edge_triggered_fires_once() {
        let mut ep = Epoll::new().unwrap();
        let p = Pipe::new();
        ep.register(&p.read, Interest::READABLE | Interest::EDGE)
            .unwrap();
        p.poke();
        assert_eq!(ep.wait(4, Some(Duration::from_millis(100))).unwrap().len(), 1);
        // Nothing was read, but there was no new transition either.
        assert!(ep.wait(4, Some(Duration::ZERO)).unwrap().is_empty());
        p.poke();
        assert_eq!(ep.wait(4, Some(Duration::from_millis(100))).unwrap().len(), 1);
    }

    #[test]
    fn register_twice_fails() {
        let mut ep = Epoll::new().unwrap();
        let p = Pipe::new();
        ep.register(&p.read, Interest::READABLE).unwrap();
        assert!(matches!(
            ep.register(&p.read, Interest::READABLE),
            Err(MultiplexerError::Register(Errno::EEXIST))
        ));
        ep.deregister(&p.read).unwrap();
        ep.register(&p.read, Interest::READABLE).unwrap();
    }
}
