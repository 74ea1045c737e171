//! Error handling stuff
use displaydoc::Display;
use nix::errno::Errno;
use std::{io, path::PathBuf};
use thiserror::Error;

/// Error type for [`crate::system::Context`]
#[derive(Debug, Display, Error)]
pub enum ContextError {
    /// sysfs does not appear to be mounted at `{0}`
    NoSysfs(PathBuf),
}

/// Error type for [`crate::system::devices::Devices`]
#[derive(Debug, Display, Error)]
pub enum EnumerateError {
    /// Invalid subsystem name `{0}`
    InvalidSubsystem(String),

    /// IO Failed: {0}
    Io(#[from] io::Error),
}

/// Error type for [`crate::system::monitor::MonitorBuilder`]
#[derive(Debug, Display, Error)]
pub enum SubscriptionError {
    /// unable to create netlink socket: {0}
    Socket(#[source] Errno),

    /// unable to retrieve monitor descriptor: {0}
    Descriptor(#[source] Errno),

    /// unable to apply subsystem filter `{0}`
    Filter(String),

    /// unable to subscribe to device events: {0}
    Enable(#[source] Errno),
}

/// Error type for a single receive on a [`crate::system::monitor::Monitor`]
#[derive(Debug, Display, Error)]
pub enum ReceiveError {
    /// error receiving uevent message: {0}
    Receive(#[source] Errno),

    /// receive buffer overrun, the kernel dropped events
    Overrun,
}

/// Error type for [`crate::epoll::Epoll`]
#[derive(Debug, Display, Error)]
pub enum MultiplexerError {
    /// error creating epoll fd: {0}
    Create(#[source] Errno),

    /// Fail to add fd to epoll: {0}
    Register(#[source] Errno),

    /// error waiting for events: {0}
    Wait(#[source] Errno),
}

/// Anything that stops the monitor from starting.
#[derive(Debug, Display, Error)]
pub enum StartupError {
    /// unable to create device context: {0}
    Context(#[from] ContextError),

    /// unable to enumerate devices: {0}
    Enumerate(#[from] EnumerateError),

    /// {0}
    Subscription(#[from] SubscriptionError),

    /// {0}
    Multiplexer(#[from] MultiplexerError),

    /// unable to install signal handlers: {0}
    Signal(#[source] Errno),

    /// IO Failed: {0}
    Io(#[from] io::Error),
}
