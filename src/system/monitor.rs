//! Subscribe to device events
//!
//! Device events are delivered over a `NETLINK_KOBJECT_UEVENT` socket, either
//! straight from the kernel or after the udev daemon has processed them.
//!
//! # Examples
//!
//! ```rust,no_run
//! # use usb_mon::system::{Context, monitor::{MonitorBuilder, Source}};
//! let ctx = Context::new().unwrap();
//! let mut monitor = MonitorBuilder::new(&ctx, Source::Udev)
//!     .unwrap()
//!     .receive_buffer_size(128 * 1024 * 1024)
//!     .match_subsystem("usb")
//!     .unwrap()
//!     .listen()
//!     .unwrap();
//!
//! while let Ok(Some(event)) = monitor.receive() {
//!     println!("{:?}", event);
//! }
//! ```
use crate::{
    error::{ReceiveError, SubscriptionError},
    system::{devices::Device, Context},
    util::UDEV_CONTROL_PATH,
};
use nix::{
    cmsg_space,
    errno::Errno,
    sys::socket::{
        bind,
        getsockname,
        recvmsg,
        setsockopt,
        socket,
        sockopt,
        AddressFamily,
        ControlMessageOwned,
        MsgFlags,
        NetlinkAddr,
        SockFlag,
        SockProtocol,
        SockType,
        UnixCredentials,
    },
};
use std::{
    io::IoSliceMut,
    os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd},
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

pub mod uevent;

pub use self::uevent::Event;

pub type Result<T, E = SubscriptionError> = std::result::Result<T, E>;

/// Largest message we accept. Anything longer is truncated and dropped.
const RECEIVE_BUFFER: usize = 8192;

/// Which events to listen to
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Source {
    /// Raw kernel uevents, sent before udev has seen the device.
    ///
    /// Device nodes may not exist yet when these arrive.
    Kernel,

    /// Events rebroadcast by the udev daemon, after rules have run.
    Udev,
}

impl Source {
    /// Netlink multicast group this source is sent to
    pub fn group(&self) -> u32 {
        match self {
            Source::Kernel => 1,
            Source::Udev => 2,
        }
    }
}

/// Event filter, applied before an event leaves the [`Monitor`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    subsystem: Option<String>,
    devtype: Option<String>,
}

impl Filter {
    /// Whether `dev` passes this filter
    pub fn matches<D: Device + ?Sized>(&self, dev: &D) -> bool {
        if let Some(subsystem) = &self.subsystem {
            if dev.subsystem() != Some(subsystem.as_str()) {
                return false;
            }
        }
        if let Some(devtype) = &self.devtype {
            if dev.devtype() != Some(devtype.as_str()) {
                return false;
            }
        }
        true
    }
}

fn valid_name(s: &str) -> bool {
    !s.is_empty() && !s.contains('/') && !s.contains('\0')
}

/// Sets up a [`Monitor`]
#[derive(Debug)]
pub struct MonitorBuilder {
    fd: OwnedFd,
    source: Source,
    sysfs: PathBuf,
    filter: Filter,
}

impl MonitorBuilder {
    /// Create the netlink socket for `source`.
    ///
    /// The socket is non-blocking and close-on-exec.
    ///
    /// # Errors
    ///
    /// - If the socket couldn't be created
    pub fn new(ctx: &Context, source: Source) -> Result<Self> {
        let fd = socket(
            AddressFamily::Netlink,
            SockType::Raw,
            SockFlag::SOCK_CLOEXEC | SockFlag::SOCK_NONBLOCK,
            SockProtocol::NetlinkKObjectUEvent,
        )
        .map_err(SubscriptionError::Socket)?;
        // SAFETY: `fd` was just created and nothing else owns it.
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };
        if source == Source::Udev && !Path::new(UDEV_CONTROL_PATH).exists() {
            warn!("udev daemon does not appear to be running, no events will be delivered");
        }
        Ok(Self {
            fd,
            source,
            sysfs: ctx.sysfs().to_path_buf(),
            filter: Filter::default(),
        })
    }

    /// Set the kernel receive buffer size, in bytes.
    ///
    /// A large buffer absorbs bursts of events, such as a hub full of
    /// devices being plugged in at once.
    ///
    /// This tries `SO_RCVBUFFORCE` first, which ignores `rmem_max` but needs
    /// `CAP_NET_ADMIN`, then `SO_RCVBUF`. Failure of both is not fatal.
    pub fn receive_buffer_size(self, size: usize) -> Self {
        let fd = self.fd.as_raw_fd();
        if let Err(e) = setsockopt(fd, sockopt::RcvBufForce, &size) {
            debug!("SO_RCVBUFFORCE failed: {}", e);
            if let Err(e) = setsockopt(fd, sockopt::RcvBuf, &size) {
                warn!("unable to set receive buffer size to {}: {}", size, e);
            }
        }
        self
    }

    /// Only deliver events for devices in `subsystem`
    ///
    /// # Errors
    ///
    /// - If `subsystem` isn't a valid subsystem name
    pub fn match_subsystem(mut self, subsystem: &str) -> Result<Self> {
        if !valid_name(subsystem) {
            return Err(SubscriptionError::Filter(subsystem.into()));
        }
        self.filter.subsystem = Some(subsystem.into());
        Ok(self)
    }

    /// Only deliver events for devices of `devtype`, within the subsystem.
    ///
    /// # Errors
    ///
    /// - If `devtype` isn't a valid name
    pub fn match_devtype(mut self, devtype: &str) -> Result<Self> {
        if !valid_name(devtype) {
            return Err(SubscriptionError::Filter(devtype.into()));
        }
        self.filter.devtype = Some(devtype.into());
        Ok(self)
    }

    /// Join the multicast group and start receiving events.
    ///
    /// # Errors
    ///
    /// - If credentials passing couldn't be enabled
    /// - If binding to the multicast group failed
    /// - If the bound address couldn't be retrieved
    pub fn listen(self) -> Result<Monitor> {
        let fd = self.fd.as_raw_fd();
        setsockopt(fd, sockopt::PassCred, &true).map_err(SubscriptionError::Enable)?;
        bind(fd, &NetlinkAddr::new(0, self.source.group())).map_err(SubscriptionError::Enable)?;
        let local: NetlinkAddr = getsockname(fd).map_err(SubscriptionError::Descriptor)?;
        debug!(
            "listening for {:?} events on netlink port {}",
            self.source,
            local.pid()
        );
        Ok(Monitor {
            fd: self.fd,
            source: self.source,
            sysfs: self.sysfs,
            filter: self.filter,
            port: local.pid(),
            buf: vec![0; RECEIVE_BUFFER],
        })
    }
}

/// Why a datagram was dropped before decoding
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Reject {
    NoSender,
    Unicast,
    NotKernel,
    Credentials,
    Truncated,
}

/// One received datagram, before decoding
#[derive(Debug)]
struct Datagram {
    len: usize,
    sender: Option<NetlinkAddr>,
    uid: Option<u32>,
    truncated: bool,
}

impl Datagram {
    /// Only accept multicasts from root, and for the kernel source, only
    /// from the kernel itself.
    fn check(&self, source: Source) -> std::result::Result<(), Reject> {
        if self.truncated {
            return Err(Reject::Truncated);
        }
        let sender = self.sender.as_ref().ok_or(Reject::NoSender)?;
        if sender.groups() == 0 {
            return Err(Reject::Unicast);
        }
        if source == Source::Kernel && sender.pid() != 0 {
            return Err(Reject::NotKernel);
        }
        if self.uid != Some(0) {
            return Err(Reject::Credentials);
        }
        Ok(())
    }
}

/// An open device event subscription.
///
/// Closed on drop.
#[derive(Debug)]
pub struct Monitor {
    fd: OwnedFd,
    source: Source,
    sysfs: PathBuf,
    filter: Filter,
    port: u32,
    buf: Vec<u8>,
}

impl Monitor {
    pub fn source(&self) -> Source {
        self.source
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    /// Netlink port id the kernel assigned us
    pub fn port(&self) -> u32 {
        self.port
    }

    /// Receive the next event that passes the filter.
    ///
    /// This never blocks. Returns `Ok(None)` once nothing is queued.
    /// Messages that fail validation or decoding, or that don't match the
    /// filter, are skipped without being returned.
    ///
    /// # Errors
    ///
    /// - [`ReceiveError::Overrun`] if the kernel had to drop events. More
    ///   events may still be queued.
    /// - [`ReceiveError::Receive`] for any other socket error
    pub fn receive(&mut self) -> Result<Option<Event>, ReceiveError> {
        loop {
            let dgram = match self.recv_datagram() {
                Ok(d) => d,
                Err(Errno::EAGAIN) => return Ok(None),
                Err(Errno::EINTR) => continue,
                Err(Errno::ENOBUFS) => return Err(ReceiveError::Overrun),
                Err(e) => return Err(ReceiveError::Receive(e)),
            };
            if let Err(why) = dgram.check(self.source) {
                debug!("dropping message: {:?}", why);
                continue;
            }
            let event = match Event::decode(&self.buf[..dgram.len], &self.sysfs) {
                Some(e) => e,
                None => {
                    debug!("dropping undecodable message of {} bytes", dgram.len);
                    continue;
                }
            };
            if !self.filter.matches(&event) {
                continue;
            }
            return Ok(Some(event));
        }
    }

    fn recv_datagram(&mut self) -> nix::Result<Datagram> {
        let fd = self.fd.as_raw_fd();
        let mut cmsg = cmsg_space!(UnixCredentials);
        let mut iov = [IoSliceMut::new(&mut self.buf)];
        let msg = recvmsg::<NetlinkAddr>(fd, &mut iov, Some(&mut cmsg), MsgFlags::empty())?;
        let uid = msg.cmsgs().find_map(|c| match c {
            ControlMessageOwned::ScmCredentials(cred) => Some(cred.uid()),
            _ => None,
        });
        Ok(Datagram {
            len: msg.bytes,
            sender: msg.address,
            uid,
            truncated: msg.flags.contains(MsgFlags::MSG_TRUNC),
        })
    }
}

impl AsRawFd for Monitor {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::record::tests::FakeDevice;

    fn dgram(pid: u32, groups: u32, uid: Option<u32>) -> Datagram {
        Datagram {
            len: 0,
            sender: Some(NetlinkAddr::new(pid, groups)),
            uid,
            truncated: false,
        }
    }

    #[test]
    fn kernel_messages() {
        assert_eq!(dgram(0, 1, Some(0)).check(Source::Kernel), Ok(()));
        assert_eq!(
            dgram(4242, 1, Some(0)).check(Source::Kernel),
            Err(Reject::NotKernel)
        );
    }

    #[test]
    fn udev_messages() {
        assert_eq!(dgram(812, 2, Some(0)).check(Source::Udev), Ok(()));
        assert_eq!(
            dgram(812, 2, Some(1000)).check(Source::Udev),
            Err(Reject::Credentials)
        );
        assert_eq!(
            dgram(812, 2, None).check(Source::Udev),
            Err(Reject::Credentials)
        );
    }

    #[test]
    fn unicast_and_truncated() {
        assert_eq!(dgram(0, 0, Some(0)).check(Source::Kernel), Err(Reject::Unicast));
        let mut d = dgram(0, 1, Some(0));
        d.truncated = true;
        assert_eq!(d.check(Source::Kernel), Err(Reject::Truncated));
        d.truncated = false;
        d.sender = None;
        assert_eq!(d.check(Source::Kernel), Err(Reject::NoSender));
    }

    #[test]
    fn groups() {
        assert_eq!(Source::Kernel.group(), 1);
        assert_eq!(Source::Udev.group(), 2);
    }

    #[test]
    fn filter() {
        let usb_device = FakeDevice::new(&[("SUBSYSTEM", "usb"), ("DEVTYPE", "usb_device")], &[]);
        let block = FakeDevice::new(&[("SUBSYSTEM", "block"), ("DEVTYPE", "disk")], &[]);
        let interface = FakeDevice::new(&[("SUBSYSTEM", "usb"), ("DEVTYPE", "usb_interface")], &[]);

        let all = Filter::default();
        assert!(all.matches(&block));

        let usb = Filter {
            subsystem: Some("usb".into()),
            devtype: None,
        };
        assert!(usb.matches(&usb_device));
        assert!(usb.matches(&interface));
        assert!(!usb.matches(&block));

        let devices = Filter {
            subsystem: Some("usb".into()),
            devtype: Some("usb_device".into()),
        };
        assert!(devices.matches(&usb_device));
        assert!(!devices.matches(&interface));
    }

    #[test]
    fn names() {
        assert!(valid_name("usb"));
        assert!(!valid_name(""));
        assert!(!valid_name("usb/devices"));
        assert!(!valid_name("us\0b"));
    }
}
