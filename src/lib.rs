//! Watch Linux devices come and go
//!
//! Lists the devices of a subsystem that already exist, then reports them
//! as they are added, removed, or changed, using kernel `uevent`s.
//!
//! # Implementation details
//!
//! Existing devices are found through `/sys`, so this library requires it to
//! be mounted. Device events are received over a `NETLINK_KOBJECT_UEVENT`
//! socket, waited on with `epoll(7)`.
//!
//! Much of the sysfs layout and the udev wire format are undocumented, and
//! may change between kernel or udev versions.
//! This crate follows what current kernels and udev do, on a best effort
//! basis.
#![doc(html_root_url = "https://docs.rs/usb-mon/1.0.0")]

pub mod dispatch;
pub mod epoll;
pub mod error;
pub mod lifecycle;
pub mod output;
pub mod system;
pub mod util;
