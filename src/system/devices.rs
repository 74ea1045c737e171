//! Interface to devices on linux
//!
//! Linux primarily exposes connected devices through sysfs,
//! most of those interfaces undocumented.
//!
//! See the [sysfs rules][1] and [sysfs-devices][2] file for details
//!
//! [1]: https://www.kernel.org/doc/html/latest/admin-guide/sysfs-rules.html
//! [2]: https://www.kernel.org/doc/Documentation/ABI/stable/sysfs-devices
use crate::{
    error::EnumerateError,
    system::{record::DeviceRecord, Action, Context, Origin},
    util::{self, read_uevent},
};
use std::{
    collections::{BTreeMap, HashSet},
    io,
    path::{Path, PathBuf},
    vec,
};
use tracing::debug;
use walkdir::WalkDir;

pub type Result<T, E = EnumerateError> = std::result::Result<T, E>;

/// A kernel "Device"
///
/// Exposes the lower level information underlying every kernel device,
/// whether it was found in sysfs or described by an event.
pub trait Device {
    /// Full path to the device
    ///
    /// # Example
    ///
    /// `/sys/devices/pci0000:00/0000:00:14.0/usb1/1-1`
    fn path(&self) -> &Path;

    /// Unique key identifying the device under sysfs.
    ///
    /// Always starts with a `/`.
    ///
    /// # Example
    ///
    /// `/devices/pci0000:00/0000:00:14.0/usb1/1-1`
    fn devpath(&self) -> &str;

    /// A `uevent` property, such as `DEVNAME` or `DEVTYPE`
    fn property(&self, key: &str) -> Option<&str>;

    /// Every `uevent` property, sorted by key
    fn properties(&self) -> &BTreeMap<String, String>;

    /// Where this description came from
    fn origin(&self) -> Origin;

    /// Live action, [`None`] for devices that were merely found.
    fn action(&self) -> Option<Action> {
        None
    }

    /// Kernel subsystem
    ///
    /// # Example
    ///
    /// `usb`
    fn subsystem(&self) -> Option<&str> {
        self.property("SUBSYSTEM")
    }

    /// Device type within the subsystem
    ///
    /// # Example
    ///
    /// `usb_device`, `usb_interface`
    fn devtype(&self) -> Option<&str> {
        self.property("DEVTYPE")
    }

    /// Path to the device node, if the device has one.
    ///
    /// # Example
    ///
    /// `/dev/bus/usb/001/002`
    fn devnode(&self) -> Option<String> {
        self.property("DEVNAME").map(util::devnode)
    }

    /// Read a sysfs attribute of this device, such as `idVendor`.
    ///
    /// Returns [`None`] if the attribute doesn't exist or can't be read,
    /// which includes every attribute of a device that was just removed.
    fn sysattr(&self, name: &str) -> Option<String> {
        if name.contains('/') {
            return None;
        }
        util::read_attr(&self.path().join(name)).ok()
    }
}

/// A device found in sysfs
#[derive(Debug, Clone)]
pub struct GenericDevice {
    path: PathBuf,
    devpath: String,
    properties: BTreeMap<String, String>,
}

impl GenericDevice {
    /// Open the device at `path`, which must be under the sysfs of `ctx`.
    ///
    /// The `uevent` file is read once, here.
    ///
    /// # Errors
    ///
    /// - If `path` is not a device under sysfs
    /// - If the `uevent` file couldn't be read
    pub fn new<P: AsRef<Path>>(ctx: &Context, path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let devpath = path
            .strip_prefix(ctx.sysfs())
            .ok()
            .and_then(|p| p.to_str())
            .map(|p| format!("/{}", p))
            .ok_or(io::ErrorKind::InvalidInput)?;
        if !devpath.starts_with("/devices/") {
            return Err(io::ErrorKind::InvalidInput.into());
        }
        let mut properties = read_uevent(&path.join("uevent"))?;
        if let Some(subsystem) = subsystem_of(&path) {
            properties.insert("SUBSYSTEM".into(), subsystem);
        }
        properties.insert("DEVPATH".into(), devpath.clone());
        Ok(Self {
            path,
            devpath,
            properties,
        })
    }
}

impl Device for GenericDevice {
    fn path(&self) -> &Path {
        &self.path
    }

    fn devpath(&self) -> &str {
        &self.devpath
    }

    fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    fn origin(&self) -> Origin {
        Origin::Snapshot
    }
}

/// The `subsystem` link of a sysfs device directory
fn subsystem_of(path: &Path) -> Option<String> {
    path.join("subsystem")
        .read_link()
        .ok()?
        .file_name()?
        .to_str()
        .map(ToOwned::to_owned)
}

/// Lazily enumerate the devices of one subsystem, as [`DeviceRecord`]s.
///
/// This is a one-shot iterator. Devices without a device node, and devices
/// that can't be read, are skipped. No particular order is guaranteed.
#[derive(Debug)]
pub struct Devices {
    ctx: Context,
    subsystem: String,
    devtype: Option<String>,
    dirs: vec::IntoIter<PathBuf>,
    current: Option<walkdir::IntoIter>,
    seen: HashSet<PathBuf>,
}

impl Devices {
    /// Start enumerating `subsystem` devices
    ///
    /// # Errors
    ///
    /// - If `subsystem` isn't a valid subsystem name
    pub fn scan(ctx: &Context, subsystem: &str) -> Result<Self> {
        if subsystem.is_empty() || subsystem.contains('/') || subsystem.contains('\0') {
            return Err(EnumerateError::InvalidSubsystem(subsystem.into()));
        }
        let sysfs = ctx.sysfs();
        let dirs = if sysfs.join("subsystem").exists() {
            vec![sysfs.join("subsystem").join(subsystem).join("devices")]
        } else {
            vec![
                sysfs.join("bus").join(subsystem).join("devices"),
                sysfs.join("class").join(subsystem),
            ]
        };
        Ok(Self {
            ctx: ctx.clone(),
            subsystem: subsystem.into(),
            devtype: None,
            dirs: dirs.into_iter(),
            current: None,
            seen: HashSet::new(),
        })
    }

    /// Only yield devices of this `DEVTYPE`
    pub fn match_devtype(mut self, devtype: Option<String>) -> Self {
        self.devtype = devtype;
        self
    }

    /// Resolve a subsystem directory entry to its canonical device path.
    ///
    /// This dance around paths is required because Path::canonicalize will
    /// error if, say, permissions aren't right.
    fn resolve(&self, link: &Path) -> io::Result<PathBuf> {
        let target = link.read_link()?;
        let mut c = target.components();
        for p in c.by_ref() {
            if p.as_os_str() == "devices" {
                break;
            }
        }
        Ok(self.ctx.sysfs().join("devices").join(c.as_path()))
    }

    fn next_entry(&mut self) -> Option<PathBuf> {
        loop {
            if let Some(iter) = &mut self.current {
                match iter.next() {
                    Some(Ok(entry)) => return Some(entry.into_path()),
                    Some(Err(e)) => {
                        debug!("skipping unreadable entry: {}", e);
                        continue;
                    }
                    None => self.current = None,
                }
            }
            let dir = self.dirs.next()?;
            if dir.exists() {
                self.current = Some(WalkDir::new(dir).min_depth(1).max_depth(1).into_iter());
            }
        }
    }

    fn open(&self, link: &Path) -> io::Result<GenericDevice> {
        let path = self.resolve(link)?;
        GenericDevice::new(&self.ctx, path)
    }
}

impl Iterator for Devices {
    type Item = DeviceRecord;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(link) = self.next_entry() {
            let dev = match self.open(&link) {
                Ok(d) => d,
                Err(e) => {
                    debug!("skipping {}: {}", link.display(), e);
                    continue;
                }
            };
            if !self.seen.insert(dev.path().to_path_buf()) {
                continue;
            }
            if dev.subsystem() != Some(self.subsystem.as_str()) {
                continue;
            }
            if let Some(devtype) = &self.devtype {
                if dev.devtype() != Some(devtype.as_str()) {
                    continue;
                }
            }
            if dev.devnode().is_none() {
                continue;
            }
            return Some(DeviceRecord::read(&dev));
        }
        None
    }
}
