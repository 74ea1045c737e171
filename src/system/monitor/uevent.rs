//! Decoding of device event messages.
//!
//! Two framings arrive on a `NETLINK_KOBJECT_UEVENT` socket:
//!
//! - From the kernel, `action@devpath\0KEY=VALUE\0KEY=VALUE\0...`
//! - From the udev daemon, a binary header starting with `libudev\0`,
//!   followed somewhere by `KEY=VALUE\0` properties. The header magic is
//!   big-endian, its other fields are native-endian.
use crate::system::{devices::Device, Action, Origin};
use std::{
    collections::BTreeMap,
    path::{Component, Path, PathBuf},
};

/// Prefix of udev daemon messages
pub const UDEV_PREFIX: &[u8; 8] = b"libudev\0";

/// Magic following [`UDEV_PREFIX`]
pub const UDEV_MAGIC: u32 = 0xfeed_cafe;

/// Smallest valid udev header: prefix, magic, and 7 more `u32`s.
const UDEV_HEADER_MIN: usize = 40;

/// One decoded device event.
///
/// Implements [`Device`], so attributes missing from the event itself are
/// read from sysfs on demand.
#[derive(Debug, Clone)]
pub struct Event {
    action: Action,
    devpath: String,
    path: PathBuf,
    origin: Origin,
    properties: BTreeMap<String, String>,
}

impl Event {
    /// Decode a raw message of either framing.
    ///
    /// `sysfs` is where attributes of the device will be looked up.
    ///
    /// Returns [`None`] for malformed messages, and for actions that aren't
    /// one of [`Action`]'s live actions.
    pub fn decode(data: &[u8], sysfs: &Path) -> Option<Self> {
        if data.starts_with(UDEV_PREFIX) {
            Self::decode_udev(data, sysfs)
        } else {
            Self::decode_kernel(data, sysfs)
        }
    }

    /// Decode a kernel uevent, `action@devpath\0KEY=VALUE\0...`
    pub fn decode_kernel(data: &[u8], sysfs: &Path) -> Option<Self> {
        let first_null = data.iter().position(|&b| b == 0)?;
        let header = std::str::from_utf8(&data[..first_null]).ok()?;
        let (action, devpath) = header.split_once('@')?;
        let properties = parse_properties(&data[first_null + 1..]);
        // The header is authoritative, ACTION and DEVPATH normally agree.
        Self::build(action, devpath, properties, Origin::Kernel, sysfs)
    }

    /// Decode a message rebroadcast by the udev daemon.
    pub fn decode_udev(data: &[u8], sysfs: &Path) -> Option<Self> {
        if data.len() < UDEV_HEADER_MIN || !data.starts_with(UDEV_PREFIX) {
            return None;
        }
        let word = |at: usize| -> Option<[u8; 4]> { data.get(at..at + 4)?.try_into().ok() };
        if u32::from_be_bytes(word(8)?) != UDEV_MAGIC {
            return None;
        }
        let header_size = u32::from_ne_bytes(word(12)?) as usize;
        let off = u32::from_ne_bytes(word(16)?) as usize;
        let len = u32::from_ne_bytes(word(20)?) as usize;
        if header_size < UDEV_HEADER_MIN || off < header_size {
            return None;
        }
        let props = data.get(off..off.checked_add(len)?)?;
        let properties = parse_properties(props);
        let action = properties.get("ACTION")?.clone();
        let devpath = properties.get("DEVPATH")?.clone();
        Self::build(&action, &devpath, properties, Origin::Udev, sysfs)
    }

    fn build(
        action: &str,
        devpath: &str,
        mut properties: BTreeMap<String, String>,
        origin: Origin,
        sysfs: &Path,
    ) -> Option<Self> {
        // Must stay inside sysfs
        if !devpath.starts_with('/')
            || Path::new(devpath)
                .components()
                .any(|c| c == Component::ParentDir)
        {
            return None;
        }
        let action = action.parse().ok()?;
        properties.entry("DEVPATH".into()).or_insert_with(|| devpath.into());
        properties.get("SUBSYSTEM")?;
        Some(Self {
            action,
            devpath: devpath.into(),
            path: sysfs.join(devpath.trim_start_matches('/')),
            origin,
            properties,
        })
    }

    /// Kernel sequence number, if present
    pub fn seqnum(&self) -> Option<u64> {
        self.property("SEQNUM").and_then(|s| s.parse().ok())
    }
}

impl Device for Event {
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
        self.origin
    }

    fn action(&self) -> Option<Action> {
        Some(self.action)
    }
}

/// Parse `KEY=VALUE\0` pairs, skipping anything that isn't one.
fn parse_properties(data: &[u8]) -> BTreeMap<String, String> {
    data.split(|&b| b == 0)
        .filter(|kv| !kv.is_empty())
        .filter_map(|kv| std::str::from_utf8(kv).ok())
        .filter_map(|kv| kv.split_once('='))
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .collect()
}
