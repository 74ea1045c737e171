//! Utility functions
use nix::time::{clock_gettime, ClockId};
use std::{collections::BTreeMap, fs, io, path::Path, time::Duration};

/// Where sysfs is normally mounted.
///
/// Everything takes the mount point from a [`Context`][crate::system::Context]
/// instead, so tests can point it at a fake tree.
pub const SYSFS_PATH: &str = "/sys";

/// Device file location. Same reasons as [`SYSFS_PATH`].
pub const DEV_PATH: &str = "/dev";

/// Exists while the udev daemon is running.
pub const UDEV_CONTROL_PATH: &str = "/run/udev/control";

/// Read a uevent file
///
/// Lines are `KEY=VALUE`. Values may themselves contain `=`, lines without
/// one are ignored.
///
/// # Arguments
///
/// - `path`, path to the uevent file.
pub fn read_uevent(path: &Path) -> io::Result<BTreeMap<String, String>> {
    let mut map = BTreeMap::new();
    for line in fs::read_to_string(path)?.split_terminator('\n') {
        if let Some((key, val)) = line.split_once('=') {
            map.insert(key.into(), val.into());
        }
    }
    Ok(map)
}

/// Read a single sysfs attribute, with trailing whitespace removed.
///
/// Attributes like `manufacturer` come straight from the device and are not
/// guaranteed to be UTF-8, so invalid sequences are replaced.
pub fn read_attr(path: &Path) -> io::Result<String> {
    let raw = fs::read(path)?;
    Ok(String::from_utf8_lossy(&raw).trim_end().to_owned())
}

/// Resolve a `DEVNAME` property into a device node path.
///
/// The kernel reports names relative to [`DEV_PATH`], udev reports them
/// absolute.
pub fn devnode(devname: &str) -> String {
    if devname.starts_with('/') {
        devname.to_owned()
    } else {
        format!("{}/{}", DEV_PATH, devname)
    }
}

/// Time since boot. Zero if the clock can't be read.
pub fn monotonic() -> Duration {
    clock_gettime(ClockId::CLOCK_MONOTONIC)
        .map(|ts| Duration::new(ts.tv_sec() as u64, ts.tv_nsec() as u32))
        .unwrap_or_default()
}

/// Current local wall clock time as `YYYY-MM-DD HH:MM:SS`.
pub fn local_timestamp() -> String {
    // SAFETY: time(NULL) only reads the clock.
    let now = unsafe { libc::time(std::ptr::null_mut()) };
    // SAFETY: all-zero is a valid `tm`.
    let mut tm: libc::tm = unsafe { std::mem::zeroed() };
    // SAFETY: both pointers are valid for the duration of the call and
    // localtime_r is the reentrant variant.
    if unsafe { libc::localtime_r(&now, &mut tm) }.is_null() {
        return now.to_string();
    }
    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
        tm.tm_year + 1900,
        tm.tm_mon + 1,
        tm.tm_mday,
        tm.tm_hour,
        tm.tm_min,
        tm.tm_sec
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

    #[test]
    fn uevent_file() -> Result<()> {
        let mut f = tempfile::NamedTempFile::new()?;
        write!(
            f,
            "MAJOR=189\nMINOR=1\nDEVNAME=bus/usb/001/002\nDEVTYPE=usb_device\nPRODUCT=1d6b/2/515\nWEIRD=a=b\nnonsense\n"
        )?;
        let map = read_uevent(f.path())?;
        assert_eq!(map["DEVNAME"], "bus/usb/001/002");
        assert_eq!(map["WEIRD"], "a=b");
        assert_eq!(map.len(), 6);
        Ok(())
    }

    #[test]
    fn missing_uevent_is_an_error() {
        assert!(read_uevent(Path::new("/nonexistent/uevent")).is_err());
    }

    #[test]
    fn attr_trims_newline() -> Result<()> {
        let mut f = tempfile::NamedTempFile::new()?;
        f.write_all(b"Linux Foundation\n")?;
        assert_eq!(read_attr(f.path())?, "Linux Foundation");
        Ok(())
    }

    #[test]
    fn devnode_prefix() {
        assert_eq!(devnode("bus/usb/001/002"), "/dev/bus/usb/001/002");
        assert_eq!(devnode("/dev/bus/usb/001/002"), "/dev/bus/usb/001/002");
    }

    #[test]
    fn timestamp_shape() {
        let ts = local_timestamp();
        assert_eq!(ts.len(), 19, "{}", ts);
        assert_eq!(&ts[4..5], "-");
        assert_eq!(&ts[10..11], " ");
    }
}
