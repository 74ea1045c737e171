//! Human readable device reports
//!
//! One line per device, in fixed width columns:
//!
//! ```text
//! SUBSYSTEM    TYPE            ACTION   DEV  BUS  VID:PID      MANUFACTURER                             PATH
//! usb          usb_device      exists   1    1    1d6b:0002    Linux Foundation                         /dev/bus/usb/001/001
//! ```
//!
//! Nothing is escaped. Device supplied strings such as the manufacturer are
//! printed as-is, control characters included.
use crate::system::record::DeviceRecord;
use std::fmt::Write as _;

/// How to print [`DeviceRecord`]s
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Format {
    /// Dump every property instead of a single summary line
    pub verbose: bool,
}

impl Format {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    /// Column header, matching [`Format::line`]
    pub fn header(&self) -> String {
        format!(
            "{:12} {:15} {:8} {:4} {:4} {:12} {:40} {:30}",
            "SUBSYSTEM", "TYPE", "ACTION", "DEV", "BUS", "VID:PID", "MANUFACTURER", "PATH"
        )
    }

    /// One line summary of `rec`, without a trailing newline
    pub fn line(&self, rec: &DeviceRecord) -> String {
        format!(
            "{:12} {:15} {:8} {:4} {:4} {:4}:{:7} {:40} {:30}",
            rec.subsystem(),
            rec.devtype(),
            rec.action(),
            rec.devnum(),
            rec.busnum(),
            rec.vendor_id(),
            rec.product_id(),
            rec.manufacturer(),
            rec.devnode()
        )
    }

    /// Full property dump of `rec`, ending in a blank line.
    ///
    /// ```text
    /// UDEV  [4211.031597] add      /devices/pci0000:00/0000:00:14.0/usb1/1-1 (usb)
    /// ACTION=add
    /// ...
    /// ```
    pub fn dump(&self, rec: &DeviceRecord) -> String {
        let ts = rec.timestamp();
        let mut out = format!(
            "{:<6}[{}.{:06}] {:8} {} ({})\n",
            rec.origin().label(),
            ts.as_secs(),
            ts.subsec_micros(),
            rec.action(),
            rec.devpath(),
            rec.subsystem()
        );
        for (key, value) in rec.properties() {
            // Writing to a String can't fail
            let _ = writeln!(out, "{}={}", key, value);
        }
        out.push('\n');
        out
    }

    /// Render `rec` per this format, always newline terminated
    pub fn render(&self, rec: &DeviceRecord) -> String {
        if self.verbose {
            self.dump(rec)
        } else {
            let mut line = self.line(rec);
            line.push('\n');
            line
        }
    }
}

/// Startup banner lines
pub fn banner(name: &str, version: &str, pid: i32, started: &str) -> String {
    format!(
        "Name     : {}\nVersion  : {}\nPID:     : {}\nStarted  : {}\n",
        name, version, pid, started
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::{record::tests::FakeDevice, Action};
    use proptest::prelude::*;

    fn root_hub() -> FakeDevice {
        FakeDevice::new(
            &[
                ("SUBSYSTEM", "usb"),
                ("DEVTYPE", "usb_device"),
                ("DEVNAME", "bus/usb/001/001"),
            ],
            &[
                ("idVendor", "1d6b"),
                ("idProduct", "0002"),
                ("devnum", "1"),
                ("busnum", "1"),
                ("manufacturer", "Linux Foundation"),
            ],
        )
    }

    #[test]
    fn header() {
        assert_eq!(
            Format::default().header(),
            "SUBSYSTEM    TYPE            ACTION   DEV  BUS  VID:PID      MANUFACTURER                             PATH                          "
        );
    }

    #[test]
    fn snapshot_line() {
        let rec = DeviceRecord::read(&root_hub());
        assert_eq!(
            Format::default().line(&rec),
            "usb          usb_device      exists   1    1    1d6b:0002    Linux Foundation                         /dev/bus/usb/001/001          "
        );
    }

    #[test]
    fn header_and_line_align() {
        let f = Format::default();
        let rec = DeviceRecord::read(&root_hub());
        assert_eq!(f.header().len(), f.line(&rec).len());
    }

    #[test]
    fn add_without_manufacturer() {
        let mut dev = FakeDevice::new(
            &[
                ("SUBSYSTEM", "usb"),
                ("DEVTYPE", "usb_device"),
                ("DEVNAME", "/dev/bus/usb/001/005"),
            ],
            &[("idVendor", "0781"), ("idProduct", "5583")],
        );
        dev.action = Some(Action::Add);
        let line = Format::default().line(&DeviceRecord::read(&dev));
        assert_eq!(
            line,
            format!(
                "{:12} {:15} {:8} {:4} {:4} 0781:5583    {:40} {:30}",
                "usb", "usb_device", "add", "", "", "", "/dev/bus/usb/001/005"
            )
        );
    }

    #[test]
    fn control_characters_pass_through() {
        let mut dev = root_hub();
        dev.attrs.insert("manufacturer".into(), "Evil\x1b[2JCorp".into());
        let line = Format::default().line(&DeviceRecord::read(&dev));
        assert!(line.contains("Evil\x1b[2JCorp"));
    }

    #[test]
    fn verbose_dump() {
        let mut dev = root_hub();
        dev.devpath = "/devices/pci0000:00/usb1".into();
        let rec = DeviceRecord::read(&dev);
        let out = Format::new(true).render(&rec);
        let mut lines = out.lines();
        let first = lines.next().unwrap();
        assert!(first.starts_with("SYSFS ["), "{}", first);
        assert!(first.ends_with("exists   /devices/pci0000:00/usb1 (usb)"), "{}", first);
        assert_eq!(lines.next(), Some("DEVNAME=bus/usb/001/001"));
        assert_eq!(lines.next(), Some("DEVTYPE=usb_device"));
        assert_eq!(lines.next(), Some("SUBSYSTEM=usb"));
        assert_eq!(lines.next(), Some(""));
        assert!(out.ends_with("\n\n"));
    }

    #[test]
    fn summary_render_is_one_line() {
        let rec = DeviceRecord::read(&root_hub());
        let out = Format::new(false).render(&rec);
        assert_eq!(out.matches('\n').count(), 1);
        assert!(out.ends_with('\n'));
    }

    #[test]
    fn banner_lines() {
        let b = banner("usb-mon", "1.0.0", 42, "2026-10-18 12:00:00");
        assert_eq!(
            b,
            "Name     : usb-mon\nVersion  : 1.0.0\nPID:     : 42\nStarted  : 2026-10-18 12:00:00\n"
        );
    }

    fn id() -> impl Strategy<Value = Option<String>> {
        prop::option::of("[0-9a-f]{0,4}")
    }

    proptest! {
        #[test]
        fn formatting_is_idempotent(
            verbose in any::<bool>(),
            vendor in id(),
            product in id(),
            manufacturer in ".{0,60}"
        ) {
            let mut dev = root_hub();
            dev.attrs.remove("idVendor");
            dev.attrs.remove("idProduct");
            if let Some(v) = vendor {
                dev.attrs.insert("idVendor".into(), v);
            }
            if let Some(p) = product {
                dev.attrs.insert("idProduct".into(), p);
            }
            dev.attrs.insert("manufacturer".into(), manufacturer);
            let rec = DeviceRecord::read(&dev);
            let f = Format::new(verbose);
            prop_assert_eq!(f.render(&rec), f.render(&rec));
        }

        #[test]
        fn ids_are_never_empty(vendor in id(), product in id()) {
            let mut dev = root_hub();
            dev.attrs.remove("idVendor");
            dev.attrs.remove("idProduct");
            if let Some(v) = vendor {
                dev.attrs.insert("idVendor".into(), v);
            }
            if let Some(p) = product {
                dev.attrs.insert("idProduct".into(), p);
            }
            let rec = DeviceRecord::read(&dev);
            prop_assert!(!rec.vendor_id().is_empty());
            prop_assert!(!rec.product_id().is_empty());
        }
    }
}
