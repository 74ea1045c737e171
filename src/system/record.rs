//! The attributes reported for every device.
use crate::{
    system::{devices::Device, Action, Origin},
    util,
};
use std::{collections::BTreeMap, time::Duration};

/// Reported when a device has no vendor or product id.
pub const UNKNOWN_ID: &str = "0000";

/// Reported when a device has no device node.
pub const NO_DEVNODE: &str = "---";

/// A point-in-time description of one device.
///
/// Built either from a device found during enumeration, or from one live
/// event, and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    subsystem: String,
    devtype: String,
    action: Action,
    devnum: String,
    busnum: String,
    vendor_id: String,
    product_id: String,
    manufacturer: String,
    devnode: String,

    devpath: String,
    origin: Origin,
    properties: BTreeMap<String, String>,
    timestamp: Duration,
}

impl DeviceRecord {
    /// Read every reported attribute of `dev`.
    ///
    /// This never fails, missing attributes get their documented default:
    ///
    /// - `devnum`, `busnum`, `manufacturer`, `devtype`: empty
    /// - `vendor_id`, `product_id`: [`UNKNOWN_ID`]
    /// - `devnode`: [`NO_DEVNODE`]
    /// - `action`: [`Action::Exists`]
    pub fn read<D: Device + ?Sized>(dev: &D) -> Self {
        Self {
            subsystem: dev.subsystem().unwrap_or_default().to_owned(),
            devtype: dev.devtype().unwrap_or_default().to_owned(),
            action: dev.action().unwrap_or(Action::Exists),
            devnum: dev.sysattr("devnum").unwrap_or_default(),
            busnum: dev.sysattr("busnum").unwrap_or_default(),
            vendor_id: non_empty(dev.sysattr("idVendor")).unwrap_or_else(|| UNKNOWN_ID.into()),
            product_id: non_empty(dev.sysattr("idProduct")).unwrap_or_else(|| UNKNOWN_ID.into()),
            manufacturer: dev.sysattr("manufacturer").unwrap_or_default(),
            devnode: dev.devnode().unwrap_or_else(|| NO_DEVNODE.into()),
            devpath: dev.devpath().to_owned(),
            origin: dev.origin(),
            properties: dev.properties().clone(),
            timestamp: util::monotonic(),
        }
    }

    /// Kernel subsystem, e.g. `usb`
    pub fn subsystem(&self) -> &str {
        &self.subsystem
    }

    /// Device type, e.g. `usb_device`. May be empty.
    pub fn devtype(&self) -> &str {
        &self.devtype
    }

    pub fn action(&self) -> Action {
        self.action
    }

    /// Device number on its bus, as reported. Empty if unknown.
    pub fn devnum(&self) -> &str {
        &self.devnum
    }

    /// Bus number, as reported. Empty if unknown.
    pub fn busnum(&self) -> &str {
        &self.busnum
    }

    /// Hex vendor id, or [`UNKNOWN_ID`]
    pub fn vendor_id(&self) -> &str {
        &self.vendor_id
    }

    /// Hex product id, or [`UNKNOWN_ID`]
    pub fn product_id(&self) -> &str {
        &self.product_id
    }

    pub fn manufacturer(&self) -> &str {
        &self.manufacturer
    }

    /// Device node path, or [`NO_DEVNODE`]
    pub fn devnode(&self) -> &str {
        &self.devnode
    }

    pub fn devpath(&self) -> &str {
        &self.devpath
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// All `uevent` properties of the device when it was read
    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    /// Monotonic time the record was built at
    pub fn timestamp(&self) -> Duration {
        self.timestamp
    }
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.is_empty())
}
