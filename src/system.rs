//! This module provides ways to get information about a running Linux system
use crate::{error::ContextError, util::SYSFS_PATH};
use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
};

pub mod devices;
pub mod monitor;
pub mod record;

/// Device [`uevent`][1] actions.
///
/// [1]: https://www.kernel.org/doc/Documentation/ABI/testing/sysfs-uevent
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Action {
    Add,
    Remove,
    Change,
    Bind,
    Unbind,

    /// Synthesized for devices seen during enumeration, which have no live
    /// action.
    Exists,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Add => "add",
            Action::Remove => "remove",
            Action::Change => "change",
            Action::Bind => "bind",
            Action::Unbind => "unbind",
            Action::Exists => "exists",
        }
    }

    /// Whether this action can come from a live event.
    pub fn is_live(&self) -> bool {
        !matches!(self, Action::Exists)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Unknown or non-live action string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownAction(pub String);

impl FromStr for Action {
    type Err = UnknownAction;

    /// Parse a live action. `exists` is never sent by the kernel, so it is
    /// rejected here along with `move`, `online` and friends.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "add" => Action::Add,
            "remove" => Action::Remove,
            "change" => Action::Change,
            "bind" => Action::Bind,
            "unbind" => Action::Unbind,
            s => return Err(UnknownAction(s.into())),
        })
    }
}

/// Where a device description came from.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Origin {
    /// Startup enumeration of sysfs
    Snapshot,

    /// Raw kernel uevent
    Kernel,

    /// Event rebroadcast by the udev daemon
    Udev,
}

impl Origin {
    /// Short label used in verbose output.
    pub fn label(&self) -> &'static str {
        match self {
            Origin::Snapshot => "SYSFS",
            Origin::Kernel => "KERNEL",
            Origin::Udev => "UDEV",
        }
    }
}

/// Top level device context.
///
/// Everything else reads devices relative to the sysfs mount this was
/// created with.
#[derive(Debug, Clone)]
pub struct Context {
    sysfs: PathBuf,
}

impl Context {
    /// Create a context for the system sysfs at [`SYSFS_PATH`]
    ///
    /// # Errors
    ///
    /// - If sysfs isn't mounted
    pub fn new() -> Result<Self, ContextError> {
        Self::with_sysfs(SYSFS_PATH)
    }

    /// Create a context for a sysfs mounted at `sysfs`
    ///
    /// # Errors
    ///
    /// - If `sysfs` has no `devices` directory
    pub fn with_sysfs<P: AsRef<Path>>(sysfs: P) -> Result<Self, ContextError> {
        let sysfs = sysfs.as_ref().to_path_buf();
        if !sysfs.join("devices").is_dir() {
            return Err(ContextError::NoSysfs(sysfs));
        }
        Ok(Self { sysfs })
    }

    /// The sysfs mount point
    pub fn sysfs(&self) -> &Path {
        &self.sysfs
    }

    /// Full sysfs path of `devpath`
    pub fn device_path(&self, devpath: &str) -> PathBuf {
        self.sysfs.join(devpath.trim_start_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_actions_parse() {
        for (s, a) in [
            ("add", Action::Add),
            ("remove", Action::Remove),
            ("change", Action::Change),
            ("bind", Action::Bind),
            ("unbind", Action::Unbind),
        ] {
            assert_eq!(s.parse::<Action>(), Ok(a));
            assert_eq!(a.to_string(), s);
            assert!(a.is_live());
        }
    }

    #[test]
    fn exists_is_never_parsed() {
        assert_eq!(
            "exists".parse::<Action>(),
            Err(UnknownAction("exists".into()))
        );
        assert!("move".parse::<Action>().is_err());
        assert!(!Action::Exists.is_live());
    }

    #[test]
    fn action_pads() {
        assert_eq!(format!("{:8}|", Action::Add), "add     |");
    }

    #[test]
    fn context_requires_devices_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Context::with_sysfs(dir.path()),
            Err(ContextError::NoSysfs(_))
        ));
        std::fs::create_dir(dir.path().join("devices")).unwrap();
        let ctx = Context::with_sysfs(dir.path()).unwrap();
        assert_eq!(
            ctx.device_path("/devices/usb1"),
            dir.path().join("devices/usb1")
        );
    }
}
