//! Devices and mountpoints on any host.
//!
//! A [`Device`] is a block device identified by its filesystem UUID; a
//! [`Mountpoint`] is a directory on some host. Mounting one onto the other
//! works for every host pair that involves this machine: devices and
//! mountpoints on different hosts are joined through an `sshfs` bridge over
//! a temporary mountpoint next to the device (see [`MountPlan`]).
//!
//! All commands go through an [`Executor`](crate::exec::Executor), so the
//! same code drives local and remote hosts.

use std::str::FromStr;

use camino::Utf8PathBuf;

use crate::host::Host;

mod device;
mod error;
mod mountpoint;
mod plan;
pub mod table;

pub use device::{Device, DeviceBuilder};
pub use error::MountError;
pub use mountpoint::{Mountpoint, MountpointBuilder};
pub use plan::MountPlan;

/// Default parent directory of temporary bridge mountpoints.
pub const DEFAULT_BRIDGE_ROOT: &str = "/tmp/autobackup/bridge";

/// Where [`Mountpoint::is_active`] reads the mount table from.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum MountTableSource {
    /// Output of `mount` without arguments.
    #[default]
    MountCommand,
    /// Contents of `/proc/mounts`.
    ProcMounts,
}

impl MountTableSource {
    /// Returns the configuration spelling of this source.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MountCommand => "mount",
            Self::ProcMounts => "proc",
        }
    }
}

impl FromStr for MountTableSource {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "mount" => Ok(Self::MountCommand),
            "proc" => Ok(Self::ProcMounts),
            other => Err(format!("unknown mount table source {other}")),
        }
    }
}

/// Commands and locations the mount layer relies on.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MountSettings {
    /// Bridge client executable.
    pub sshfs_bin: String,
    /// Bridge teardown executable, invoked as `<bin> -u <path>`.
    pub fusermount_bin: String,
    /// Parent directory of temporary bridge mountpoints.
    pub bridge_root: Utf8PathBuf,
    /// Address remote hosts use to reach this machine. Required to bridge a
    /// local device onto a remote mountpoint.
    pub bridge_address: Option<Host>,
    /// Mount table consulted by [`Mountpoint::is_active`].
    pub mount_table: MountTableSource,
}

impl Default for MountSettings {
    fn default() -> Self {
        Self {
            sshfs_bin: String::from("sshfs"),
            fusermount_bin: String::from("fusermount"),
            bridge_root: Utf8PathBuf::from(DEFAULT_BRIDGE_ROOT),
            bridge_address: None,
            mount_table: MountTableSource::default(),
        }
    }
}

#[cfg(test)]
mod tests;
