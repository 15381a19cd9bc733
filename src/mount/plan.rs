//! Decides how a device reaches a mountpoint on a possibly different host.

use crate::host::Host;

/// Strategy for mounting a device onto a mountpoint.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MountPlan {
    /// Device and mountpoint share a host; mount directly.
    Direct,
    /// The device is remote and the mountpoint local: mount the device in a
    /// temporary directory on its host, then bridge that directory here.
    BridgeViaRemoteTemp,
    /// The device is local and the mountpoint remote: mount the device in a
    /// temporary directory here, then bridge it onto the remote host.
    BridgeViaLocalTemp,
    /// Two different remote hosts; not supported.
    Unsupported,
}

impl MountPlan {
    /// Chooses the plan for a device on `device_host` and a mountpoint on
    /// `mount_host`.
    #[must_use]
    pub fn for_hosts(device_host: &Host, mount_host: &Host) -> Self {
        if device_host == mount_host {
            Self::Direct
        } else if mount_host.is_local() {
            Self::BridgeViaRemoteTemp
        } else if device_host.is_local() {
            Self::BridgeViaLocalTemp
        } else {
            Self::Unsupported
        }
    }

    /// Returns `true` when the plan needs a temporary mountpoint.
    #[must_use]
    pub const fn is_bridge(self) -> bool {
        matches!(self, Self::BridgeViaRemoteTemp | Self::BridgeViaLocalTemp)
    }
}
