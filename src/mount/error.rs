//! Errors raised by devices and mountpoints.

use thiserror::Error;

use crate::exec::ExecError;
use crate::host::HostError;

/// Precondition violations and command failures of the mount layer.
///
/// Every precondition variant is raised before any command with a side
/// effect has been issued.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum MountError {
    /// Raised when the device file is missing on its host.
    #[error("device {uuid} is not available on {host}")]
    NotAvailable {
        /// Filesystem UUID of the device.
        uuid: String,
        /// Host the device was expected on.
        host: String,
    },
    /// Raised when the device is already mounted through this handle.
    #[error("device {uuid} is already mounted")]
    AlreadyMounted {
        /// Filesystem UUID of the device.
        uuid: String,
    },
    /// Raised when a mountpoint is active, or an unmount reports the target
    /// as busy.
    #[error("mountpoint {path} on {host} is busy")]
    TargetBusy {
        /// Host of the mountpoint.
        host: String,
        /// Path of the mountpoint.
        path: String,
    },
    /// Raised when a mountpoint still contains entries.
    #[error("mountpoint {path} on {host} is not empty")]
    TargetNotEmpty {
        /// Host of the mountpoint.
        host: String,
        /// Path of the mountpoint.
        path: String,
    },
    /// Raised when a mountpoint does not exist and may not be created.
    #[error("mountpoint {path} on {host} does not exist")]
    TargetMissing {
        /// Host of the mountpoint.
        host: String,
        /// Path of the mountpoint.
        path: String,
    },
    /// Raised when unmounting a device that is not mounted.
    #[error("device {uuid} is not mounted")]
    NotMounted {
        /// Filesystem UUID of the device.
        uuid: String,
    },
    /// Raised when an operation needs an active mountpoint.
    #[error("mountpoint {path} on {host} is not active")]
    NotActive {
        /// Host of the mountpoint.
        host: String,
        /// Path of the mountpoint.
        path: String,
    },
    /// Raised when the device and the mountpoint sit on two different
    /// remote hosts.
    #[error("cannot bridge device on {device_host} to mountpoint on {mount_host}")]
    UnsupportedHostPair {
        /// Host of the device.
        device_host: String,
        /// Host of the mountpoint.
        mount_host: String,
    },
    /// Raised when binding mountpoints that live on different hosts.
    #[error("cannot bind {source_host} onto {target_host}")]
    HostMismatch {
        /// Host of the bound mountpoint.
        source_host: String,
        /// Host of the binding target.
        target_host: String,
    },
    /// Raised when a local device must be bridged to a remote mountpoint but
    /// no externally reachable address for this machine is configured.
    #[error("bridging device {uuid} to {mount_host} requires a bridge address")]
    MissingBridgeAddress {
        /// Filesystem UUID of the device.
        uuid: String,
        /// Host of the remote mountpoint.
        mount_host: String,
    },
    /// Raised when a mountpoint path is not absolute.
    #[error("mountpoint path {path} is not absolute")]
    RelativePath {
        /// Offending path.
        path: String,
    },
    /// Raised when a mount family command exits non-zero.
    #[error("`{command}` on {host} failed with status {exit_code}: {stderr}")]
    CommandFailed {
        /// Host the command ran on.
        host: String,
        /// Command line that failed.
        command: String,
        /// Exit code it reported.
        exit_code: i32,
        /// Standard error it produced.
        stderr: String,
    },
    /// Wraps address lookups that are impossible for a host.
    #[error(transparent)]
    Host(#[from] HostError),
    /// Wraps dispatch failures and failed helper commands.
    #[error(transparent)]
    Exec(#[from] ExecError),
}
