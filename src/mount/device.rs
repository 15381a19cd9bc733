//! Block devices and the mount orchestration across hosts.

use std::fmt;
use std::sync::Arc;

use camino::Utf8PathBuf;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use super::{MountError, MountPlan, MountSettings, Mountpoint};
use crate::exec::{Executor, ExecutorExt, FileKind, current_user};
use crate::host::Host;

const DEVICE_DIRECTORY: &str = "/dev/disk/by-uuid";
const DEFAULT_FILESYSTEM: &str = "auto";

/// What a device is currently mounted on.
#[derive(Clone, Debug)]
struct Attachment {
    mountpoint: Mountpoint,
    bridge: Option<Bridge>,
}

/// Directory next to the device that backs an `sshfs` bridge, with the legs
/// of the bridge that are still in place.
#[derive(Clone, Debug)]
struct Bridge {
    temporary: Mountpoint,
    /// `sshfs` still exposes the temporary directory on the mountpoint.
    exposed: bool,
    /// The device is still mounted on the temporary directory.
    mounted: bool,
}

/// Builder for [`Device`].
#[derive(Clone, Debug)]
pub struct DeviceBuilder {
    host: Host,
    uuid: String,
    filesystem: String,
    user: Option<String>,
    settings: Option<Arc<MountSettings>>,
}

impl DeviceBuilder {
    /// Sets the filesystem type passed with `-t`. Defaults to `auto`.
    #[must_use]
    pub fn filesystem(mut self, filesystem: impl Into<String>) -> Self {
        self.filesystem = filesystem.into();
        self
    }

    /// Sets the user commands run as. Defaults to the current user.
    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Shares mount settings with other devices and mountpoints.
    #[must_use]
    pub fn settings(mut self, settings: Arc<MountSettings>) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Binds the device to `executor`.
    ///
    /// # Errors
    ///
    /// Returns [`MountError::Exec`] when no user was set and the current one
    /// cannot be determined.
    pub fn build(self, executor: Arc<dyn Executor>) -> Result<Device, MountError> {
        let user = match self.user {
            Some(user) => user,
            None => current_user()?,
        };
        Ok(Device {
            host: self.host,
            uuid: self.uuid,
            filesystem: self.filesystem,
            user,
            executor,
            settings: self.settings.unwrap_or_default(),
            attachment: Mutex::new(None),
        })
    }
}

/// A block device on a host, identified by its filesystem UUID.
///
/// The device remembers where it was mounted so [`Device::unmount`] can
/// undo exactly what [`Device::mount`] did, bridge included. Mount and
/// unmount hold that state for their whole duration, so concurrent callers
/// are serialised.
pub struct Device {
    host: Host,
    uuid: String,
    filesystem: String,
    user: String,
    executor: Arc<dyn Executor>,
    settings: Arc<MountSettings>,
    attachment: Mutex<Option<Attachment>>,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("host", &self.host)
            .field("uuid", &self.uuid)
            .field("filesystem", &self.filesystem)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

impl Device {
    /// Starts a builder for the device with `uuid` on `host`.
    #[must_use]
    pub fn builder(host: Host, uuid: impl Into<String>) -> DeviceBuilder {
        DeviceBuilder {
            host,
            uuid: uuid.into().trim().to_owned(),
            filesystem: DEFAULT_FILESYSTEM.to_owned(),
            user: None,
            settings: None,
        }
    }

    /// Returns the host the device is attached to.
    #[must_use]
    pub const fn host(&self) -> &Host {
        &self.host
    }

    /// Returns the filesystem UUID.
    #[must_use]
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Returns the filesystem type used when mounting.
    #[must_use]
    pub fn filesystem(&self) -> &str {
        &self.filesystem
    }

    /// Returns the device file, `/dev/disk/by-uuid/<uuid>`.
    #[must_use]
    pub fn device_file_path(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(DEVICE_DIRECTORY).join(&self.uuid)
    }

    /// Returns `true` when the device file exists as a block device.
    ///
    /// # Errors
    ///
    /// Propagates dispatch failures.
    pub async fn is_available(&self) -> Result<bool, MountError> {
        let path = self.device_file_path();
        Ok(self
            .executor
            .file_exists(&self.host, &self.user, path.as_str(), FileKind::BlockSpecial)
            .await?)
    }

    /// Returns `true` while the device is mounted through this handle.
    pub async fn is_mounted(&self) -> bool {
        self.attachment.lock().await.is_some()
    }

    /// Returns the mountpoint the device is mounted on, if any.
    pub async fn mountpoint(&self) -> Option<Mountpoint> {
        self.attachment
            .lock()
            .await
            .as_ref()
            .map(|attached| attached.mountpoint.clone())
    }

    /// Mounts the device on `mountpoint`, bridging between hosts when they
    /// differ.
    ///
    /// Every precondition is checked before the first command with a side
    /// effect. A missing mountpoint directory is created only when the
    /// mountpoint allows it.
    ///
    /// # Errors
    ///
    /// Returns [`MountError::AlreadyMounted`],
    /// [`MountError::UnsupportedHostPair`],
    /// [`MountError::MissingBridgeAddress`], [`MountError::NotAvailable`],
    /// [`MountError::TargetBusy`], [`MountError::TargetNotEmpty`] or
    /// [`MountError::TargetMissing`] for violated preconditions, and
    /// [`MountError::CommandFailed`] when a mount command fails. A failed
    /// bridge leaves nothing behind.
    pub async fn mount(&self, mountpoint: &Mountpoint) -> Result<(), MountError> {
        let mut attachment = self.attachment.lock().await;
        if attachment.is_some() {
            return Err(MountError::AlreadyMounted {
                uuid: self.uuid.clone(),
            });
        }

        let plan = MountPlan::for_hosts(&self.host, mountpoint.host());
        let bridge_source = match plan {
            MountPlan::Direct => None,
            MountPlan::Unsupported => {
                return Err(MountError::UnsupportedHostPair {
                    device_host: self.host.to_string(),
                    mount_host: mountpoint.host().to_string(),
                });
            }
            MountPlan::BridgeViaRemoteTemp => Some(self.host.real_ip()?.to_owned()),
            MountPlan::BridgeViaLocalTemp => {
                let address = self.settings.bridge_address.as_ref().ok_or_else(|| {
                    MountError::MissingBridgeAddress {
                        uuid: self.uuid.clone(),
                        mount_host: mountpoint.host().to_string(),
                    }
                })?;
                Some(address.ip().to_owned())
            }
        };

        if !self.is_available().await? {
            return Err(MountError::NotAvailable {
                uuid: self.uuid.clone(),
                host: self.host.to_string(),
            });
        }
        mountpoint.prepare_target().await?;

        let bridge = match bridge_source {
            None => {
                self.mount_direct(mountpoint).await?;
                None
            }
            Some(address) => Some(Bridge {
                temporary: self.mount_bridged(mountpoint, &address).await?,
                exposed: true,
                mounted: true,
            }),
        };
        *attachment = Some(Attachment {
            mountpoint: mountpoint.clone(),
            bridge,
        });
        Ok(())
    }

    async fn mount_direct(&self, mountpoint: &Mountpoint) -> Result<(), MountError> {
        mountpoint
            .run_checked(vec![
                String::from("mount"),
                String::from("-o"),
                mountpoint.option_string(),
                String::from("-t"),
                self.filesystem.clone(),
                String::from("-U"),
                self.uuid.clone(),
                mountpoint.path().to_string(),
            ])
            .await?;
        info!(
            host = %mountpoint.host(),
            uuid = %self.uuid,
            path = %mountpoint.path(),
            "mounted device"
        );
        Ok(())
    }

    /// Mounts the device on a fresh temporary directory on its own host and
    /// exposes that directory at `mountpoint` through `sshfs`, reaching the
    /// device host at `address`.
    async fn mount_bridged(
        &self,
        mountpoint: &Mountpoint,
        address: &str,
    ) -> Result<Mountpoint, MountError> {
        let temporary = self.temporary_mountpoint(mountpoint);
        temporary.create(true).await?;
        if let Err(err) = self.mount_direct(&temporary).await {
            self.discard_temporary(&temporary, false).await;
            return Err(err);
        }

        let args = vec![
            self.settings.sshfs_bin.clone(),
            format!("{}@{}:{}", mountpoint.user(), address, temporary.path()),
            mountpoint.path().to_string(),
            String::from("-o"),
            String::from("idmap=user"),
        ];
        if let Err(err) = mountpoint.run_checked(args).await {
            warn!(
                uuid = %self.uuid,
                host = %mountpoint.host(),
                path = %mountpoint.path(),
                error = %err,
                "bridge failed; rolling back temporary mount"
            );
            self.discard_temporary(&temporary, true).await;
            return Err(err);
        }
        info!(
            uuid = %self.uuid,
            device_host = %self.host,
            mount_host = %mountpoint.host(),
            temporary = %temporary.path(),
            path = %mountpoint.path(),
            "bridged device"
        );
        Ok(temporary)
    }

    fn temporary_mountpoint(&self, mountpoint: &Mountpoint) -> Mountpoint {
        let name = format!("{}-{}", self.uuid, Uuid::new_v4());
        let path = self.settings.bridge_root.join(name);
        Mountpoint::sibling(mountpoint, self.host.clone(), path)
    }

    /// Best-effort cleanup of a temporary mountpoint after a failed bridge.
    async fn discard_temporary(&self, temporary: &Mountpoint, mounted: bool) {
        if mounted {
            if let Err(err) = temporary.run_umount().await {
                warn!(path = %temporary.path(), error = %err, "temporary unmount failed");
                return;
            }
        }
        if let Err(err) = temporary.remove().await {
            warn!(path = %temporary.path(), error = %err, "temporary mountpoint left behind");
        }
    }

    /// Unmounts the device from wherever [`Device::mount`] put it, tearing
    /// down the bridge and its temporary mountpoint first when one was used.
    ///
    /// A bridge teardown that fails partway remembers the legs already
    /// removed, so a retry resumes where it stopped.
    ///
    /// # Errors
    ///
    /// Returns [`MountError::NotMounted`] when the device is not mounted
    /// through this handle and [`MountError::TargetBusy`] when the kernel
    /// reports a mount as busy. The device stays mounted after an error.
    pub async fn unmount(&self) -> Result<(), MountError> {
        let mut attachment = self.attachment.lock().await;
        let Some(attached) = attachment.as_mut() else {
            return Err(MountError::NotMounted {
                uuid: self.uuid.clone(),
            });
        };

        match attached.bridge.as_mut() {
            None => attached.mountpoint.run_umount().await?,
            Some(bridge) => self.tear_down_bridge(&attached.mountpoint, bridge).await?,
        }
        *attachment = None;
        info!(uuid = %self.uuid, "device unmounted");
        Ok(())
    }

    async fn tear_down_bridge(
        &self,
        mountpoint: &Mountpoint,
        bridge: &mut Bridge,
    ) -> Result<(), MountError> {
        if bridge.exposed {
            let args = vec![
                self.settings.fusermount_bin.clone(),
                String::from("-u"),
                mountpoint.path().to_string(),
            ];
            mountpoint.run_unmount_command(args).await?;
            bridge.exposed = false;
            info!(host = %mountpoint.host(), path = %mountpoint.path(), "removed bridge");
        }
        if bridge.mounted {
            bridge.temporary.run_umount().await?;
            bridge.mounted = false;
        }
        bridge.temporary.remove().await
    }
}
