//! Backup locations: a path on a host, optionally on a device that has to be
//! mounted first.

use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};

use crate::host::Host;
use crate::mount::{Device, MountError, Mountpoint};

/// Device a location lives on and where that device gets mounted.
#[derive(Clone, Debug)]
struct Backing {
    device: Arc<Device>,
    mountpoint: Mountpoint,
}

/// A user, host and path triple, as consumed by copy tools that accept
/// `user@host:path` sources and destinations.
///
/// When a device backs the location, `path` is relative to the device's
/// mountpoint and the location has to be mounted before use.
#[derive(Clone, Debug)]
pub struct Location {
    user: String,
    host: Host,
    path: Utf8PathBuf,
    backing: Option<Backing>,
}

impl Location {
    /// Creates a location for `path` on `host`, accessed as `user`.
    #[must_use]
    pub fn new(user: impl Into<String>, host: Host, path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            user: user.into(),
            host,
            path: path.into(),
            backing: None,
        }
    }

    /// Places the location on `device`, mounted at `mountpoint`.
    #[must_use]
    pub fn on_device(mut self, device: Arc<Device>, mountpoint: Mountpoint) -> Self {
        self.backing = Some(Backing { device, mountpoint });
        self
    }

    /// Returns the user the location is accessed as.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Returns the host the location lives on.
    #[must_use]
    pub const fn host(&self) -> &Host {
        &self.host
    }

    /// Returns the configured path, relative to the mountpoint for
    /// device-backed locations.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Returns the backing device, if any.
    #[must_use]
    pub fn device(&self) -> Option<&Arc<Device>> {
        self.backing.as_ref().map(|backing| &backing.device)
    }

    /// Returns the mountpoint of the backing device, if any.
    #[must_use]
    pub fn mountpoint(&self) -> Option<&Mountpoint> {
        self.backing.as_ref().map(|backing| &backing.mountpoint)
    }

    /// Returns the path on the host, inside the mountpoint when a device
    /// backs the location.
    #[must_use]
    pub fn effective_path(&self) -> Utf8PathBuf {
        match &self.backing {
            None => self.path.clone(),
            Some(backing) => {
                let relative = self.path.as_str().trim_start_matches('/');
                backing.mountpoint.path().join(relative)
            }
        }
    }

    /// Renders the location for `ssh`-style tools: the bare path on this
    /// machine, `user@ip:path` elsewhere.
    #[must_use]
    pub fn ssh_string(&self) -> String {
        let path = self.effective_path();
        if self.host.is_local() {
            path.into_string()
        } else {
            format!("{}@{}:{}", self.user, self.host.ip(), path)
        }
    }

    /// Mounts the backing device. Does nothing for plain locations.
    ///
    /// # Errors
    ///
    /// Same as [`Device::mount`].
    pub async fn mount(&self) -> Result<(), MountError> {
        match &self.backing {
            None => Ok(()),
            Some(backing) => backing.device.mount(&backing.mountpoint).await,
        }
    }

    /// Unmounts the backing device. Does nothing for plain locations.
    ///
    /// # Errors
    ///
    /// Same as [`Device::unmount`].
    pub async fn unmount(&self) -> Result<(), MountError> {
        match &self.backing {
            None => Ok(()),
            Some(backing) => backing.device.unmount().await,
        }
    }
}
