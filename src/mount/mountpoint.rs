//! Directories that devices are mounted on.

use std::fmt;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::info;

use super::table::{is_mount_target, parse_mount_output, parse_proc_mounts};
use super::{Device, MountError, MountSettings, MountTableSource};
use crate::exec::{ExecOutput, Executor, ExecutorExt, FileKind, Invocation, current_user};
use crate::host::Host;

/// Builder for [`Mountpoint`].
#[derive(Clone, Debug)]
pub struct MountpointBuilder {
    host: Host,
    path: Utf8PathBuf,
    options: Vec<String>,
    create_if_missing: bool,
    user: Option<String>,
    settings: Option<Arc<MountSettings>>,
}

impl MountpointBuilder {
    /// Sets the mount options passed with `-o`.
    #[must_use]
    pub fn options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = options.into_iter().map(Into::into).collect();
        self
    }

    /// Allows [`Device::mount`] to create the directory when it is missing.
    #[must_use]
    pub const fn create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
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

    /// Validates the path and binds the mountpoint to `executor`.
    ///
    /// # Errors
    ///
    /// Returns [`MountError::RelativePath`] for a relative path and
    /// [`MountError::Exec`] when no user was set and the current one cannot
    /// be determined.
    pub fn build(self, executor: Arc<dyn Executor>) -> Result<Mountpoint, MountError> {
        if !self.path.is_absolute() {
            return Err(MountError::RelativePath {
                path: self.path.into_string(),
            });
        }
        let user = match self.user {
            Some(user) => user,
            None => current_user()?,
        };
        Ok(Mountpoint {
            host: self.host,
            path: self.path,
            options: self.options,
            create_if_missing: self.create_if_missing,
            user,
            executor,
            settings: self.settings.unwrap_or_default(),
        })
    }
}

/// An absolute directory on a host.
///
/// Queries ask the host every time; nothing is cached.
#[derive(Clone)]
pub struct Mountpoint {
    host: Host,
    path: Utf8PathBuf,
    options: Vec<String>,
    create_if_missing: bool,
    user: String,
    executor: Arc<dyn Executor>,
    settings: Arc<MountSettings>,
}

impl fmt::Debug for Mountpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mountpoint")
            .field("host", &self.host)
            .field("path", &self.path)
            .field("options", &self.options)
            .field("create_if_missing", &self.create_if_missing)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

impl Mountpoint {
    /// Starts a builder for the directory `path` on `host`.
    #[must_use]
    pub fn builder(host: Host, path: impl Into<Utf8PathBuf>) -> MountpointBuilder {
        MountpointBuilder {
            host,
            path: path.into(),
            options: Vec::new(),
            create_if_missing: false,
            user: None,
            settings: None,
        }
    }

    /// Creates a mountpoint that shares user, options and collaborators
    /// with `template` but lives at `path` on `host`.
    pub(super) fn sibling(template: &Self, host: Host, path: Utf8PathBuf) -> Self {
        Self {
            host,
            path,
            options: template.options.clone(),
            create_if_missing: false,
            user: template.user.clone(),
            executor: Arc::clone(&template.executor),
            settings: Arc::clone(&template.settings),
        }
    }

    /// Returns the host the directory lives on.
    #[must_use]
    pub const fn host(&self) -> &Host {
        &self.host
    }

    /// Returns the absolute directory path.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Returns the stored mount options.
    #[must_use]
    pub fn options(&self) -> &[String] {
        &self.options
    }

    /// Returns the user commands run as.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Returns whether a missing directory is created on mount.
    #[must_use]
    pub const fn creates_if_missing(&self) -> bool {
        self.create_if_missing
    }

    /// Returns the settings shared with the owning device.
    #[must_use]
    pub fn settings(&self) -> &MountSettings {
        &self.settings
    }

    /// Returns `true` when the directory exists.
    ///
    /// # Errors
    ///
    /// Propagates dispatch failures.
    pub async fn exists(&self) -> Result<bool, MountError> {
        Ok(self
            .executor
            .file_exists(&self.host, &self.user, self.path.as_str(), FileKind::Directory)
            .await?)
    }

    /// Returns `true` when the directory has no entries. An active
    /// mountpoint may be empty too.
    ///
    /// # Errors
    ///
    /// Fails when the directory cannot be listed.
    pub async fn is_empty(&self) -> Result<bool, MountError> {
        Ok(self
            .executor
            .directory_empty(&self.host, &self.user, self.path.as_str())
            .await?)
    }

    /// Returns `true` when something is mounted on the directory.
    ///
    /// # Errors
    ///
    /// Fails when the mount table cannot be read.
    pub async fn is_active(&self) -> Result<bool, MountError> {
        let source = self.settings.mount_table;
        let args = match source {
            MountTableSource::MountCommand => vec!["mount"],
            MountTableSource::ProcMounts => vec!["cat", "/proc/mounts"],
        };
        let output = self
            .executor
            .execute_success(Invocation::new(self.host.clone(), self.user.as_str(), args))
            .await?;
        let entries = match source {
            MountTableSource::MountCommand => parse_mount_output(&output.stdout),
            MountTableSource::ProcMounts => parse_proc_mounts(&output.stdout),
        };
        Ok(is_mount_target(&entries, self.path.as_str()))
    }

    /// Creates the directory unless it already exists.
    ///
    /// # Errors
    ///
    /// Fails when `mkdir` fails, for example because a parent is missing and
    /// `create_parents` is not set.
    pub async fn create(&self, create_parents: bool) -> Result<(), MountError> {
        if self.exists().await? {
            return Ok(());
        }
        self.executor
            .create_directory(&self.host, &self.user, self.path.as_str(), create_parents)
            .await?;
        Ok(())
    }

    /// Removes the directory.
    ///
    /// # Errors
    ///
    /// Returns [`MountError::TargetBusy`] when it is active and
    /// [`MountError::TargetNotEmpty`] when it has entries.
    pub async fn remove(&self) -> Result<(), MountError> {
        if self.is_active().await? {
            return Err(self.busy());
        }
        if !self.is_empty().await? {
            return Err(self.not_empty());
        }
        self.executor
            .remove_directory(&self.host, &self.user, self.path.as_str(), false)
            .await?;
        Ok(())
    }

    /// Mounts `device` here. See [`Device::mount`].
    ///
    /// # Errors
    ///
    /// Same as [`Device::mount`].
    pub async fn mount(&self, device: &Device) -> Result<(), MountError> {
        device.mount(self).await
    }

    /// Unmounts whatever is mounted here.
    ///
    /// This bypasses any [`Device`] bookkeeping; prefer [`Device::unmount`]
    /// for devices mounted through a device handle.
    ///
    /// # Errors
    ///
    /// Returns [`MountError::NotActive`] when nothing is mounted and
    /// [`MountError::TargetBusy`] when the kernel refuses because the target
    /// is in use.
    pub async fn unmount(&self) -> Result<(), MountError> {
        if !self.is_active().await? {
            return Err(self.not_active());
        }
        self.run_umount().await
    }

    /// Makes this mountpoint's tree visible at `target` as well.
    ///
    /// With `submounts` everything mounted below this directory is carried
    /// over (`--rbind`), otherwise only the top mount is (`--bind`).
    ///
    /// # Errors
    ///
    /// Returns [`MountError::HostMismatch`] for mountpoints on different
    /// hosts, [`MountError::NotActive`] when this mountpoint is inactive, and
    /// the busy, not-empty and missing errors for an unusable `target`.
    pub async fn bind(&self, target: &Self, submounts: bool) -> Result<(), MountError> {
        if self.host != target.host {
            return Err(MountError::HostMismatch {
                source_host: self.host.to_string(),
                target_host: target.host.to_string(),
            });
        }
        if !self.is_active().await? {
            return Err(self.not_active());
        }
        target.prepare_target().await?;

        let flag = if submounts { "--rbind" } else { "--bind" };
        self.run_checked(vec![
            String::from("mount"),
            flag.to_owned(),
            self.path.to_string(),
            target.path.to_string(),
        ])
        .await?;
        info!(host = %self.host, source = %self.path, target = %target.path, submounts, "bound mountpoint");
        Ok(())
    }

    /// Re-mounts the active filesystem with `new_options`, or with the
    /// stored options when `None`.
    ///
    /// # Errors
    ///
    /// Returns [`MountError::TargetMissing`] when the directory does not
    /// exist and [`MountError::NotActive`] when nothing is mounted.
    pub async fn remount(&self, new_options: Option<&[String]>) -> Result<(), MountError> {
        if !self.exists().await? {
            return Err(self.missing());
        }
        if !self.is_active().await? {
            return Err(self.not_active());
        }
        let mut options: Vec<&str> = new_options
            .unwrap_or(&self.options)
            .iter()
            .map(String::as_str)
            .filter(|option| !option.is_empty())
            .collect();
        options.push("remount");
        self.run_checked(vec![
            String::from("mount"),
            String::from("-o"),
            options.join(","),
            self.path.to_string(),
        ])
        .await?;
        info!(host = %self.host, path = %self.path, "remounted");
        Ok(())
    }

    /// Checks that a device or bind may be mounted here, creating the
    /// directory when it is missing and creation is allowed.
    pub(super) async fn prepare_target(&self) -> Result<(), MountError> {
        if self.exists().await? {
            if self.is_active().await? {
                return Err(self.busy());
            }
            if !self.is_empty().await? {
                return Err(self.not_empty());
            }
            return Ok(());
        }
        if !self.create_if_missing {
            return Err(self.missing());
        }
        self.create(true).await
    }

    /// Option string for `mount -o`.
    pub(super) fn option_string(&self) -> String {
        let joined = self
            .options
            .iter()
            .map(String::as_str)
            .filter(|option| !option.is_empty())
            .collect::<Vec<_>>()
            .join(",");
        if joined.is_empty() {
            String::from("defaults")
        } else {
            joined
        }
    }

    /// Runs `args` on this mountpoint's host.
    pub(super) async fn run(&self, args: Vec<String>) -> Result<ExecOutput, MountError> {
        Ok(self
            .executor
            .execute(Invocation::new(self.host.clone(), self.user.as_str(), args))
            .await?)
    }

    /// Runs `args` and turns a non-zero exit into
    /// [`MountError::CommandFailed`].
    pub(super) async fn run_checked(&self, args: Vec<String>) -> Result<(), MountError> {
        let command = args.join(" ");
        let output = self.run(args).await?;
        if output.is_success() {
            return Ok(());
        }
        Err(self.command_failed(command, output))
    }

    /// Runs `umount` on this path.
    pub(super) async fn run_umount(&self) -> Result<(), MountError> {
        let args = vec![String::from("umount"), self.path.to_string()];
        self.run_unmount_command(args).await?;
        info!(host = %self.host, path = %self.path, "unmounted");
        Ok(())
    }

    /// Runs an unmount family command, mapping a busy target to
    /// [`MountError::TargetBusy`].
    pub(super) async fn run_unmount_command(&self, args: Vec<String>) -> Result<(), MountError> {
        let command = args.join(" ");
        let output = self.run(args).await?;
        if output.is_success() {
            return Ok(());
        }
        if output.exit_code == 1 || output.stderr.contains("target is busy") {
            return Err(self.busy());
        }
        Err(self.command_failed(command, output))
    }

    pub(super) fn command_failed(&self, command: String, output: ExecOutput) -> MountError {
        MountError::CommandFailed {
            host: self.host.to_string(),
            command,
            exit_code: output.exit_code,
            stderr: output.stderr.trim().to_owned(),
        }
    }

    pub(super) fn busy(&self) -> MountError {
        MountError::TargetBusy {
            host: self.host.to_string(),
            path: self.path.to_string(),
        }
    }

    fn not_empty(&self) -> MountError {
        MountError::TargetNotEmpty {
            host: self.host.to_string(),
            path: self.path.to_string(),
        }
    }

    fn missing(&self) -> MountError {
        MountError::TargetMissing {
            host: self.host.to_string(),
            path: self.path.to_string(),
        }
    }

    fn not_active(&self) -> MountError {
        MountError::NotActive {
            host: self.host.to_string(),
            path: self.path.to_string(),
        }
    }
}
