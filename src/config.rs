//! Configuration loading via `ortho-config`.
//!
//! [`ExecConfig`] merges defaults, `autobackup.toml` discovery and
//! `AUTOBACKUP_*` environment variables, then converts into the runtime
//! settings of the dispatcher and the mount layer.

use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::exec::{DEFAULT_REMOTE_SHELL, DispatcherSettings};
use crate::host::Host;
use crate::mount::{DEFAULT_BRIDGE_ROOT, MountSettings, MountTableSource};
use crate::session::{DEFAULT_SSH_PORT, SshTransport};

/// Transport, timeout and mount settings loaded via `ortho-config`.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "AUTOBACKUP",
    discovery(
        app_name = "autobackup",
        env_var = "AUTOBACKUP_CONFIG_PATH",
        config_file_name = "autobackup.toml",
        dotfile_name = ".autobackup.toml",
        project_file_name = "autobackup.toml"
    )
)]
pub struct ExecConfig {
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Port remote sessions connect to.
    #[ortho_config(default = DEFAULT_SSH_PORT)]
    pub ssh_port: u16,
    /// Whether unknown host keys are rejected.
    #[ortho_config(default = true)]
    pub ssh_strict_host_key_checking: bool,
    /// Shell started on the remote side after the handshake. Must be
    /// bash-compatible.
    #[ortho_config(default = DEFAULT_REMOTE_SHELL.to_owned())]
    pub remote_shell: String,
    /// Handshake deadline in milliseconds.
    #[ortho_config(default = 10_000)]
    pub connect_timeout_ms: u64,
    /// Per-command deadline in milliseconds, local and remote.
    #[ortho_config(default = 10_000)]
    pub command_timeout_ms: u64,
    /// Path to the `sshfs` executable.
    #[ortho_config(default = "sshfs".to_owned())]
    pub sshfs_bin: String,
    /// Path to the `fusermount` executable.
    #[ortho_config(default = "fusermount".to_owned())]
    pub fusermount_bin: String,
    /// Parent directory of temporary bridge mountpoints.
    #[ortho_config(default = DEFAULT_BRIDGE_ROOT.to_owned())]
    pub bridge_root: String,
    /// Address remote hosts use to reach this machine. Needed only to bridge
    /// a local device onto a remote mountpoint.
    pub bridge_address: Option<String>,
    /// Mount table source: `mount` or `proc`.
    #[ortho_config(default = "mount".to_owned())]
    pub mount_table: String,
}

impl ExecConfig {
    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("autobackup")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Checks every field for a usable value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidConfig`] naming the first blank string,
    /// zero port or timeout, relative bridge root or unknown mount table.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_value(&self.ssh_bin, "ssh_bin")?;
        Self::require_non_zero(u64::from(self.ssh_port), "ssh_port")?;
        Self::require_value(&self.remote_shell, "remote_shell")?;
        Self::require_non_zero(self.connect_timeout_ms, "connect_timeout_ms")?;
        Self::require_non_zero(self.command_timeout_ms, "command_timeout_ms")?;
        Self::require_value(&self.sshfs_bin, "sshfs_bin")?;
        Self::require_value(&self.fusermount_bin, "fusermount_bin")?;
        Self::require_value(&self.bridge_root, "bridge_root")?;
        if !Utf8PathBuf::from(self.bridge_root.trim()).is_absolute() {
            return Err(ConfigError::invalid("bridge_root"));
        }
        if let Some(address) = self.bridge_address.as_deref() {
            Self::require_value(address, "bridge_address")?;
        }
        self.mount_table_source()?;
        Ok(())
    }

    /// Returns the settings for [`crate::exec::Dispatcher::new`].
    #[must_use]
    pub fn dispatcher_settings(&self) -> DispatcherSettings {
        DispatcherSettings {
            transport: SshTransport {
                program: self.ssh_bin.trim().to_owned(),
                port: self.ssh_port,
                strict_host_key_checking: self.ssh_strict_host_key_checking,
            },
            remote_shell: self.remote_shell.trim().to_owned(),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            command_timeout: Duration::from_millis(self.command_timeout_ms),
        }
    }

    /// Returns the settings shared by devices and mountpoints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidConfig`] for an unknown mount table.
    pub fn mount_settings(&self) -> Result<MountSettings, ConfigError> {
        Ok(MountSettings {
            sshfs_bin: self.sshfs_bin.trim().to_owned(),
            fusermount_bin: self.fusermount_bin.trim().to_owned(),
            bridge_root: Utf8PathBuf::from(self.bridge_root.trim()),
            bridge_address: self
                .bridge_address
                .as_deref()
                .map(str::trim)
                .filter(|address| !address.is_empty())
                .map(Host::new),
            mount_table: self.mount_table_source()?,
        })
    }

    fn mount_table_source(&self) -> Result<MountTableSource, ConfigError> {
        self.mount_table
            .parse()
            .map_err(|_| ConfigError::invalid("mount_table"))
    }

    fn require_value(value: &str, field: &str) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::invalid(field));
        }
        Ok(())
    }

    fn require_non_zero(value: u64, field: &str) -> Result<(), ConfigError> {
        if value == 0 {
            return Err(ConfigError::invalid(field));
        }
        Ok(())
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Raised when a field holds an unusable value. The message says where
    /// to set it.
    #[error("invalid {field}: set AUTOBACKUP_{env_suffix} or fix {field} in autobackup.toml", env_suffix = field.to_uppercase())]
    InvalidConfig {
        /// Configuration field that failed validation.
        field: String,
    },
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl ConfigError {
    fn invalid(field: &str) -> Self {
        Self::InvalidConfig {
            field: field.to_owned(),
        }
    }
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
