//! BDD step definitions for device mounting.

use std::sync::Arc;

use autobackup::mount::{Device, MountError, Mountpoint, DEFAULT_BRIDGE_ROOT};
use rstest_bdd_macros::{given, then, when};
use tokio::runtime::Runtime;

use super::test_helpers::{MountWorld, UUID, USER, host_named};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Mount(#[from] MountError),
    #[error("assertion failed: {0}")]
    Assertion(String),
}

fn runtime() -> Result<Runtime, StepError> {
    Runtime::new().map_err(|err| StepError::Assertion(err.to_string()))
}

#[given("a block device on \"{host}\"")]
fn block_device(mount_world: &MountWorld, host: String) -> MountWorld {
    let device_host = host_named(&host);
    mount_world.hosts.add_block_device(&device_host, UUID);
    MountWorld {
        device_host,
        ..mount_world.clone()
    }
}

#[given("an empty directory \"{path}\" on \"{host}\"")]
fn empty_directory(mount_world: &MountWorld, path: String, host: String) {
    mount_world.hosts.add_directory(&host_named(&host), &path);
}

#[given("\"{path}\" on \"{host}\" is already in use")]
fn directory_in_use(mount_world: &MountWorld, path: String, host: String) {
    mount_world
        .hosts
        .add_mount(&host_named(&host), "/dev/sdz1", &path, "ext4");
}

#[given("missing mountpoints may be created")]
fn creation_allowed(mount_world: &MountWorld) -> MountWorld {
    MountWorld {
        create_if_missing: true,
        ..mount_world.clone()
    }
}

#[given("the bridge client fails")]
fn bridge_client_fails(mount_world: &MountWorld) {
    mount_world.hosts.fail_program("sshfs");
}

#[when("I mount the device on \"{path}\" on \"{host}\"")]
fn mount_device(
    mount_world: &MountWorld,
    path: String,
    host: String,
) -> Result<MountWorld, StepError> {
    let device = Arc::new(
        Device::builder(mount_world.device_host.clone(), UUID)
            .filesystem("ext4")
            .user(USER)
            .build(mount_world.executor())?,
    );
    let mountpoint = Mountpoint::builder(host_named(&host), path)
        .user(USER)
        .create_if_missing(mount_world.create_if_missing)
        .build(mount_world.executor())?;

    let outcome = runtime()?.block_on(device.mount(&mountpoint));
    Ok(MountWorld {
        device: Some(device),
        outcome: Some(outcome),
        ..mount_world.clone()
    })
}

#[when("I unmount the device")]
fn unmount_device(mount_world: &MountWorld) -> Result<MountWorld, StepError> {
    let device = mount_world
        .device
        .clone()
        .ok_or_else(|| StepError::Assertion(String::from("no device was mounted")))?;
    let outcome = runtime()?.block_on(device.unmount());
    Ok(MountWorld {
        outcome: Some(outcome),
        ..mount_world.clone()
    })
}

#[then("the operation succeeds")]
fn operation_succeeds(mount_world: &MountWorld) -> Result<(), StepError> {
    match &mount_world.outcome {
        Some(Ok(())) => Ok(()),
        Some(Err(err)) => Err(StepError::Assertion(format!(
            "expected success, got failure: {err}"
        ))),
        None => Err(StepError::Assertion(String::from("missing outcome"))),
    }
}

#[then("the operation fails with \"{kind}\"")]
fn operation_fails(mount_world: &MountWorld, kind: String) -> Result<(), StepError> {
    let Some(Err(err)) = &mount_world.outcome else {
        return Err(StepError::Assertion(String::from(
            "expected failure outcome",
        )));
    };
    let actual = failure_kind(err);
    if actual == kind {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected failure kind {kind}, got {actual}: {err}"
        )))
    }
}

#[then("\"{path}\" is mounted on \"{host}\"")]
fn is_mounted(mount_world: &MountWorld, path: String, host: String) -> Result<(), StepError> {
    if mount_world.hosts.is_mount_target(&host_named(&host), &path) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("{path} should be mounted on {host}")))
    }
}

#[then("\"{path}\" is not mounted on \"{host}\"")]
fn is_not_mounted(mount_world: &MountWorld, path: String, host: String) -> Result<(), StepError> {
    if mount_world.hosts.is_mount_target(&host_named(&host), &path) {
        Err(StepError::Assertion(format!("{path} should not be mounted on {host}")))
    } else {
        Ok(())
    }
}

#[then("\"{path}\" on \"{host}\" is bridged from \"{source}\"")]
fn is_bridged(
    mount_world: &MountWorld,
    path: String,
    host: String,
    source: String,
) -> Result<(), StepError> {
    let mounts = mount_world.hosts.mounts(&host_named(&host));
    let expected_prefix = format!(
        "{USER}@{}:{DEFAULT_BRIDGE_ROOT}/{UUID}-",
        host_named(&source).ip()
    );
    match mounts.get(&path) {
        Some(mounted) if mounted.starts_with(&expected_prefix) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected {path} to be bridged from {expected_prefix}..., found {other:?}"
        ))),
    }
}

#[then("no temporary mountpoint remains on \"{host}\"")]
fn no_temporary_mountpoint(mount_world: &MountWorld, host: String) -> Result<(), StepError> {
    let host = host_named(&host);
    let leftovers = mount_world.hosts.directories_under(&host, DEFAULT_BRIDGE_ROOT);
    if !leftovers.is_empty() {
        return Err(StepError::Assertion(format!(
            "temporary mountpoints left behind: {leftovers:?}"
        )));
    }
    if mount_world.hosts.mounts(&host).is_empty() {
        Ok(())
    } else {
        Err(StepError::Assertion(String::from(
            "temporary mount left behind",
        )))
    }
}

#[then("no command was issued")]
fn no_command_issued(mount_world: &MountWorld) -> Result<(), StepError> {
    let commands = mount_world.hosts.commands();
    if commands.is_empty() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected no commands, got {commands:?}"
        )))
    }
}

#[then("the device is not mounted")]
fn device_not_mounted(mount_world: &MountWorld) -> Result<(), StepError> {
    let device = mount_world
        .device
        .clone()
        .ok_or_else(|| StepError::Assertion(String::from("no device was built")))?;
    if runtime()?.block_on(device.is_mounted()) {
        Err(StepError::Assertion(String::from(
            "device should not be mounted",
        )))
    } else {
        Ok(())
    }
}

const fn failure_kind(err: &MountError) -> &'static str {
    match err {
        MountError::TargetBusy { .. } => "busy",
        MountError::TargetNotEmpty { .. } => "not-empty",
        MountError::TargetMissing { .. } => "missing",
        MountError::NotAvailable { .. } => "unavailable",
        MountError::AlreadyMounted { .. } => "already-mounted",
        MountError::NotMounted { .. } => "not-mounted",
        MountError::NotActive { .. } => "inactive",
        MountError::UnsupportedHostPair { .. } => "unsupported",
        MountError::HostMismatch { .. } => "host-mismatch",
        MountError::MissingBridgeAddress { .. } => "bridge-address",
        MountError::RelativePath { .. } => "relative-path",
        MountError::CommandFailed { .. } => "command",
        MountError::Host(_) => "host",
        MountError::Exec(_) => "exec",
    }
}
