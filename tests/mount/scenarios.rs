//! BDD scenarios for mounting devices across hosts.

use rstest_bdd_macros::scenario;

use super::test_helpers::{MountWorld, mount_world};

#[scenario(
    path = "tests/features/mount.feature",
    name = "Mount a local device and unmount it again"
)]
fn scenario_local_round_trip(mount_world: MountWorld) {
    drop(mount_world);
}

#[scenario(
    path = "tests/features/mount.feature",
    name = "Bridge a remote device onto a local directory"
)]
fn scenario_remote_bridge(mount_world: MountWorld) {
    drop(mount_world);
}

#[scenario(
    path = "tests/features/mount.feature",
    name = "Refuse a mountpoint that is already in use"
)]
fn scenario_busy_target(mount_world: MountWorld) {
    drop(mount_world);
}

#[scenario(
    path = "tests/features/mount.feature",
    name = "Refuse to join two remote hosts"
)]
fn scenario_unsupported_pair(mount_world: MountWorld) {
    drop(mount_world);
}

#[scenario(
    path = "tests/features/mount.feature",
    name = "Create a missing mountpoint when allowed"
)]
fn scenario_create_missing(mount_world: MountWorld) {
    drop(mount_world);
}

#[scenario(
    path = "tests/features/mount.feature",
    name = "Roll back a bridge whose client fails"
)]
fn scenario_bridge_rollback(mount_world: MountWorld) {
    drop(mount_world);
}
