//! Shared fixtures for mount BDD scenarios.

use std::sync::Arc;

use autobackup::exec::Executor;
use autobackup::mount::{Device, MountError};
use autobackup::test_support::SimulatedHosts;
use autobackup::Host;
use rstest::fixture;

pub const UUID: &str = "9d4c2f1e-7a6b-4c3d-8e2f-a1b2c3d4e5f6";
pub const USER: &str = "backup";

#[derive(Clone, Debug)]
pub struct MountWorld {
    pub hosts: SimulatedHosts,
    pub device_host: Host,
    pub create_if_missing: bool,
    pub device: Option<Arc<Device>>,
    pub outcome: Option<Result<(), MountError>>,
}

impl MountWorld {
    pub fn executor(&self) -> Arc<dyn Executor> {
        Arc::new(self.hosts.clone())
    }
}

/// Maps the host names used in feature files to addresses.
pub fn host_named(name: &str) -> Host {
    match name {
        "local" => Host::localhost(),
        "remote" => Host::new("192.0.2.1"),
        "other" => Host::new("192.0.2.2"),
        other => Host::new(other),
    }
}

#[fixture]
pub fn mount_world() -> MountWorld {
    MountWorld {
        hosts: SimulatedHosts::new(),
        device_host: Host::localhost(),
        create_if_missing: false,
        device: None,
        outcome: None,
    }
}
