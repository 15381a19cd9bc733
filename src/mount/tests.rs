//! Unit tests for devices and mountpoints against simulated hosts.

use std::sync::Arc;

use rstest::{fixture, rstest};

use super::*;
use crate::exec::Executor;
use crate::test_support::{ScriptedExecutor, SimulatedHosts};

const UUID: &str = "0f3c9a4e-5b1d-4c2e-9f7a-1234567890ab";
const TARGET: &str = "/mnt/backup";
const USER: &str = "backup";

fn remote_a() -> Host {
    Host::new("192.0.2.1")
}

fn remote_b() -> Host {
    Host::new("192.0.2.2")
}

fn bridge_address() -> Host {
    Host::new("192.0.2.50")
}

#[fixture]
fn sim() -> SimulatedHosts {
    SimulatedHosts::new()
}

fn executor(sim: &SimulatedHosts) -> Arc<dyn Executor> {
    Arc::new(sim.clone())
}

fn settings_with_bridge() -> Arc<MountSettings> {
    Arc::new(MountSettings {
        bridge_address: Some(bridge_address()),
        ..MountSettings::default()
    })
}

fn mountpoint_on(executor: Arc<dyn Executor>, host: Host, path: &str) -> Mountpoint {
    Mountpoint::builder(host, path)
        .user(USER)
        .options(["rw", "noatime"])
        .build(executor)
        .expect("absolute path")
}

fn device_on(executor: Arc<dyn Executor>, host: Host, settings: Arc<MountSettings>) -> Device {
    Device::builder(host, UUID)
        .filesystem("ext4")
        .user(USER)
        .settings(settings)
        .build(executor)
        .expect("device")
}

/// Local device and local mountpoint, both present.
fn local_pair(sim: &SimulatedHosts) -> (Device, Mountpoint) {
    sim.add_block_device(&Host::localhost(), UUID);
    sim.add_directory(&Host::localhost(), TARGET);
    (
        device_on(executor(sim), Host::localhost(), Arc::default()),
        mountpoint_on(executor(sim), Host::localhost(), TARGET),
    )
}

#[test]
fn relative_paths_are_rejected() {
    let err = Mountpoint::builder(Host::localhost(), "mnt/backup")
        .user(USER)
        .build(Arc::new(ScriptedExecutor::new()))
        .expect_err("relative");
    assert_eq!(err, MountError::RelativePath {
        path: String::from("mnt/backup"),
    });
}

#[test]
fn device_file_lives_under_by_uuid() {
    let device = device_on(Arc::new(ScriptedExecutor::new()), remote_a(), Arc::default());
    assert_eq!(
        device.device_file_path().as_str(),
        "/dev/disk/by-uuid/0f3c9a4e-5b1d-4c2e-9f7a-1234567890ab"
    );
}

#[rstest]
#[case("mount", MountTableSource::MountCommand)]
#[case(" proc ", MountTableSource::ProcMounts)]
fn mount_table_sources_parse(#[case] raw: &str, #[case] expected: MountTableSource) {
    let parsed: MountTableSource = raw.parse().expect("known source");
    assert_eq!(parsed, expected);
    assert_eq!(parsed.as_str(), raw.trim());
}

#[test]
fn unknown_mount_table_source_is_rejected() {
    assert!("fstab".parse::<MountTableSource>().is_err());
}

#[rstest]
#[tokio::test]
async fn direct_mount_round_trip(sim: SimulatedHosts) {
    let (device, mountpoint) = local_pair(&sim);
    assert!(!device.is_mounted().await);

    mountpoint.mount(&device).await.expect("mount");
    assert_eq!(
        sim.commands_of("mount").last().map(String::as_str),
        Some("mount -o rw,noatime -t ext4 -U 0f3c9a4e-5b1d-4c2e-9f7a-1234567890ab /mnt/backup")
    );
    assert!(device.is_mounted().await);
    assert!(mountpoint.is_active().await.expect("mount table"));
    assert_eq!(
        device.mountpoint().await.map(|mounted| mounted.path().to_owned()),
        Some(camino::Utf8PathBuf::from(TARGET))
    );

    device.unmount().await.expect("unmount");
    assert!(!device.is_mounted().await);
    assert!(!mountpoint.is_active().await.expect("mount table"));
    assert!(device.mountpoint().await.is_none());
}

#[rstest]
#[tokio::test]
async fn direct_mount_on_remote_host(sim: SimulatedHosts) {
    sim.add_block_device(&remote_a(), UUID);
    sim.add_directory(&remote_a(), TARGET);
    let device = device_on(executor(&sim), remote_a(), Arc::default());
    let mountpoint = mountpoint_on(executor(&sim), remote_a(), TARGET);

    device.mount(&mountpoint).await.expect("mount");
    assert!(sim.is_mount_target(&remote_a(), TARGET));
    assert!(
        sim.invocations()
            .iter()
            .all(|invocation| invocation.host == remote_a())
    );
    device.unmount().await.expect("unmount");
    assert!(!sim.is_mount_target(&remote_a(), TARGET));
}

#[rstest]
#[tokio::test]
async fn remote_device_is_bridged_to_local_mountpoint(sim: SimulatedHosts) {
    sim.add_block_device(&remote_a(), UUID);
    sim.add_directory(&Host::localhost(), TARGET);
    let device = device_on(executor(&sim), remote_a(), Arc::default());
    let mountpoint = mountpoint_on(executor(&sim), Host::localhost(), TARGET);

    device.mount(&mountpoint).await.expect("bridged mount");

    let temporaries = sim.directories_under(&remote_a(), DEFAULT_BRIDGE_ROOT);
    let [temporary] = temporaries.as_slice() else {
        panic!("expected one temporary mountpoint, got {temporaries:?}");
    };
    assert!(temporary.starts_with(&format!("{DEFAULT_BRIDGE_ROOT}/{UUID}-")));
    assert!(sim.is_mount_target(&remote_a(), temporary));
    assert_eq!(
        sim.mounts(&Host::localhost()).get(TARGET).map(String::as_str),
        Some(format!("backup@192.0.2.1:{temporary}").as_str())
    );
    assert!(sim.commands_of("sshfs").iter().all(|cmd| cmd.ends_with("-o idmap=user")));

    let temporary_mountpoint = mountpoint_on(executor(&sim), remote_a(), temporary);
    assert!(temporary_mountpoint.exists().await.expect("query"));

    sim.clear_log();
    device.unmount().await.expect("unmount");
    assert!(!temporary_mountpoint.exists().await.expect("query"));
    assert!(!sim.is_mount_target(&Host::localhost(), TARGET));
    assert!(!device.is_mounted().await);

    let teardown: Vec<String> = sim
        .commands()
        .into_iter()
        .filter(|command| command != "mount" && !command.starts_with("ls "))
        .collect();
    assert_eq!(teardown, vec![
        format!("fusermount -u {TARGET}"),
        format!("umount {temporary}"),
        format!("rmdir {temporary}"),
        format!("test -d {temporary}"),
    ]);
}

#[rstest]
#[tokio::test]
async fn interrupted_bridge_teardown_resumes_on_retry(sim: SimulatedHosts) {
    sim.add_block_device(&remote_a(), UUID);
    sim.add_directory(&Host::localhost(), TARGET);
    let device = device_on(executor(&sim), remote_a(), Arc::default());
    let mountpoint = mountpoint_on(executor(&sim), Host::localhost(), TARGET);
    device.mount(&mountpoint).await.expect("bridged mount");
    let temporaries = sim.directories_under(&remote_a(), DEFAULT_BRIDGE_ROOT);
    let [temporary] = temporaries.as_slice() else {
        panic!("expected one temporary mountpoint, got {temporaries:?}");
    };

    sim.mark_busy(&remote_a(), temporary);
    let err = device.unmount().await.expect_err("temporary is busy");
    assert!(
        matches!(&err, MountError::TargetBusy { path, .. } if path == temporary),
        "got {err}"
    );
    assert!(!sim.is_mount_target(&Host::localhost(), TARGET));
    assert!(sim.is_mount_target(&remote_a(), temporary));
    assert!(device.is_mounted().await);

    sim.clear_busy(&remote_a(), temporary);
    sim.clear_log();
    device.unmount().await.expect("retry finishes the teardown");
    assert!(sim.commands_of("fusermount").is_empty());
    assert_eq!(sim.commands_of("umount"), vec![format!("umount {temporary}")]);
    assert!(!sim.is_mount_target(&remote_a(), temporary));
    assert!(sim.directories_under(&remote_a(), DEFAULT_BRIDGE_ROOT).is_empty());
    assert!(!device.is_mounted().await);
}

#[rstest]
#[tokio::test]
async fn local_device_is_bridged_to_remote_mountpoint(sim: SimulatedHosts) {
    sim.add_block_device(&Host::localhost(), UUID);
    sim.add_directory(&remote_a(), TARGET);
    sim.add_alias(&bridge_address(), &Host::localhost());
    let device = device_on(executor(&sim), Host::localhost(), settings_with_bridge());
    let mountpoint = mountpoint_on(executor(&sim), remote_a(), TARGET);

    device.mount(&mountpoint).await.expect("bridged mount");

    let temporaries = sim.directories_under(&Host::localhost(), DEFAULT_BRIDGE_ROOT);
    let [temporary] = temporaries.as_slice() else {
        panic!("expected one temporary mountpoint, got {temporaries:?}");
    };
    assert_eq!(
        sim.mounts(&remote_a()).get(TARGET).map(String::as_str),
        Some(format!("backup@192.0.2.50:{temporary}").as_str())
    );
    let sshfs = sim
        .invocations()
        .into_iter()
        .find(|invocation| invocation.args.first().map(String::as_str) == Some("sshfs"))
        .expect("bridge command");
    assert_eq!(sshfs.host, remote_a());

    device.unmount().await.expect("unmount");
    assert!(sim.directories_under(&Host::localhost(), DEFAULT_BRIDGE_ROOT).is_empty());
    assert!(!sim.is_mount_target(&remote_a(), TARGET));
}

#[rstest]
#[tokio::test]
async fn bridge_without_address_fails_before_any_command(sim: SimulatedHosts) {
    sim.add_block_device(&Host::localhost(), UUID);
    sim.add_directory(&remote_a(), TARGET);
    let device = device_on(executor(&sim), Host::localhost(), Arc::default());
    let mountpoint = mountpoint_on(executor(&sim), remote_a(), TARGET);

    let err = device.mount(&mountpoint).await.expect_err("no address");
    assert!(matches!(err, MountError::MissingBridgeAddress { .. }), "got {err}");
    assert!(sim.invocations().is_empty());
}

#[tokio::test]
async fn two_remote_hosts_are_refused_without_executing() {
    let scripted = ScriptedExecutor::new();
    let shared: Arc<dyn Executor> = Arc::new(scripted.clone());
    let device = device_on(Arc::clone(&shared), remote_a(), Arc::default());
    let mountpoint = mountpoint_on(shared, remote_b(), TARGET);

    let err = device.mount(&mountpoint).await.expect_err("unsupported");
    assert_eq!(err, MountError::UnsupportedHostPair {
        device_host: String::from("192.0.2.1"),
        mount_host: String::from("192.0.2.2"),
    });
    assert!(scripted.invocations().is_empty());
}

#[tokio::test]
async fn active_target_is_refused_before_mounting() {
    let scripted = ScriptedExecutor::new();
    scripted.push_success(); // test -b
    scripted.push_success(); // test -d
    scripted.push_output(0, format!("/dev/sdc1 on {TARGET} type ext4 (rw)\n"), "");
    let shared: Arc<dyn Executor> = Arc::new(scripted.clone());
    let device = device_on(Arc::clone(&shared), Host::localhost(), Arc::default());
    let mountpoint = mountpoint_on(shared, Host::localhost(), TARGET);

    let err = mountpoint.mount(&device).await.expect_err("busy");
    assert!(matches!(err, MountError::TargetBusy { .. }), "got {err}");
    assert_eq!(scripted.commands(), vec![
        format!("test -b /dev/disk/by-uuid/{UUID}"),
        format!("test -d {TARGET}"),
        String::from("mount"),
    ]);
    assert!(!device.is_mounted().await);
}

#[rstest]
#[tokio::test]
async fn non_empty_target_is_refused(sim: SimulatedHosts) {
    let (device, mountpoint) = local_pair(&sim);
    sim.add_file(&Host::localhost(), "/mnt/backup/stale.tar");

    let err = device.mount(&mountpoint).await.expect_err("not empty");
    assert!(matches!(err, MountError::TargetNotEmpty { .. }), "got {err}");
    assert!(sim.commands_of("mount").iter().all(|cmd| cmd == "mount"));
}

#[rstest]
#[tokio::test]
async fn missing_target_is_created_only_when_allowed(sim: SimulatedHosts) {
    sim.add_block_device(&Host::localhost(), UUID);
    let device = device_on(executor(&sim), Host::localhost(), Arc::default());
    let strict = mountpoint_on(executor(&sim), Host::localhost(), TARGET);

    let err = device.mount(&strict).await.expect_err("missing");
    assert!(matches!(err, MountError::TargetMissing { .. }), "got {err}");
    assert!(sim.commands_of("mkdir").is_empty());

    let lenient = Mountpoint::builder(Host::localhost(), TARGET)
        .user(USER)
        .create_if_missing(true)
        .build(executor(&sim))
        .expect("mountpoint");
    device.mount(&lenient).await.expect("created and mounted");
    assert_eq!(sim.commands_of("mkdir"), vec![format!("mkdir -p {TARGET}")]);
    assert!(sim.is_mount_target(&Host::localhost(), TARGET));
    assert_eq!(
        sim.commands_of("mount").last().map(String::as_str),
        Some("mount -o defaults -t ext4 -U 0f3c9a4e-5b1d-4c2e-9f7a-1234567890ab /mnt/backup")
    );
}

#[rstest]
#[tokio::test]
async fn unavailable_device_is_refused(sim: SimulatedHosts) {
    sim.add_directory(&Host::localhost(), TARGET);
    let device = device_on(executor(&sim), Host::localhost(), Arc::default());
    let mountpoint = mountpoint_on(executor(&sim), Host::localhost(), TARGET);

    assert!(!device.is_available().await.expect("query"));
    let err = device.mount(&mountpoint).await.expect_err("no device");
    assert!(matches!(err, MountError::NotAvailable { .. }), "got {err}");
}

#[rstest]
#[tokio::test]
async fn second_mount_is_refused(sim: SimulatedHosts) {
    let (device, mountpoint) = local_pair(&sim);
    device.mount(&mountpoint).await.expect("first mount");
    sim.clear_log();

    let err = device.mount(&mountpoint).await.expect_err("already mounted");
    assert!(matches!(err, MountError::AlreadyMounted { .. }), "got {err}");
    assert!(sim.invocations().is_empty());
}

#[rstest]
#[tokio::test]
async fn unmounting_an_unmounted_device_fails(sim: SimulatedHosts) {
    let (device, _) = local_pair(&sim);
    let err = device.unmount().await.expect_err("not mounted");
    assert!(matches!(err, MountError::NotMounted { .. }), "got {err}");
}

#[rstest]
#[tokio::test]
async fn busy_unmount_keeps_device_mounted(sim: SimulatedHosts) {
    let (device, mountpoint) = local_pair(&sim);
    device.mount(&mountpoint).await.expect("mount");
    sim.mark_busy(&Host::localhost(), TARGET);

    let err = device.unmount().await.expect_err("busy");
    assert!(matches!(err, MountError::TargetBusy { .. }), "got {err}");
    assert!(device.is_mounted().await);
}

#[rstest]
#[case(1, "", true)]
#[case(32, "umount: /mnt/backup: target is busy.", true)]
#[case(32, "umount: /mnt/backup: not mounted.", false)]
#[tokio::test]
async fn umount_exit_codes(#[case] code: i32, #[case] stderr: &str, #[case] busy: bool) {
    let scripted = ScriptedExecutor::new();
    scripted.push_output(0, format!("/dev/sdc1 on {TARGET} type ext4 (rw)\n"), "");
    scripted.push_output(code, "", stderr);
    let mountpoint = mountpoint_on(Arc::new(scripted.clone()), Host::localhost(), TARGET);

    let err = mountpoint.unmount().await.expect_err("umount fails");
    if busy {
        assert!(matches!(err, MountError::TargetBusy { .. }), "got {err}");
    } else {
        assert!(
            matches!(err, MountError::CommandFailed { exit_code: 32, .. }),
            "got {err}"
        );
    }
    assert_eq!(scripted.commands().last().map(String::as_str), Some("umount /mnt/backup"));
}

#[rstest]
#[tokio::test]
async fn failed_bridge_rolls_back_temporary_mount(sim: SimulatedHosts) {
    sim.add_block_device(&remote_a(), UUID);
    sim.add_directory(&Host::localhost(), TARGET);
    sim.fail_program("sshfs");
    let device = device_on(executor(&sim), remote_a(), Arc::default());
    let mountpoint = mountpoint_on(executor(&sim), Host::localhost(), TARGET);

    let err = device.mount(&mountpoint).await.expect_err("bridge fails");
    assert!(matches!(err, MountError::CommandFailed { .. }), "got {err}");
    assert!(!device.is_mounted().await);
    assert!(sim.directories_under(&remote_a(), DEFAULT_BRIDGE_ROOT).is_empty());
    assert!(sim.mounts(&remote_a()).is_empty());
}

#[rstest]
#[tokio::test]
async fn remove_checks_activity_and_contents(sim: SimulatedHosts) {
    let (device, mountpoint) = local_pair(&sim);
    device.mount(&mountpoint).await.expect("mount");
    let err = mountpoint.remove().await.expect_err("active");
    assert!(matches!(err, MountError::TargetBusy { .. }), "got {err}");
    device.unmount().await.expect("unmount");

    sim.add_file(&Host::localhost(), "/mnt/backup/keep");
    let err = mountpoint.remove().await.expect_err("not empty");
    assert!(matches!(err, MountError::TargetNotEmpty { .. }), "got {err}");

    let empty = mountpoint_on(executor(&sim), Host::localhost(), "/mnt/empty");
    empty.create(false).await.expect("mkdir");
    empty.create(false).await.expect("idempotent");
    assert_eq!(sim.commands_of("mkdir"), vec![String::from("mkdir /mnt/empty")]);
    empty.remove().await.expect("remove");
    assert!(!empty.exists().await.expect("query"));
}

#[rstest]
#[case(false, "--bind")]
#[case(true, "--rbind")]
#[tokio::test]
async fn bind_exposes_active_mountpoint(
    sim: SimulatedHosts,
    #[case] submounts: bool,
    #[case] flag: &str,
) {
    let (device, mountpoint) = local_pair(&sim);
    let target = mountpoint_on(executor(&sim), Host::localhost(), "/srv/view");
    let err = mountpoint.bind(&target, submounts).await.expect_err("inactive");
    assert!(matches!(err, MountError::NotActive { .. }), "got {err}");

    device.mount(&mountpoint).await.expect("mount");
    let err = mountpoint.bind(&target, submounts).await.expect_err("target missing");
    assert!(matches!(err, MountError::TargetMissing { .. }), "got {err}");

    sim.add_directory(&Host::localhost(), "/srv/view");
    mountpoint.bind(&target, submounts).await.expect("bind");
    assert_eq!(
        sim.commands_of("mount").last().map(String::as_str),
        Some(format!("mount {flag} /mnt/backup /srv/view").as_str())
    );
    assert!(target.is_active().await.expect("mount table"));
}

#[rstest]
#[tokio::test]
async fn bind_across_hosts_is_refused(sim: SimulatedHosts) {
    let source = mountpoint_on(executor(&sim), Host::localhost(), TARGET);
    let target = mountpoint_on(executor(&sim), remote_a(), TARGET);
    let err = source.bind(&target, false).await.expect_err("host mismatch");
    assert!(matches!(err, MountError::HostMismatch { .. }), "got {err}");
    assert!(sim.invocations().is_empty());
}

#[rstest]
#[tokio::test]
async fn remount_uses_stored_or_new_options(sim: SimulatedHosts) {
    let (device, mountpoint) = local_pair(&sim);
    let err = mountpoint.remount(None).await.expect_err("inactive");
    assert!(matches!(err, MountError::NotActive { .. }), "got {err}");

    device.mount(&mountpoint).await.expect("mount");
    mountpoint.remount(None).await.expect("remount");
    let read_only = [String::from("ro")];
    mountpoint.remount(Some(read_only.as_slice())).await.expect("remount ro");

    let remounts: Vec<String> = sim
        .commands_of("mount")
        .into_iter()
        .filter(|command| command.contains("remount"))
        .collect();
    assert_eq!(remounts, vec![
        String::from("mount -o rw,noatime,remount /mnt/backup"),
        String::from("mount -o ro,remount /mnt/backup"),
    ]);
}

#[rstest]
#[tokio::test]
async fn remount_of_missing_directory_fails(sim: SimulatedHosts) {
    let mountpoint = mountpoint_on(executor(&sim), Host::localhost(), "/nowhere");
    let err = mountpoint.remount(None).await.expect_err("missing");
    assert!(matches!(err, MountError::TargetMissing { .. }), "got {err}");
}

#[rstest]
#[tokio::test]
async fn proc_mounts_source_is_honoured(sim: SimulatedHosts) {
    sim.add_mount(&Host::localhost(), "/dev/sdb1", "/srv/back ups", "ext4");
    let settings = Arc::new(MountSettings {
        mount_table: MountTableSource::ProcMounts,
        ..MountSettings::default()
    });
    let mountpoint = Mountpoint::builder(Host::localhost(), "/srv/back ups/")
        .user(USER)
        .settings(settings)
        .build(executor(&sim))
        .expect("mountpoint");

    assert!(mountpoint.is_active().await.expect("mount table"));
    assert_eq!(sim.commands(), vec![String::from("cat /proc/mounts")]);
}
