//! Test support utilities shared across unit and integration tests.
//!
//! [`ScriptedExecutor`] replays canned results in FIFO order.
//! [`SimulatedHosts`] keeps an in-memory model of directories, block devices
//! and mount tables on several hosts and answers the commands the mount layer
//! issues, so whole mount and bridge sequences can run without root.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::ffi::OsString;
use std::os::unix::fs::PermissionsExt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::{env, fs, io};

use camino::{Utf8Path, Utf8PathBuf};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use uuid::Uuid;

use crate::exec::{ExecError, ExecFuture, ExecOutput, Executor, Invocation};
use crate::host::Host;
use crate::session::SshTransport;

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn output(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> ExecOutput {
    ExecOutput {
        exit_code,
        stdout: stdout.into(),
        stderr: stderr.into(),
    }
}

/// Scripted executor that returns pre-seeded results in FIFO order and
/// records every invocation.
#[derive(Clone, Debug, Default)]
pub struct ScriptedExecutor {
    responses: Arc<Mutex<VecDeque<Result<ExecOutput, ExecError>>>>,
    invocations: Arc<Mutex<Vec<Invocation>>>,
}

impl ScriptedExecutor {
    /// Creates an executor with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<Invocation> {
        locked(&self.invocations).clone()
    }

    /// Returns the recorded command lines, arguments joined by spaces.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        locked(&self.invocations)
            .iter()
            .map(|invocation| invocation.args.join(" "))
            .collect()
    }

    /// Pushes a successful exit with empty output.
    pub fn push_success(&self) {
        self.push_output(0, "", "");
    }

    /// Pushes a specific exit code with empty output.
    pub fn push_exit_code(&self, code: i32) {
        self.push_output(code, "", "");
    }

    /// Pushes an explicit command output.
    pub fn push_output(&self, code: i32, stdout: impl Into<String>, stderr: impl Into<String>) {
        locked(&self.responses).push_back(Ok(output(code, stdout, stderr)));
    }

    /// Pushes a dispatch failure.
    pub fn push_error(&self, err: ExecError) {
        locked(&self.responses).push_back(Err(err));
    }
}

impl Executor for ScriptedExecutor {
    fn execute(&self, invocation: Invocation) -> ExecFuture<'_> {
        let program = invocation.args.first().cloned().unwrap_or_default();
        locked(&self.invocations).push(invocation);
        let response = locked(&self.responses)
            .pop_front()
            .unwrap_or_else(|| {
                Err(ExecError::Spawn {
                    program,
                    message: String::from("no scripted response available"),
                })
            });
        Box::pin(async move { response })
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
struct MountEntry {
    source: String,
    target: String,
    fstype: String,
    options: String,
}

#[derive(Clone, Debug)]
struct HostState {
    directories: BTreeSet<String>,
    files: BTreeSet<String>,
    devices: BTreeSet<String>,
    mounts: Vec<MountEntry>,
    busy: BTreeSet<String>,
}

impl Default for HostState {
    fn default() -> Self {
        Self {
            directories: BTreeSet::from([String::from("/")]),
            files: BTreeSet::new(),
            devices: BTreeSet::new(),
            mounts: Vec::new(),
            busy: BTreeSet::new(),
        }
    }
}

const DEVICE_DIR: &str = "/dev/disk/by-uuid/";

fn normalise(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        String::from("/")
    } else {
        trimmed.to_owned()
    }
}

fn parent_of(path: &str) -> Option<String> {
    if path == "/" {
        return None;
    }
    path.rsplit_once('/')
        .map(|(parent, _)| normalise(parent))
}

fn child_name<'a>(parent: &str, path: &'a str) -> Option<&'a str> {
    let rest = if parent == "/" {
        path.strip_prefix('/')?
    } else {
        path.strip_prefix(parent)?.strip_prefix('/')?
    };
    (!rest.is_empty() && !rest.contains('/')).then_some(rest)
}

fn escape_proc(field: &str) -> String {
    field
        .replace('\\', "\\134")
        .replace(' ', "\\040")
        .replace('\t', "\\011")
        .replace('\n', "\\012")
}

impl HostState {
    fn is_directory(&self, path: &str) -> bool {
        self.directories.contains(&normalise(path))
    }

    fn is_device(&self, path: &str) -> bool {
        path.strip_prefix(DEVICE_DIR)
            .is_some_and(|uuid| self.devices.contains(uuid))
    }

    fn exists(&self, path: &str) -> bool {
        self.is_directory(path) || self.files.contains(&normalise(path)) || self.is_device(path)
    }

    fn mount_index(&self, path: &str) -> Option<usize> {
        let target = normalise(path);
        self.mounts.iter().rposition(|entry| entry.target == target)
    }

    fn add_directory_all(&mut self, path: &str) {
        let mut current = Some(normalise(path));
        while let Some(dir) = current {
            current = parent_of(&dir);
            self.directories.insert(dir);
        }
    }

    fn children(&self, path: &str) -> Vec<String> {
        let parent = normalise(path);
        let dirs = self
            .directories
            .iter()
            .filter_map(|dir| child_name(&parent, dir).map(|name| format!("{name}/")));
        let files = self
            .files
            .iter()
            .filter_map(|file| child_name(&parent, file).map(str::to_owned));
        let mut entries: Vec<String> = dirs.chain(files).collect();
        entries.sort();
        entries
    }

    fn test(&self, flag: &str, path: &str) -> ExecOutput {
        let found = match flag {
            "-b" => self.is_device(path),
            "-d" => self.is_directory(path),
            "-f" => self.files.contains(&normalise(path)),
            "-e" => self.exists(path),
            _ => return output(2, "", format!("test: unknown flag {flag}")),
        };
        output(i32::from(!found), "", "")
    }

    fn list(&self, path: &str) -> ExecOutput {
        if !self.is_directory(path) {
            return output(
                2,
                "",
                format!("ls: cannot access '{path}': No such file or directory\n"),
            );
        }
        let listing: String = self
            .children(path)
            .into_iter()
            .map(|entry| format!("{entry}\n"))
            .collect();
        output(0, listing, "")
    }

    fn mkdir(&mut self, path: &str, parents: bool) -> ExecOutput {
        if parents {
            self.add_directory_all(path);
            return output(0, "", "");
        }
        if self.exists(path) {
            return output(1, "", format!("mkdir: cannot create directory '{path}': File exists\n"));
        }
        if !parent_of(&normalise(path)).is_some_and(|parent| self.is_directory(&parent)) {
            return output(
                1,
                "",
                format!("mkdir: cannot create directory '{path}': No such file or directory\n"),
            );
        }
        self.directories.insert(normalise(path));
        output(0, "", "")
    }

    fn rmdir(&mut self, path: &str) -> ExecOutput {
        if !self.is_directory(path) {
            return output(1, "", format!("rmdir: failed to remove '{path}': No such file or directory\n"));
        }
        if self.mount_index(path).is_some() {
            return output(1, "", format!("rmdir: failed to remove '{path}': Device or resource busy\n"));
        }
        if !self.children(path).is_empty() {
            return output(1, "", format!("rmdir: failed to remove '{path}': Directory not empty\n"));
        }
        self.directories.remove(&normalise(path));
        output(0, "", "")
    }

    fn rm_recursive(&mut self, path: &str) -> ExecOutput {
        let root = normalise(path);
        if !self.exists(&root) {
            return output(1, "", format!("rm: cannot remove '{path}': No such file or directory\n"));
        }
        let prefix = format!("{root}/");
        let doomed = |entry: &String| *entry == root || entry.starts_with(&prefix);
        self.directories.retain(|entry| !doomed(entry));
        self.files.retain(|entry| !doomed(entry));
        output(0, "", "")
    }

    fn mount_listing(&self) -> ExecOutput {
        let listing: String = self
            .mounts
            .iter()
            .map(|entry| {
                format!(
                    "{} on {} type {} ({})\n",
                    entry.source, entry.target, entry.fstype, entry.options
                )
            })
            .collect();
        output(0, listing, "")
    }

    fn proc_mounts(&self) -> ExecOutput {
        let listing: String = self
            .mounts
            .iter()
            .map(|entry| {
                format!(
                    "{} {} {} {} 0 0\n",
                    escape_proc(&entry.source),
                    escape_proc(&entry.target),
                    entry.fstype,
                    entry.options
                )
            })
            .collect();
        output(0, listing, "")
    }

    fn mount_device(&mut self, options: &str, fstype: &str, uuid: &str, path: &str) -> ExecOutput {
        let source = format!("{DEVICE_DIR}{uuid}");
        if !self.devices.contains(uuid) {
            return output(32, "", format!("mount: {path}: can't find UUID={uuid}.\n"));
        }
        if !self.is_directory(path) {
            return output(32, "", format!("mount: {path}: mount point does not exist.\n"));
        }
        if self.mounts.iter().any(|entry| entry.source == source) {
            return output(32, "", format!("mount: {path}: {source} already mounted.\n"));
        }
        let options = if options.is_empty() { "rw" } else { options };
        self.push_mount(&source, path, fstype, options);
        output(0, "", "")
    }

    fn bind(&mut self, source: &str, target: &str) -> ExecOutput {
        if !self.is_directory(source) || !self.is_directory(target) {
            return output(32, "", format!("mount: {target}: special device {source} does not exist.\n"));
        }
        self.push_mount(source, target, "none", "rw,bind");
        output(0, "", "")
    }

    fn remount(&mut self, options: &str, path: &str) -> ExecOutput {
        let Some(index) = self.mount_index(path) else {
            return output(32, "", format!("mount: {path}: mount point not mounted or bad option.\n"));
        };
        let stored = options
            .strip_suffix("remount")
            .map_or(options, |rest| rest.trim_end_matches(','));
        if let Some(entry) = self.mounts.get_mut(index) {
            entry.options = if stored.is_empty() {
                String::from("rw")
            } else {
                stored.to_owned()
            };
        }
        output(0, "", "")
    }

    fn unmount(&mut self, path: &str, program: &str) -> ExecOutput {
        let Some(index) = self.mount_index(path) else {
            return output(32, "", format!("{program}: {path}: not mounted.\n"));
        };
        if self.busy.contains(&normalise(path)) {
            return output(32, "", format!("{program}: {path}: target is busy.\n"));
        }
        self.mounts.remove(index);
        output(0, "", "")
    }

    fn push_mount(&mut self, source: &str, target: &str, fstype: &str, options: &str) {
        self.mounts.push(MountEntry {
            source: source.to_owned(),
            target: normalise(target),
            fstype: fstype.to_owned(),
            options: options.to_owned(),
        });
    }
}

#[derive(Debug, Default)]
struct World {
    hosts: HashMap<Host, HostState>,
    aliases: HashMap<Host, Host>,
    failing: HashSet<String>,
    log: Vec<Invocation>,
}

impl World {
    fn host(&mut self, host: &Host) -> &mut HostState {
        self.hosts.entry(host.clone()).or_default()
    }

    fn sshfs(&mut self, host: &Host, source: &str, path: &str) -> ExecOutput {
        let Some((_, location)) = source.split_once('@') else {
            return output(1, "", format!("sshfs: bad source {source}\n"));
        };
        let Some((ip, remote_path)) = location.split_once(':') else {
            return output(1, "", format!("sshfs: bad source {source}\n"));
        };
        let addressed = Host::new(ip);
        let remote = self.aliases.get(&addressed).cloned().unwrap_or(addressed);
        if !self.host(&remote).is_directory(remote_path) {
            return output(1, "", format!("{ip}:{remote_path}: No such file or directory\n"));
        }
        let state = self.host(host);
        if !state.is_directory(path) {
            return output(1, "", format!("fuse: bad mount point `{path}': No such file or directory\n"));
        }
        state.push_mount(source, path, "fuse.sshfs", "rw,nosuid,nodev,user_id=0,group_id=0");
        output(0, "", "")
    }

    fn run(&mut self, invocation: &Invocation) -> ExecOutput {
        let args: Vec<&str> = invocation.args.iter().map(String::as_str).collect();
        if let Some(program) = args
            .first()
            .filter(|program| self.failing.contains(**program))
        {
            return output(1, "", format!("{program}: simulated failure\n"));
        }
        let host = &invocation.host;
        match args.as_slice() {
            ["test", flag, path] => self.host(host).test(flag, path),
            ["ls", "-A", "-1", "-p", path] => self.host(host).list(path),
            ["mkdir", "-p", path] => self.host(host).mkdir(path, true),
            ["mkdir", path] => self.host(host).mkdir(path, false),
            ["rmdir", path] => self.host(host).rmdir(path),
            ["rm", "--recursive", path] => self.host(host).rm_recursive(path),
            ["mount"] => self.host(host).mount_listing(),
            ["cat", "/proc/mounts"] => self.host(host).proc_mounts(),
            ["mount", "-o", options, "-t", fstype, "-U", uuid, path] => {
                self.host(host).mount_device(options, fstype, uuid, path)
            }
            ["mount", "--bind" | "--rbind", source, target] => self.host(host).bind(source, target),
            ["mount", "-o", options, path] if options.ends_with("remount") => {
                self.host(host).remount(options, path)
            }
            ["umount", path] => self.host(host).unmount(path, "umount"),
            ["fusermount", "-u", path] => self.host(host).unmount(path, "fusermount"),
            ["sshfs", source, path, "-o", _] => self.sshfs(host, source, path),
            _ => output(127, "", format!("{}: command not found\n", args.join(" "))),
        }
    }
}

/// In-memory model of several hosts' filesystems and mount tables.
///
/// Implements [`Executor`] by interpreting `test`, `ls`, `mkdir`, `rmdir`,
/// `rm`, `mount`, `umount`, `sshfs`, `fusermount` and `cat /proc/mounts`.
/// Local hosts share one state, as they do on a real machine.
#[derive(Clone, Debug, Default)]
pub struct SimulatedHosts {
    world: Arc<Mutex<World>>,
}

impl SimulatedHosts {
    /// Creates hosts with nothing but a root directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a directory and all of its parents on `host`.
    pub fn add_directory(&self, host: &Host, path: &str) {
        locked(&self.world).host(host).add_directory_all(path);
    }

    /// Adds a regular file (and its parent directories) on `host`.
    pub fn add_file(&self, host: &Host, path: &str) {
        let mut world = locked(&self.world);
        let state = world.host(host);
        if let Some(parent) = parent_of(&normalise(path)) {
            state.add_directory_all(&parent);
        }
        state.files.insert(normalise(path));
    }

    /// Attaches a block device with `uuid` to `host`.
    pub fn add_block_device(&self, host: &Host, uuid: &str) {
        locked(&self.world).host(host).devices.insert(uuid.to_owned());
    }

    /// Records an existing mount of `source` on `target`.
    pub fn add_mount(&self, host: &Host, source: &str, target: &str, fstype: &str) {
        let mut world = locked(&self.world);
        let state = world.host(host);
        state.add_directory_all(target);
        state.push_mount(source, target, fstype, "rw");
    }

    /// Makes `address` reach `host` when used as a bridge source, as the
    /// externally visible address of this machine does.
    pub fn add_alias(&self, address: &Host, host: &Host) {
        locked(&self.world)
            .aliases
            .insert(address.clone(), host.clone());
    }

    /// Makes unmounting `target` on `host` fail with "target is busy".
    pub fn mark_busy(&self, host: &Host, target: &str) {
        locked(&self.world).host(host).busy.insert(normalise(target));
    }

    /// Lets `target` on `host` be unmounted again.
    pub fn clear_busy(&self, host: &Host, target: &str) {
        locked(&self.world).host(host).busy.remove(&normalise(target));
    }

    /// Makes every invocation of `program` exit with status 1.
    pub fn fail_program(&self, program: &str) {
        locked(&self.world).failing.insert(program.to_owned());
    }

    /// Returns `true` when `path` is a directory on `host`.
    #[must_use]
    pub fn directory_exists(&self, host: &Host, path: &str) -> bool {
        locked(&self.world).host(host).is_directory(path)
    }

    /// Returns `true` when something is mounted on `target` on `host`.
    #[must_use]
    pub fn is_mount_target(&self, host: &Host, target: &str) -> bool {
        locked(&self.world).host(host).mount_index(target).is_some()
    }

    /// Returns the mount targets on `host`, keyed by target, valued by
    /// source.
    #[must_use]
    pub fn mounts(&self, host: &Host) -> BTreeMap<String, String> {
        locked(&self.world)
            .host(host)
            .mounts
            .iter()
            .map(|entry| (entry.target.clone(), entry.source.clone()))
            .collect()
    }

    /// Returns every directory on `host` below `prefix`.
    #[must_use]
    pub fn directories_under(&self, host: &Host, prefix: &str) -> Vec<String> {
        let root = format!("{}/", normalise(prefix));
        locked(&self.world)
            .host(host)
            .directories
            .iter()
            .filter(|dir| dir.starts_with(&root))
            .cloned()
            .collect()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<Invocation> {
        locked(&self.world).log.clone()
    }

    /// Returns the recorded command lines, arguments joined by spaces.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        locked(&self.world)
            .log
            .iter()
            .map(|invocation| invocation.args.join(" "))
            .collect()
    }

    /// Returns recorded command lines whose program is `program`.
    #[must_use]
    pub fn commands_of(&self, program: &str) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|command| command.split(' ').next() == Some(program))
            .collect()
    }

    /// Forgets the recorded invocations.
    pub fn clear_log(&self) {
        locked(&self.world).log.clear();
    }
}

impl Executor for SimulatedHosts {
    fn execute(&self, invocation: Invocation) -> ExecFuture<'_> {
        let mut world = locked(&self.world);
        let result = world.run(&invocation);
        world.log.push(invocation);
        Box::pin(async move { Ok(result) })
    }
}

/// Script body that runs the last argument it receives with `/bin/sh`.
pub const FORWARD_LAST_ARGUMENT: &str =
    "for last in \"$@\"; do :; done\nexec /bin/sh -c \"$last\"\n";

/// Executable stand-in for `ssh`.
///
/// The script ignores the transport options and runs the handshake command
/// locally, so sessions can be exercised without a network. It is deleted on
/// drop.
#[derive(Debug)]
pub struct FakeTransport {
    path: Utf8PathBuf,
}

impl FakeTransport {
    /// Creates a script that forwards to `/bin/sh`.
    ///
    /// # Errors
    ///
    /// Returns an error when the script cannot be written.
    pub fn forwarding() -> io::Result<Self> {
        Self::with_body(FORWARD_LAST_ARGUMENT)
    }

    /// Creates a `/bin/sh` script with `body` in the temporary directory.
    ///
    /// # Errors
    ///
    /// Returns an error when the temporary directory is not UTF-8 or the
    /// script cannot be written.
    pub fn with_body(body: &str) -> io::Result<Self> {
        let dir = Utf8PathBuf::from_path_buf(env::temp_dir())
            .map_err(|_| io::Error::other("temporary directory is not UTF-8"))?;
        let path = dir.join(format!("autobackup-fake-ssh-{}", Uuid::new_v4()));
        fs::write(&path, format!("#!/bin/sh\n{body}"))?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
        Ok(Self { path })
    }

    /// Returns the script location.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Returns a transport that spawns this script instead of `ssh`.
    #[must_use]
    pub fn transport(&self) -> SshTransport {
        SshTransport {
            program: self.path.to_string(),
            ..SshTransport::default()
        }
    }
}

impl Drop for FakeTransport {
    fn drop(&mut self) {
        fs::remove_file(&self.path).ok();
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: AsyncMutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
