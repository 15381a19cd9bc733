//! Persistent remote shell sessions.
//!
//! A [`RemoteSession`] owns one transport subprocess running an interactive
//! shell on another host. Commands are written to the shell's stdin and their
//! completion is recognised by a per-command marker line carrying the exit
//! code (see [`framing`]). Waiting is bounded by deadlines raced against pipe
//! readiness, so a silent host never stalls the caller past its timeout.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::time::{Instant, sleep_until, timeout};
use tracing::{debug, info, warn};

use crate::exec::{ExecError, ExecOutput, local};
use crate::host::Host;
use crate::marker::{MARKER_LENGTH, generate_marker};

pub mod framing;
mod reader;
mod transport;

pub use reader::LineReader;
pub use transport::{DEFAULT_SSH_PORT, SshTransport};

use framing::{execute_line, find_completion, handshake_command, is_handshake_line};

/// Time granted to stderr after a completion line so late diagnostics of
/// the same command are not attributed to the next one.
const STDERR_SETTLE: Duration = Duration::from_millis(20);

/// Identity of a session: where it goes and as whom.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct SessionTarget {
    /// Remote host running the shell.
    pub host: Host,
    /// Local user owning the transport process.
    pub local_user: String,
    /// User the transport authenticates as.
    pub remote_user: String,
}

impl SessionTarget {
    /// Creates a target description.
    #[must_use]
    pub fn new(host: Host, local_user: impl Into<String>, remote_user: impl Into<String>) -> Self {
        Self {
            host,
            local_user: local_user.into(),
            remote_user: remote_user.into(),
        }
    }
}

/// Lifecycle of a [`RemoteSession`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionState {
    /// No transport process is running.
    Disconnected,
    /// The transport was spawned and the handshake is pending.
    Connecting,
    /// The handshake completed; commands may be executed.
    Connected,
}

#[derive(Debug)]
struct ShellProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: LineReader<ChildStdout>,
    stderr: LineReader<ChildStderr>,
    /// Marker of the latest command whose wait timed out. Its output is
    /// still on its way and belongs to nobody.
    abandoned: Option<String>,
}

impl ShellProcess {
    /// Waits for either pipe to deliver bytes. Returns `false` when the
    /// deadline passes first.
    async fn wait_readable(&mut self, deadline: Instant) -> std::io::Result<bool> {
        let Self { stdout, stderr, .. } = self;
        let stdout_open = !stdout.is_eof();
        let stderr_open = !stderr.is_eof();
        tokio::select! {
            res = stdout.fill(), if stdout_open => res.map(|_| true),
            res = stderr.fill(), if stderr_open => res.map(|_| true),
            () = sleep_until(deadline) => Ok(false),
        }
    }

    /// Drops complete stdout lines up to and including the completion line
    /// of an abandoned command. Returns `true` once that line was seen.
    fn skip_abandoned(&mut self, host: &str) -> bool {
        let Some(marker) = self.abandoned.as_deref() else {
            return true;
        };
        let tag = format!("@{marker}@");
        while let Some(line) = self.stdout.next_line() {
            if line.starts_with(&tag) {
                debug!(host = %host, "abandoned command finished");
                self.abandoned = None;
                return true;
            }
            debug!(host = %host, stdout = %line, "discarding abandoned output");
        }
        false
    }

    async fn settle_stderr(&mut self) {
        while let Ok(Ok(read)) = timeout(STDERR_SETTLE, self.stderr.fill()).await {
            if read == 0 {
                break;
            }
        }
    }
}

/// One interactive shell on a remote host, driven through its standard
/// streams.
#[derive(Debug)]
pub struct RemoteSession {
    target: SessionTarget,
    transport: SshTransport,
    state: SessionState,
    shell: Option<ShellProcess>,
}

impl RemoteSession {
    /// Creates a disconnected session.
    #[must_use]
    pub const fn new(target: SessionTarget, transport: SshTransport) -> Self {
        Self {
            target,
            transport,
            state: SessionState::Disconnected,
            shell: None,
        }
    }

    /// Returns who and where this session connects to.
    #[must_use]
    pub const fn target(&self) -> &SessionTarget {
        &self.target
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Returns `true` once the handshake has completed.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    /// Returns `true` when connected and the transport process is still
    /// running.
    pub fn is_alive(&mut self) -> bool {
        if !self.is_connected() {
            return false;
        }
        self.shell
            .as_mut()
            .is_some_and(|shell| matches!(shell.child.try_wait(), Ok(None)))
    }

    /// Spawns the transport and waits for the handshake line. Does nothing
    /// when already connected.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::Timeout`] when no handshake arrives in time,
    /// [`ExecError::ConnectionRefused`] when the host wrote to stderr before
    /// the handshake, and [`ExecError::Spawn`] or
    /// [`ExecError::SessionClosed`] when the transport cannot run. The session
    /// is disconnected after any failure.
    pub async fn connect(&mut self, timeout: Duration, remote_shell: &str) -> Result<(), ExecError> {
        if self.is_connected() {
            return Ok(());
        }
        self.state = SessionState::Connecting;
        match self.open(timeout, remote_shell).await {
            Ok(()) => {
                self.state = SessionState::Connected;
                info!(
                    host = %self.target.host,
                    local_user = %self.target.local_user,
                    remote_user = %self.target.remote_user,
                    "session connected"
                );
                Ok(())
            }
            Err(err) => {
                warn!(host = %self.target.host, error = %err, "session connect failed");
                self.disconnect().await;
                Err(err)
            }
        }
    }

    async fn open(&mut self, timeout: Duration, remote_shell: &str) -> Result<(), ExecError> {
        let marker = generate_marker(MARKER_LENGTH);
        let handshake = handshake_command(&marker, remote_shell);
        let host = self.target.host.to_string();
        let shell = self.spawn(&handshake)?;
        let deadline = Instant::now() + timeout;
        let mut early_stderr: Vec<String> = Vec::new();

        loop {
            while let Some(line) = shell.stderr.next_line() {
                if !line.trim().is_empty() {
                    early_stderr.push(line);
                }
            }
            while let Some(line) = shell.stdout.next_line() {
                if is_handshake_line(&line, &marker) {
                    let partial = shell.stderr.take_all();
                    if !partial.trim().is_empty() {
                        early_stderr.push(partial);
                    }
                    if early_stderr.is_empty() {
                        return Ok(());
                    }
                    return Err(ExecError::ConnectionRefused {
                        host,
                        message: early_stderr.join("\n"),
                    });
                }
                debug!(host = %host, line = %line, "discarding pre-handshake output");
            }
            if shell.stdout.is_eof() {
                early_stderr.push(shell.stderr.take_all());
                return Err(ExecError::SessionClosed {
                    host,
                    stderr: early_stderr.join("\n").trim().to_owned(),
                });
            }
            let progressed = shell
                .wait_readable(deadline)
                .await
                .map_err(|err| ExecError::Io {
                    host: host.clone(),
                    message: err.to_string(),
                })?;
            if !progressed {
                return Err(ExecError::Timeout {
                    host,
                    operation: String::from("connect"),
                    timeout,
                });
            }
        }
    }

    fn spawn(&mut self, handshake: &str) -> Result<&mut ShellProcess, ExecError> {
        let program = self.transport.program.clone();
        let spawn_error = |message: String| ExecError::Spawn {
            program: program.clone(),
            message,
        };

        let mut command = Command::new(&self.transport.program);
        command
            .args(self.transport.args(&self.target, handshake))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(uid) = local::switch_uid(&self.target.local_user)? {
            command.uid(uid);
        }

        let mut child = command.spawn().map_err(|err| spawn_error(err.to_string()))?;
        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(spawn_error(String::from("standard streams were not piped")));
        };

        Ok(self.shell.insert(ShellProcess {
            child,
            stdin,
            stdout: LineReader::new(stdout),
            stderr: LineReader::new(stderr),
            abandoned: None,
        }))
    }

    /// Runs `command` in the remote shell and waits for its completion line.
    ///
    /// A timeout only abandons the local wait; the command keeps running in
    /// the remote shell until the session is disconnected. Whatever it prints
    /// afterwards is discarded by the next call, not returned with it.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::NotConnected`] before a successful
    /// [`RemoteSession::connect`], [`ExecError::Timeout`] when no completion
    /// arrives in time, [`ExecError::SessionClosed`] when the shell exits, and
    /// [`ExecError::Protocol`] for an unreadable exit code.
    pub async fn execute(
        &mut self,
        command: &str,
        timeout: Duration,
    ) -> Result<ExecOutput, ExecError> {
        let host = self.target.host.to_string();
        if !self.is_connected() {
            return Err(ExecError::NotConnected { host });
        }
        let Some(shell) = self.shell.as_mut() else {
            return Err(ExecError::NotConnected { host });
        };
        let io_error = |err: std::io::Error| ExecError::Io {
            host: host.clone(),
            message: err.to_string(),
        };

        if shell.abandoned.is_none() {
            let stale = shell.stdout.take_all();
            if !stale.is_empty() {
                debug!(host = %host, stdout = %stale, "discarding unattributed stdout");
            }
        }
        let stale = shell.stderr.take_all();
        if !stale.is_empty() {
            debug!(host = %host, stderr = %stale, "discarding unattributed stderr");
        }

        let marker = generate_marker(MARKER_LENGTH);
        shell
            .stdin
            .write_all(execute_line(command, &marker).as_bytes())
            .await
            .map_err(io_error)?;
        shell.stdin.flush().await.map_err(io_error)?;

        let deadline = Instant::now() + timeout;
        loop {
            let completion = if shell.skip_abandoned(&host) {
                find_completion(&shell.stdout.buffer(), &marker).map_err(|line| {
                    ExecError::Protocol {
                        host: host.clone(),
                        line,
                    }
                })?
            } else {
                None
            };
            if let Some(done) = completion {
                shell.stdout.take_all();
                shell.settle_stderr().await;
                return Ok(ExecOutput {
                    exit_code: done.exit_code,
                    stdout: done.stdout,
                    stderr: shell.stderr.take_all(),
                });
            }
            if shell.stdout.is_eof() {
                let stderr = shell.stderr.take_all();
                self.disconnect().await;
                return Err(ExecError::SessionClosed { host, stderr });
            }
            if !shell.wait_readable(deadline).await.map_err(io_error)? {
                warn!(host = %host, command, ?timeout, "remote command timed out");
                shell.abandoned = Some(marker);
                return Err(ExecError::Timeout {
                    host,
                    operation: command.to_owned(),
                    timeout,
                });
            }
        }
    }

    /// Terminates the transport process, if any. Always leaves the session
    /// disconnected.
    pub async fn disconnect(&mut self) {
        if let Some(mut shell) = self.shell.take() {
            if let Err(err) = shell.child.kill().await {
                debug!(host = %self.target.host, error = %err, "transport already exited");
            }
            info!(host = %self.target.host, "session disconnected");
        }
        self.state = SessionState::Disconnected;
    }
}
