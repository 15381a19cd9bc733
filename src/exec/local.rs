//! Direct subprocess execution on the controlling machine.

use std::process::Stdio;
use std::time::Duration;

use nix::unistd::{User, geteuid};
use tokio::process::Command;
use tracing::debug;

use super::{ExecError, ExecOutput, Invocation};

/// Returns the name of the user this process runs as.
///
/// # Errors
///
/// Returns [`ExecError::UnknownUser`] when the effective uid has no passwd
/// entry.
pub fn current_user() -> Result<String, ExecError> {
    let uid = geteuid();
    match User::from_uid(uid) {
        Ok(Some(user)) => Ok(user.name),
        Ok(None) | Err(_) => Err(ExecError::UnknownUser {
            user: uid.to_string(),
        }),
    }
}

/// Resolves the uid a child must switch to in order to run as `user`.
///
/// Returns `None` when `user` is already the effective user.
pub(crate) fn switch_uid(user: &str) -> Result<Option<u32>, ExecError> {
    let unknown = || ExecError::UnknownUser {
        user: user.to_owned(),
    };
    let entry = User::from_name(user).map_err(|_| unknown())?.ok_or_else(unknown)?;
    if entry.uid == geteuid() {
        return Ok(None);
    }
    Ok(Some(entry.uid.as_raw()))
}

/// Spawns `invocation` as a child process and collects its output.
///
/// The child is killed when `timeout` elapses first.
pub(crate) async fn run(invocation: &Invocation, timeout: Duration) -> Result<ExecOutput, ExecError> {
    let Some((program, args)) = invocation.args.split_first() else {
        return Err(ExecError::EmptyCommand {
            host: invocation.host.to_string(),
        });
    };
    let spawn_error = |message: String| ExecError::Spawn {
        program: program.clone(),
        message,
    };

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(uid) = switch_uid(&invocation.user)? {
        debug!(user = %invocation.user, uid, "switching user for local command");
        command.uid(uid);
    }

    let child = command.spawn().map_err(|err| spawn_error(err.to_string()))?;
    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| ExecError::Timeout {
            host: invocation.host.to_string(),
            operation: invocation.command_line(),
            timeout,
        })?
        .map_err(|err| spawn_error(err.to_string()))?;

    Ok(ExecOutput {
        // No code means the child was killed by a signal.
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}
