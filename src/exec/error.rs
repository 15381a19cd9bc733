//! Errors raised while dispatching commands locally or over a session.

use std::time::Duration;

use thiserror::Error;

/// Raised when a command that was expected to succeed exits non-zero.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("command exited with status {exit_code}: {stderr}")]
pub struct ProcessError {
    /// Exit code reported for the command.
    pub exit_code: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

/// Errors surfaced by the execution dispatcher and remote sessions.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ExecError {
    /// Raised when an invocation carries no program.
    #[error("refusing to execute an empty command on {host}")]
    EmptyCommand {
        /// Host the command was addressed to.
        host: String,
    },
    /// Raised when a process cannot be started.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when the acting user does not exist on this machine.
    #[error("unknown local user {user}")]
    UnknownUser {
        /// Requested user name.
        user: String,
    },
    /// Raised when a handshake or command exceeds its deadline.
    #[error("{operation} on {host} timed out after {timeout:?}")]
    Timeout {
        /// Host the operation was addressed to.
        host: String,
        /// Either `connect` or the command that was running.
        operation: String,
        /// Deadline that elapsed.
        timeout: Duration,
    },
    /// Raised when the remote side wrote to stderr before the handshake
    /// completed.
    #[error("connection to {host} refused: {message}")]
    ConnectionRefused {
        /// Host that refused the session.
        host: String,
        /// Text the host responded with.
        message: String,
    },
    /// Raised when the session's output stream ends before a marker arrives.
    #[error("session to {host} closed unexpectedly: {stderr}")]
    SessionClosed {
        /// Host whose session ended.
        host: String,
        /// Standard error captured before the stream ended.
        stderr: String,
    },
    /// Raised when a command is sent to a session that is not connected.
    #[error("session to {host} is not connected")]
    NotConnected {
        /// Host of the disconnected session.
        host: String,
    },
    /// Raised when reading from or writing to a session fails.
    #[error("i/o error on session to {host}: {message}")]
    Io {
        /// Host of the affected session.
        host: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when the completion line cannot be interpreted.
    #[error("malformed completion from {host}: {line}")]
    Protocol {
        /// Host that sent the line.
        host: String,
        /// Offending line.
        line: String,
    },
    /// Raised by helpers that require a zero exit code.
    #[error(transparent)]
    Process(#[from] ProcessError),
}
