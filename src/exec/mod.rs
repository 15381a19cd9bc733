//! Command execution on local and remote hosts.
//!
//! [`Dispatcher`] is the entry point: commands addressed to a local host run
//! as direct subprocesses, everything else goes through a pooled
//! [`RemoteSession`](crate::session::RemoteSession). Collaborators depend on
//! the [`Executor`] trait so tests can substitute scripted doubles, and gain
//! the file and directory helpers of [`ExecutorExt`] for free.

use std::future::Future;
use std::pin::Pin;

use crate::host::Host;
use crate::session::framing::render_command;

mod dispatcher;
mod error;
mod helpers;
pub(crate) mod local;
mod pool;

pub use dispatcher::{
    DEFAULT_COMMAND_TIMEOUT, DEFAULT_CONNECT_TIMEOUT, DEFAULT_REMOTE_SHELL, Dispatcher,
    DispatcherSettings,
};
pub use error::{ExecError, ProcessError};
pub use helpers::{ExecutorExt, FileKind, RemoteUserExecutor};
pub use local::current_user;
pub use pool::{ConnectionPool, SessionFilter, SharedSession};

/// Boxed future returned by [`Executor::execute`].
pub type ExecFuture<'a> = Pin<Box<dyn Future<Output = Result<ExecOutput, ExecError>> + Send + 'a>>;

/// Exit code and captured streams of one finished command.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ExecOutput {
    /// Exit code reported by the command.
    pub exit_code: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl ExecOutput {
    /// Returns `true` when the command exited with status zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.exit_code == 0
    }

    /// Converts a non-zero exit into a [`ProcessError`].
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError`] carrying both streams when the exit code is
    /// not zero.
    pub fn into_success(self) -> Result<Self, ProcessError> {
        if self.is_success() {
            return Ok(self);
        }
        Err(ProcessError {
            exit_code: self.exit_code,
            stdout: self.stdout,
            stderr: self.stderr,
        })
    }
}

/// A command addressed to a host and run as a particular user.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Invocation {
    /// Host the command runs on.
    pub host: Host,
    /// Local user owning the process (or the transport for remote hosts).
    pub user: String,
    /// User to authenticate as on a remote host; defaults to `user`.
    pub remote_user: Option<String>,
    /// Program followed by its arguments.
    pub args: Vec<String>,
}

impl Invocation {
    /// Creates an invocation of `args` on `host` as `user`.
    #[must_use]
    pub fn new<I, S>(host: Host, user: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            host,
            user: user.into(),
            remote_user: None,
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Sets the user the transport authenticates as.
    #[must_use]
    pub fn remote_user(mut self, remote_user: impl Into<String>) -> Self {
        self.remote_user = Some(remote_user.into());
        self
    }

    /// Returns the remote user, falling back to the local user.
    #[must_use]
    pub fn effective_remote_user(&self) -> &str {
        self.remote_user.as_deref().unwrap_or(&self.user)
    }

    /// Renders the arguments as one shell-quoted command line.
    #[must_use]
    pub fn command_line(&self) -> String {
        render_command(&self.args)
    }
}

/// Runs [`Invocation`]s and reports their results.
///
/// Implementations must be shareable between tasks; the mount layer holds
/// them behind an `Arc`.
pub trait Executor: Send + Sync {
    /// Runs `invocation` to completion.
    fn execute(&self, invocation: Invocation) -> ExecFuture<'_>;
}
