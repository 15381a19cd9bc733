//! Routes invocations to a local subprocess or a pooled remote session.

use std::time::Duration;

use tracing::{debug, warn};

use super::pool::{ConnectionPool, SessionFilter};
use super::{ExecError, ExecFuture, ExecOutput, Executor, Invocation, local};
use crate::host::Host;
use crate::session::{SessionTarget, SshTransport};

/// Default deadline for the connect handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default deadline for a single command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);
/// Default shell started after the handshake.
pub const DEFAULT_REMOTE_SHELL: &str = "/bin/bash";

/// Runtime parameters of a [`Dispatcher`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DispatcherSettings {
    /// Transport used to open remote sessions.
    pub transport: SshTransport,
    /// Shell the remote side starts after the handshake.
    pub remote_shell: String,
    /// Deadline for the connect handshake.
    pub connect_timeout: Duration,
    /// Deadline for each command, local or remote.
    pub command_timeout: Duration,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            transport: SshTransport::default(),
            remote_shell: DEFAULT_REMOTE_SHELL.to_owned(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }
}

/// Executes commands on any host, reusing one session per host and user
/// pair.
///
/// Sessions live until [`Dispatcher::disconnect`] or
/// [`Dispatcher::disconnect_all`] removes them. Dropping the dispatcher kills
/// every remaining transport process.
#[derive(Debug, Default)]
pub struct Dispatcher {
    settings: DispatcherSettings,
    pool: ConnectionPool,
}

impl Dispatcher {
    /// Creates a dispatcher with an empty pool.
    #[must_use]
    pub fn new(settings: DispatcherSettings) -> Self {
        Self {
            settings,
            pool: ConnectionPool::new(),
        }
    }

    /// Returns the settings this dispatcher was built with.
    #[must_use]
    pub const fn settings(&self) -> &DispatcherSettings {
        &self.settings
    }

    /// Runs `invocation` and returns its exit code and output.
    ///
    /// Local hosts spawn the command directly as `invocation.user`. Remote
    /// hosts reuse the pooled session for the host and user pair, connecting
    /// or reconnecting it first when needed.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::EmptyCommand`] for an invocation without a
    /// program, and propagates spawn, connect and timeout failures. A remote
    /// command that times out or loses its stream disconnects and evicts the
    /// session, terminating whatever still runs in it.
    pub async fn execute(&self, invocation: Invocation) -> Result<ExecOutput, ExecError> {
        if invocation.args.is_empty() {
            return Err(ExecError::EmptyCommand {
                host: invocation.host.to_string(),
            });
        }
        debug!(
            host = %invocation.host,
            user = %invocation.user,
            command = %invocation.command_line(),
            "dispatching command"
        );
        if invocation.host.is_local() {
            return local::run(&invocation, self.settings.command_timeout).await;
        }
        self.execute_remote(&invocation).await
    }

    async fn execute_remote(&self, invocation: &Invocation) -> Result<ExecOutput, ExecError> {
        let target = SessionTarget::new(
            invocation.host.clone(),
            invocation.user.as_str(),
            invocation.effective_remote_user(),
        );
        let session = self
            .pool
            .checkout(&target, &self.settings.transport)
            .await;
        let mut guard = session.lock().await;

        if guard.is_connected() && !guard.is_alive() {
            warn!(host = %target.host, "replacing dead session");
            guard.disconnect().await;
        }
        if let Err(err) = guard
            .connect(self.settings.connect_timeout, &self.settings.remote_shell)
            .await
        {
            drop(guard);
            self.pool.evict(&target, &session).await;
            return Err(err);
        }

        let result = guard
            .execute(&invocation.command_line(), self.settings.command_timeout)
            .await;
        if result.as_ref().is_err_and(discards_session) {
            guard.disconnect().await;
            drop(guard);
            self.pool.evict(&target, &session).await;
        }
        result
    }

    /// Disconnects and evicts every session to `host` that matches the
    /// optional user filters. Returns how many sessions were closed.
    pub async fn disconnect(
        &self,
        host: &Host,
        user: Option<&str>,
        remote_user: Option<&str>,
    ) -> usize {
        let filter = SessionFilter {
            host,
            user,
            remote_user,
        };
        let sessions = self.pool.take_matching(&filter).await;
        let closed = sessions.len();
        for session in sessions {
            session.lock().await.disconnect().await;
        }
        closed
    }

    /// Disconnects and evicts every pooled session. Returns how many sessions
    /// were closed.
    pub async fn disconnect_all(&self) -> usize {
        let sessions = self.pool.take_all().await;
        let closed = sessions.len();
        for session in sessions {
            session.lock().await.disconnect().await;
        }
        closed
    }

    /// Returns `true` when a pooled session to `host` matching the optional
    /// user filters is connected.
    ///
    /// A session that is busy running a command counts as connected.
    pub async fn is_connected(
        &self,
        host: &Host,
        user: Option<&str>,
        remote_user: Option<&str>,
    ) -> bool {
        let filter = SessionFilter {
            host,
            user,
            remote_user,
        };
        self.pool
            .matching(&filter)
            .await
            .iter()
            .any(|session| match session.try_lock() {
                Ok(guard) => guard.is_connected(),
                Err(_) => true,
            })
    }

    /// Returns the number of pooled sessions.
    pub async fn session_count(&self) -> usize {
        self.pool.len().await
    }
}

impl Executor for Dispatcher {
    fn execute(&self, invocation: Invocation) -> ExecFuture<'_> {
        Box::pin(Self::execute(self, invocation))
    }
}

/// Errors after which the session's stream position is unknown.
const fn discards_session(err: &ExecError) -> bool {
    matches!(
        err,
        ExecError::Timeout { .. }
            | ExecError::SessionClosed { .. }
            | ExecError::Io { .. }
            | ExecError::Protocol { .. }
    )
}
