//! File and directory queries built on [`Executor`].

use std::future::Future;

use super::{ExecError, ExecFuture, ExecOutput, Executor, Invocation};
use crate::host::Host;

/// File types understood by `test`.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum FileKind {
    /// Block special file (`-b`).
    BlockSpecial,
    /// Directory (`-d`).
    Directory,
    /// Regular file (`-f`).
    Regular,
    /// Anything that exists (`-e`).
    Any,
}

impl FileKind {
    /// Returns the `test` flag for this kind.
    #[must_use]
    pub const fn test_flag(self) -> &'static str {
        match self {
            Self::BlockSpecial => "-b",
            Self::Directory => "-d",
            Self::Regular => "-f",
            Self::Any => "-e",
        }
    }
}

/// Executor that authenticates as a fixed remote user. Returned by
/// [`ExecutorExt::as_remote_user`].
#[derive(Debug)]
pub struct RemoteUserExecutor<'a, E: ?Sized> {
    inner: &'a E,
    remote_user: String,
}

impl<E: Executor + ?Sized> Executor for RemoteUserExecutor<'_, E> {
    fn execute(&self, mut invocation: Invocation) -> ExecFuture<'_> {
        if invocation.remote_user.is_none() {
            invocation.remote_user = Some(self.remote_user.clone());
        }
        self.inner.execute(invocation)
    }
}

/// Convenience operations available on every [`Executor`].
///
/// Queries turn exit codes into booleans and only fail when the command
/// could not be dispatched. Mutations require success and surface a
/// non-zero exit as [`ExecError::Process`]. Helpers authenticate as the
/// local user on remote hosts; wrap the executor with
/// [`ExecutorExt::as_remote_user`] to pick another account.
pub trait ExecutorExt: Executor {
    /// Returns a view of this executor whose invocations authenticate as
    /// `remote_user` unless they name a remote user themselves.
    #[must_use]
    fn as_remote_user(&self, remote_user: impl Into<String>) -> RemoteUserExecutor<'_, Self> {
        RemoteUserExecutor {
            inner: self,
            remote_user: remote_user.into(),
        }
    }

    /// Runs `invocation` and fails unless it exits with status zero.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::Process`] for a non-zero exit, otherwise
    /// propagates dispatch errors.
    fn execute_success(
        &self,
        invocation: Invocation,
    ) -> impl Future<Output = Result<ExecOutput, ExecError>> + Send + '_ {
        async move { Ok(self.execute(invocation).await?.into_success()?) }
    }

    /// Tests whether `path` exists on `host` and is of `kind`.
    ///
    /// # Errors
    ///
    /// Propagates dispatch errors; a missing file is `Ok(false)`.
    fn file_exists<'a>(
        &'a self,
        host: &'a Host,
        user: &'a str,
        path: &'a str,
        kind: FileKind,
    ) -> impl Future<Output = Result<bool, ExecError>> + Send + 'a {
        async move {
            let invocation = Invocation::new(host.clone(), user, ["test", kind.test_flag(), path]);
            Ok(self.execute(invocation).await?.is_success())
        }
    }

    /// Lists the entries of the directory at `path`, hidden ones included.
    /// Directories carry a trailing `/`.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::Process`] when `ls` fails, for example because
    /// the directory does not exist.
    fn directory_list<'a>(
        &'a self,
        host: &'a Host,
        user: &'a str,
        path: &'a str,
    ) -> impl Future<Output = Result<Vec<String>, ExecError>> + Send + 'a {
        async move {
            let invocation = Invocation::new(host.clone(), user, ["ls", "-A", "-1", "-p", path]);
            let output = self.execute_success(invocation).await?;
            Ok(output
                .stdout
                .lines()
                .filter(|line| !line.is_empty())
                .map(str::to_owned)
                .collect())
        }
    }

    /// Returns `true` when the directory at `path` has no entries.
    ///
    /// # Errors
    ///
    /// Same as [`ExecutorExt::directory_list`].
    fn directory_empty<'a>(
        &'a self,
        host: &'a Host,
        user: &'a str,
        path: &'a str,
    ) -> impl Future<Output = Result<bool, ExecError>> + Send + 'a {
        async move { Ok(self.directory_list(host, user, path).await?.is_empty()) }
    }

    /// Creates the directory at `path`, with missing parents when `parents`
    /// is set.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::Process`] when `mkdir` fails.
    fn create_directory<'a>(
        &'a self,
        host: &'a Host,
        user: &'a str,
        path: &'a str,
        parents: bool,
    ) -> impl Future<Output = Result<(), ExecError>> + Send + 'a {
        async move {
            let mut args = vec!["mkdir"];
            if parents {
                args.push("-p");
            }
            args.push(path);
            self.execute_success(Invocation::new(host.clone(), user, args))
                .await?;
            Ok(())
        }
    }

    /// Removes the directory at `path`. Without `recursive` it must be
    /// empty.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::Process`] when `rmdir` or `rm` fails.
    fn remove_directory<'a>(
        &'a self,
        host: &'a Host,
        user: &'a str,
        path: &'a str,
        recursive: bool,
    ) -> impl Future<Output = Result<(), ExecError>> + Send + 'a {
        async move {
            let args = if recursive {
                vec!["rm", "--recursive", path]
            } else {
                vec!["rmdir", path]
            };
            self.execute_success(Invocation::new(host.clone(), user, args))
                .await?;
            Ok(())
        }
    }
}

impl<T: Executor + ?Sized> ExecutorExt for T {}
