//! Core library for the autobackup orchestration layer.
//!
//! The crate runs commands on any host through one [`Executor`] seam:
//! locally as a child process, or remotely over a persistent SSH session
//! that frames every command with a random marker so output and exit status
//! can be recovered from a single interactive shell. On top of that it
//! mounts devices onto mountpoints on any host pair that includes this
//! machine, bridging across hosts with `sshfs`.

pub mod config;
pub mod exec;
pub mod host;
pub mod location;
pub mod marker;
pub mod mount;
pub mod session;
pub mod test_support;

pub use config::{ConfigError, ExecConfig};
pub use exec::{
    Dispatcher, DispatcherSettings, ExecError, ExecOutput, Executor, ExecutorExt, FileKind,
    Invocation, ProcessError, RemoteUserExecutor,
};
pub use host::{Host, HostError};
pub use location::Location;
pub use mount::{Device, MountError, MountPlan, MountSettings, MountTableSource, Mountpoint};
pub use session::{RemoteSession, SessionState, SessionTarget, SshTransport};
