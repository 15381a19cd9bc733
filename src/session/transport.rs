//! Spawn arguments for the transport that carries a session.

use std::ffi::OsString;

use super::SessionTarget;

/// Default SSH port.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Renders the `ssh` invocation that starts a remote shell.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SshTransport {
    /// Path to the `ssh` executable.
    pub program: String,
    /// Port to connect to on the remote host.
    pub port: u16,
    /// Whether unknown host keys are rejected.
    pub strict_host_key_checking: bool,
}

impl Default for SshTransport {
    fn default() -> Self {
        Self {
            program: String::from("ssh"),
            port: DEFAULT_SSH_PORT,
            strict_host_key_checking: true,
        }
    }
}

impl SshTransport {
    /// Builds the argument list, ending with the handshake command the remote
    /// side runs.
    #[must_use]
    pub fn args(&self, target: &SessionTarget, handshake: &str) -> Vec<OsString> {
        let strict = if self.strict_host_key_checking {
            "yes"
        } else {
            "no"
        };
        vec![
            OsString::from("-o"),
            OsString::from(format!("StrictHostKeyChecking={strict}")),
            OsString::from("-p"),
            OsString::from(self.port.to_string()),
            OsString::from("-q"),
            OsString::from("-x"),
            OsString::from("-l"),
            OsString::from(&target.remote_user),
            OsString::from(target.host.ip()),
            OsString::from(handshake),
        ]
    }
}
