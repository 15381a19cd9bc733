//! Network endpoints and the loopback equivalence class.
//!
//! Every address in `127.0.0.0/8` names the machine this process runs on, so
//! all of them compare equal. Any other address is compared literally.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::IpAddr;

use thiserror::Error;
use tokio::net::lookup_host;

/// Canonical loopback address used by [`Host::localhost`].
pub const LOCALHOST_IP: &str = "127.0.0.1";

const LOOPBACK_PREFIX: &str = "127.";

/// Errors raised by [`Host`] operations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum HostError {
    /// Raised when the externally reachable address of a local host is
    /// requested; it must come from configuration instead.
    #[error("the real address of local host {ip} is not known")]
    UnsupportedOperation {
        /// Loopback address the caller asked about.
        ip: String,
    },
    /// Raised when a hostname does not resolve to any address.
    #[error("unknown hostname {hostname}: {message}")]
    UnknownHostname {
        /// Name that failed to resolve.
        hostname: String,
        /// Resolver error text.
        message: String,
    },
}

/// A network endpoint identified by its IP address.
#[derive(Clone, Debug)]
pub struct Host {
    ip: String,
}

impl Host {
    /// Creates a host from an address string, trimming whitespace.
    #[must_use]
    pub fn new(ip: impl Into<String>) -> Self {
        Self {
            ip: ip.into().trim().to_owned(),
        }
    }

    /// Returns the host representing this machine.
    #[must_use]
    pub fn localhost() -> Self {
        Self::new(LOCALHOST_IP)
    }

    /// Resolves `hostname` and returns a host for its first address,
    /// preferring IPv4.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::UnknownHostname`] when the lookup fails or yields
    /// no address.
    pub async fn resolve(hostname: &str) -> Result<Self, HostError> {
        let unknown = |message: String| HostError::UnknownHostname {
            hostname: hostname.to_owned(),
            message,
        };
        let addrs: Vec<IpAddr> = lookup_host((hostname, 0))
            .await
            .map_err(|err| unknown(err.to_string()))?
            .map(|addr| addr.ip())
            .collect();
        let chosen = addrs
            .iter()
            .find(|addr| addr.is_ipv4())
            .or_else(|| addrs.first())
            .ok_or_else(|| unknown(String::from("no addresses returned")))?;
        Ok(Self::from(*chosen))
    }

    /// Returns the address string.
    #[must_use]
    pub fn ip(&self) -> &str {
        &self.ip
    }

    /// Returns `true` when the address lies in `127.0.0.0/8`.
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.ip.starts_with(LOOPBACK_PREFIX)
    }

    /// Returns the address other hosts can use to reach this one.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::UnsupportedOperation`] for local hosts.
    pub fn real_ip(&self) -> Result<&str, HostError> {
        if self.is_local() {
            return Err(HostError::UnsupportedOperation {
                ip: self.ip.clone(),
            });
        }
        Ok(&self.ip)
    }
}

impl From<IpAddr> for Host {
    fn from(addr: IpAddr) -> Self {
        Self::new(addr.to_string())
    }
}

impl PartialEq for Host {
    fn eq(&self, other: &Self) -> bool {
        (self.is_local() && other.is_local()) || self.ip == other.ip
    }
}

impl Eq for Host {}

impl Hash for Host {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Local hosts must hash alike because they compare equal.
        if self.is_local() {
            LOCALHOST_IP.hash(state);
        } else {
            self.ip.hash(state);
        }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.ip)
    }
}
