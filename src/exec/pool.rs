//! Reusable remote sessions keyed by host and user pair.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::host::Host;
use crate::session::{RemoteSession, SessionTarget, SshTransport};

/// A pooled session. The mutex serialises commands on it.
pub type SharedSession = Arc<Mutex<RemoteSession>>;

/// Selects pooled sessions by host and, optionally, by either user.
#[derive(Clone, Copy, Debug)]
pub struct SessionFilter<'a> {
    /// Host the sessions must point at.
    pub host: &'a Host,
    /// Local user to match; `None` matches any.
    pub user: Option<&'a str>,
    /// Remote user to match; `None` matches any.
    pub remote_user: Option<&'a str>,
}

impl<'a> SessionFilter<'a> {
    /// Matches every session to `host`.
    #[must_use]
    pub const fn host(host: &'a Host) -> Self {
        Self {
            host,
            user: None,
            remote_user: None,
        }
    }

    /// Restricts the filter to sessions owned by `user`.
    #[must_use]
    pub const fn user(mut self, user: &'a str) -> Self {
        self.user = Some(user);
        self
    }

    /// Restricts the filter to sessions authenticated as `remote_user`.
    #[must_use]
    pub const fn remote_user(mut self, remote_user: &'a str) -> Self {
        self.remote_user = Some(remote_user);
        self
    }

    /// Returns `true` when `target` satisfies every constraint.
    #[must_use]
    pub fn matches(&self, target: &SessionTarget) -> bool {
        target.host == *self.host
            && self.user.is_none_or(|user| user == target.local_user)
            && self
                .remote_user
                .is_none_or(|remote| remote == target.remote_user)
    }
}

/// Sessions owned by one dispatcher.
///
/// The map lock is only held to look up, insert or remove entries, never
/// while a command runs.
#[derive(Debug, Default)]
pub struct ConnectionPool {
    sessions: Mutex<HashMap<SessionTarget, SharedSession>>,
}

impl ConnectionPool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the session for `target`, creating a disconnected one when
    /// none is pooled yet.
    pub async fn checkout(&self, target: &SessionTarget, transport: &SshTransport) -> SharedSession {
        let mut sessions = self.sessions.lock().await;
        Arc::clone(sessions.entry(target.clone()).or_insert_with(|| {
            Arc::new(Mutex::new(RemoteSession::new(
                target.clone(),
                transport.clone(),
            )))
        }))
    }

    /// Removes `session` from the pool if it is still the one pooled for
    /// `target`.
    pub async fn evict(&self, target: &SessionTarget, session: &SharedSession) {
        let mut sessions = self.sessions.lock().await;
        if sessions
            .get(target)
            .is_some_and(|pooled| Arc::ptr_eq(pooled, session))
        {
            sessions.remove(target);
        }
    }

    /// Removes and returns every session matching `filter`.
    pub async fn take_matching(&self, filter: &SessionFilter<'_>) -> Vec<SharedSession> {
        let mut sessions = self.sessions.lock().await;
        let keys: Vec<SessionTarget> = sessions
            .keys()
            .filter(|target| filter.matches(target))
            .cloned()
            .collect();
        keys.iter()
            .filter_map(|target| sessions.remove(target))
            .collect()
    }

    /// Removes and returns every session.
    pub async fn take_all(&self) -> Vec<SharedSession> {
        self.sessions
            .lock()
            .await
            .drain()
            .map(|(_, session)| session)
            .collect()
    }

    /// Returns the sessions matching `filter` without removing them.
    pub async fn matching(&self, filter: &SessionFilter<'_>) -> Vec<SharedSession> {
        self.sessions
            .lock()
            .await
            .iter()
            .filter(|(target, _)| filter.matches(target))
            .map(|(_, session)| Arc::clone(session))
            .collect()
    }

    /// Returns the number of pooled sessions.
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Returns `true` when no session is pooled.
    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }
}
