//! Key naming for the coordination store and backplane channels.
//!
//! Every key is `{namespace}:{kind}:...` so several deployments can share one store.

use super::value_object::{ConnectionId, PieceId, SessionId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keyspace {
    namespace: String,
}

impl Keyspace {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn session(&self, session_id: &SessionId) -> String {
        format!("{}:session:{}", self.namespace, session_id)
    }

    pub fn members(&self, session_id: &SessionId) -> String {
        format!("{}:members:{}", self.namespace, session_id)
    }

    pub fn members_prefix(&self) -> String {
        format!("{}:members:", self.namespace)
    }

    pub fn idle(&self, session_id: &SessionId) -> String {
        format!("{}:idle:{}", self.namespace, session_id)
    }

    pub fn idle_prefix(&self) -> String {
        format!("{}:idle:", self.namespace)
    }

    pub fn piece(&self, session_id: &SessionId, piece_id: PieceId) -> String {
        format!("{}:piece:{}:{}", self.namespace, session_id, piece_id)
    }

    /// Prefix of every piece key of one session
    pub fn piece_prefix(&self, session_id: &SessionId) -> String {
        format!("{}:piece:{}:", self.namespace, session_id)
    }

    pub fn lock(&self, session_id: &SessionId, piece_id: PieceId) -> String {
        format!("{}:lock:{}:{}", self.namespace, session_id, piece_id)
    }

    /// Prefix of every lock key of one session
    pub fn lock_prefix(&self, session_id: &SessionId) -> String {
        format!("{}:lock:{}:", self.namespace, session_id)
    }

    pub fn completed(&self, session_id: &SessionId) -> String {
        format!("{}:completed:{}", self.namespace, session_id)
    }

    pub fn connection(&self, connection_id: &ConnectionId) -> String {
        format!("{}:conn:{}", self.namespace, connection_id)
    }

    pub fn connection_prefix(&self) -> String {
        format!("{}:conn:", self.namespace)
    }

    pub fn heartbeat(&self, connection_id: &ConnectionId) -> String {
        format!("{}:hb:{}", self.namespace, connection_id)
    }

    /// Backplane channel of one session
    pub fn channel(&self, session_id: &SessionId) -> String {
        format!("{}:events:{}", self.namespace, session_id)
    }

    /// Inverse of [`Keyspace::lock`] for keys returned by a scan of [`Keyspace::lock_prefix`].
    pub fn piece_of_lock_key(&self, session_id: &SessionId, key: &str) -> Option<PieceId> {
        key.strip_prefix(&self.lock_prefix(session_id))?
            .parse::<u32>()
            .ok()
            .map(PieceId::new)
    }

    pub fn session_of_members_key(&self, key: &str) -> Option<SessionId> {
        Self::trailing_id(key, &self.members_prefix()).and_then(|id| SessionId::new(id).ok())
    }

    pub fn session_of_idle_key(&self, key: &str) -> Option<SessionId> {
        Self::trailing_id(key, &self.idle_prefix()).and_then(|id| SessionId::new(id).ok())
    }

    pub fn connection_of_key(&self, key: &str) -> Option<ConnectionId> {
        Self::trailing_id(key, &self.connection_prefix()).and_then(|id| ConnectionId::new(id).ok())
    }

    fn trailing_id(key: &str, prefix: &str) -> Option<String> {
        key.strip_prefix(prefix).map(str::to_string)
    }
}

impl Default for Keyspace {
    fn default() -> Self {
        Self::new("kumitate")
    }
}
