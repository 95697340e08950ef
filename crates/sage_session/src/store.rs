//! Shared-state session store.
//!
//! Readers–writer discipline: `get_by_key_id` is the fast path (read
//! lock, clone the handle); `insert`, `remove` and `reap` take the
//! write path. Locks are NEVER held while a session is being operated
//! on — handles are cloned out first, so the store lock and the
//! per-session lock never nest in conflicting order.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::session::{SecureSession, SessionState};

pub type SharedSession = Arc<Mutex<SecureSession>>;

#[derive(Default)]
struct Inner {
    by_session: HashMap<[u8; 16], SharedSession>,
    key_index: HashMap<[u8; 16], [u8; 16]>,
}

#[derive(Default)]
pub struct SessionStore {
    inner: RwLock<Inner>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session and return its shared handle.
    pub fn insert(&self, session: SecureSession) -> SharedSession {
        let session_id = session.session_id();
        let key_id = session.key_id();
        let handle = Arc::new(Mutex::new(session));
        let mut inner = self.inner.write();
        inner.by_session.insert(session_id, handle.clone());
        inner.key_index.insert(key_id, session_id);
        tracing::debug!(
            session_id = %hex::encode(session_id),
            key_id = %hex::encode(key_id),
            "session registered"
        );
        handle
    }

    /// The lookup the signature layer depends on. Runs the inline
    /// expiry check; terminal sessions are pruned and report as absent.
    pub fn get_by_key_id(&self, key_id: &[u8; 16]) -> Option<SharedSession> {
        let (session_id, handle) = {
            let inner = self.inner.read();
            let session_id = *inner.key_index.get(key_id)?;
            let handle = inner.by_session.get(&session_id)?.clone();
            (session_id, handle)
        };

        let dead = {
            let mut session = handle.lock();
            let _ = session.check_policies();
            session.state().is_terminal()
        };
        if dead {
            self.remove(&session_id);
            return None;
        }
        Some(handle)
    }

    pub fn get_by_session_id(&self, session_id: &[u8; 16]) -> Option<SharedSession> {
        let handle = self.inner.read().by_session.get(session_id)?.clone();
        let dead = {
            let mut session = handle.lock();
            let _ = session.check_policies();
            session.state().is_terminal()
        };
        if dead {
            self.remove(session_id);
            return None;
        }
        Some(handle)
    }

    /// Drop a session; its key material zeroizes when the last handle
    /// goes away.
    pub fn remove(&self, session_id: &[u8; 16]) {
        let mut inner = self.inner.write();
        if let Some(handle) = inner.by_session.remove(session_id) {
            let key_id = handle.lock().key_id();
            inner.key_index.remove(&key_id);
        }
    }

    /// Sweep expired sessions. Correctness never depends on this being
    /// called — every lookup and crypto op checks inline.
    pub fn reap(&self) -> usize {
        let handles: Vec<([u8; 16], SharedSession)> = {
            let inner = self.inner.read();
            inner
                .by_session
                .iter()
                .map(|(id, h)| (*id, h.clone()))
                .collect()
        };

        let mut dead = Vec::new();
        for (id, handle) in handles {
            let mut session = handle.lock();
            let _ = session.check_policies();
            if session.state().is_terminal() {
                dead.push((id, session.key_id()));
            }
        }

        let mut inner = self.inner.write();
        let reaped = dead.len();
        for (session_id, key_id) in dead {
            inner.by_session.remove(&session_id);
            inner.key_index.remove(&key_id);
        }
        if reaped > 0 {
            tracing::debug!(reaped, "reaped expired sessions");
        }
        reaped
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_session.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::SessionPolicy;
    use sage_crypto::kdf::Role;
    use sage_crypto::keys::PublicKeyBytes;
    use std::time::Duration;

    fn session(exporter: u8, policy: SessionPolicy) -> SecureSession {
        let mut s = SecureSession::from_exporter(
            &[exporter; 32],
            Role::Initiator,
            "did:local",
            "did:peer",
            PublicKeyBytes(vec![0u8; 32]),
            policy,
        )
        .unwrap();
        s.establish().unwrap();
        s
    }

    #[test]
    fn key_id_lookup_roundtrip() {
        let store = SessionStore::new();
        let s = session(1, SessionPolicy::default());
        let key_id = s.key_id();
        store.insert(s);
        assert!(store.get_by_key_id(&key_id).is_some());
        assert!(store.get_by_key_id(&[0u8; 16]).is_none());
    }

    #[test]
    fn expired_sessions_vanish_from_lookup() {
        let store = SessionStore::new();
        let policy = SessionPolicy {
            idle_timeout: Duration::from_millis(20),
            ..SessionPolicy::default()
        };
        let s = session(2, policy);
        let key_id = s.key_id();
        store.insert(s);

        std::thread::sleep(Duration::from_millis(30));
        assert!(store.get_by_key_id(&key_id).is_none());
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn reaper_sweeps_terminal_sessions() {
        let store = SessionStore::new();
        let policy = SessionPolicy {
            max_age: Duration::from_millis(20),
            idle_timeout: Duration::from_secs(60),
            ..SessionPolicy::default()
        };
        for i in 0..3u8 {
            store.insert(session(i, policy));
        }
        store.insert(session(9, SessionPolicy::default()));

        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(store.reap(), 3);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn remove_clears_key_index() {
        let store = SessionStore::new();
        let s = session(3, SessionPolicy::default());
        let session_id = s.session_id();
        let key_id = s.key_id();
        store.insert(s);
        store.remove(&session_id);
        assert!(store.get_by_key_id(&key_id).is_none());
    }
}
