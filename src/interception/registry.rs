// src/interception/registry.rs
//! Registry of in-flight relay sessions
//!
//! Sessions register once their outbound connection is up and are removed by
//! a guard when the session ends, whatever the exit path. The registry only
//! serves snapshots for observability; sessions never read each other's state.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use metrics::gauge;
use std::net::SocketAddr;
use std::sync::Arc;
use ulid::Ulid;

/// Snapshot entry for one in-flight session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSession {
    pub id: Ulid,
    pub source: SocketAddr,
    pub destination: SocketAddr,
    pub started_at: DateTime<Utc>,
}

/// Concurrent map of in-flight sessions
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<Ulid, ActiveSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `session`; it stays listed until the returned guard drops
    pub fn register(&self, session: ActiveSession) -> RegistrationGuard {
        let id = session.id;
        self.sessions.insert(id, session);
        gauge!("gateway_active_sessions").set(self.sessions.len() as f64);

        RegistrationGuard {
            id,
            sessions: Arc::clone(&self.sessions),
        }
    }

    /// Owned copy of the current sessions, oldest first
    pub fn snapshot(&self) -> Vec<ActiveSession> {
        let mut sessions: Vec<ActiveSession> =
            self.sessions.iter().map(|entry| entry.value().clone()).collect();
        sessions.sort_by_key(|s| s.id);
        sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Removes its session from the registry on drop
#[derive(Debug)]
pub struct RegistrationGuard {
    id: Ulid,
    sessions: Arc<DashMap<Ulid, ActiveSession>>,
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        self.sessions.remove(&self.id);
        gauge!("gateway_active_sessions").set(self.sessions.len() as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(port: u16) -> ActiveSession {
        ActiveSession {
            id: Ulid::new(),
            source: format!("192.168.1.10:{}", port).parse().unwrap(),
            destination: "93.184.216.34:443".parse().unwrap(),
            started_at: Utc::now(),
        }
    }

    #[test]
    fn test_register_and_drop() {
        let registry = SessionRegistry::new();
        assert!(registry.is_empty());

        let guard = registry.register(session(40000));
        assert_eq!(registry.len(), 1);

        drop(guard);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_snapshot_is_detached() {
        let registry = SessionRegistry::new();
        let _a = registry.register(session(40000));
        let b = registry.register(session(40001));

        let snapshot = registry.snapshot();
        drop(b);

        assert_eq!(snapshot.len(), 2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_concurrent_registration() {
        use std::thread;

        let registry = SessionRegistry::new();
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let registry = registry.clone();
                thread::spawn(move || {
                    let _guard = registry.register(session(40000 + i));
                    assert!(registry.len() >= 1);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(registry.is_empty());
    }
}
