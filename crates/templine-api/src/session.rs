//! Relay session tracking.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

/// State of one relay connection.
#[derive(Debug, Clone)]
pub struct SessionContext {
    /// Caller identity announced on the connection (a phone number).
    pub caller: Option<String>,
    pub connected_at: DateTime<Utc>,
    /// Prompts received so far.
    pub turns: u64,
}

/// Live relay sessions keyed by connection id.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<Uuid, SessionContext>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new connection.
    pub fn open(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.sessions.insert(
            id,
            SessionContext {
                caller: None,
                connected_at: Utc::now(),
                turns: 0,
            },
        );
        id
    }

    pub fn set_caller(&self, id: &Uuid, caller: impl Into<String>) {
        if let Some(mut session) = self.sessions.get_mut(id) {
            session.caller = Some(caller.into());
        }
    }

    pub fn caller(&self, id: &Uuid) -> Option<String> {
        self.sessions.get(id).and_then(|s| s.caller.clone())
    }

    pub fn record_turn(&self, id: &Uuid) {
        if let Some(mut session) = self.sessions.get_mut(id) {
            session.turns += 1;
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<SessionContext> {
        self.sessions.get(id).map(|s| s.clone())
    }

    pub fn close(&self, id: &Uuid) -> Option<SessionContext> {
        self.sessions.remove(id).map(|(_, session)| session)
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_lifecycle() {
        let registry = SessionRegistry::new();
        let id = registry.open();
        assert_eq!(registry.active_count(), 1);
        assert!(registry.caller(&id).is_none());

        registry.set_caller(&id, "+15551234567");
        registry.record_turn(&id);
        registry.record_turn(&id);

        let session = registry.get(&id).unwrap();
        assert_eq!(session.caller.as_deref(), Some("+15551234567"));
        assert_eq!(session.turns, 2);

        assert!(registry.close(&id).is_some());
        assert!(registry.close(&id).is_none());
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn test_unknown_session_is_ignored() {
        let registry = SessionRegistry::new();
        let id = Uuid::new_v4();
        registry.set_caller(&id, "+15551234567");
        assert!(registry.caller(&id).is_none());
        assert_eq!(registry.active_count(), 0);
    }
}
