//! Session membership storage.
//!
//! A [`SessionStore`] holds the ordered member list of every live session.
//! Each session actor is the only writer for its own key, so implementations
//! need no cross-key coordination. The hub ships with
//! [`InMemorySessionStore`]; sessions are process-lifetime only.

use crate::errors::HubError;
use common::protocol::Member;
use common::types::{ParticipantId, SessionKey};
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Membership storage used by session actors.
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    /// Append a member in join order.
    ///
    /// Returns `false` (and changes nothing) if the participant is already a
    /// member of the session.
    async fn add_member(&self, key: &SessionKey, member: Member) -> Result<bool, HubError>;

    /// Remove a member, returning it if it was present.
    async fn remove_member(
        &self,
        key: &SessionKey,
        participant_id: ParticipantId,
    ) -> Result<Option<Member>, HubError>;

    /// Current members in join order. Unknown sessions have no members.
    async fn members(&self, key: &SessionKey) -> Result<Vec<Member>, HubError>;

    /// Drop every trace of the session.
    async fn remove_session(&self, key: &SessionKey) -> Result<(), HubError>;
}

/// Process-local [`SessionStore`].
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<SessionKey, Vec<Member>>>,
}

impl InMemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions with at least one member.
    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

#[async_trait::async_trait]
impl SessionStore for InMemorySessionStore {
    async fn add_member(&self, key: &SessionKey, member: Member) -> Result<bool, HubError> {
        let mut sessions = self.sessions.lock().await;
        let members = sessions.entry(key.clone()).or_default();
        if members
            .iter()
            .any(|m| m.participant_id == member.participant_id)
        {
            return Ok(false);
        }
        members.push(member);
        Ok(true)
    }

    async fn remove_member(
        &self,
        key: &SessionKey,
        participant_id: ParticipantId,
    ) -> Result<Option<Member>, HubError> {
        let mut sessions = self.sessions.lock().await;
        let Some(members) = sessions.get_mut(key) else {
            return Ok(None);
        };
        let removed = members
            .iter()
            .position(|m| m.participant_id == participant_id)
            .map(|idx| members.remove(idx));
        if members.is_empty() {
            sessions.remove(key);
        }
        Ok(removed)
    }

    async fn members(&self, key: &SessionKey) -> Result<Vec<Member>, HubError> {
        Ok(self
            .sessions
            .lock()
            .await
            .get(key)
            .cloned()
            .unwrap_or_default())
    }

    async fn remove_session(&self, key: &SessionKey) -> Result<(), HubError> {
        self.sessions.lock().await.remove(key);
        Ok(())
    }
}

/// Store doubles for tests.
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Store whose every operation fails, for exercising error paths.
    #[derive(Debug, Default)]
    pub struct FailingSessionStore {
        call_count: AtomicUsize,
    }

    impl FailingSessionStore {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Number of store calls made.
        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }

        fn fail<T>(&self) -> Result<T, HubError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            Err(HubError::Store("mock store unavailable".to_string()))
        }
    }

    #[async_trait::async_trait]
    impl SessionStore for FailingSessionStore {
        async fn add_member(&self, _key: &SessionKey, _member: Member) -> Result<bool, HubError> {
            self.fail()
        }

        async fn remove_member(
            &self,
            _key: &SessionKey,
            _participant_id: ParticipantId,
        ) -> Result<Option<Member>, HubError> {
            self.fail()
        }

        async fn members(&self, _key: &SessionKey) -> Result<Vec<Member>, HubError> {
            self.fail()
        }

        async fn remove_session(&self, _key: &SessionKey) -> Result<(), HubError> {
            self.fail()
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn member(name: &str) -> Member {
        Member {
            participant_id: ParticipantId::new(),
            display_name: name.to_string(),
        }
    }

    #[tokio::test]
    async fn test_members_kept_in_join_order() {
        let store = InMemorySessionStore::new();
        let key = SessionKey::new("/room1");
        let (a, b, c) = (member("a"), member("b"), member("c"));

        for m in [&a, &b, &c] {
            assert!(store.add_member(&key, m.clone()).await.unwrap());
        }

        let members = store.members(&key).await.unwrap();
        assert_eq!(members, vec![a.clone(), b.clone(), c.clone()]);

        store.remove_member(&key, b.participant_id).await.unwrap();
        assert_eq!(store.members(&key).await.unwrap(), vec![a, c]);
    }

    #[tokio::test]
    async fn test_add_member_is_idempotent() {
        let store = InMemorySessionStore::new();
        let key = SessionKey::new("/room1");
        let a = member("a");

        assert!(store.add_member(&key, a.clone()).await.unwrap());
        assert!(!store.add_member(&key, a.clone()).await.unwrap());
        assert_eq!(store.members(&key).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_last_member_removal_drops_session() {
        let store = InMemorySessionStore::new();
        let key = SessionKey::new("/room1");
        let a = member("a");

        store.add_member(&key, a.clone()).await.unwrap();
        assert_eq!(store.session_count().await, 1);

        let removed = store.remove_member(&key, a.participant_id).await.unwrap();
        assert_eq!(removed, Some(a));
        assert_eq!(store.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_session_and_member() {
        let store = InMemorySessionStore::new();
        let key = SessionKey::new("/nowhere");

        assert!(store.members(&key).await.unwrap().is_empty());
        assert_eq!(
            store
                .remove_member(&key, ParticipantId::new())
                .await
                .unwrap(),
            None
        );
        store.remove_session(&key).await.unwrap();
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let store = InMemorySessionStore::new();
        let k1 = SessionKey::new("/room1");
        let k2 = SessionKey::new("/room2");

        store.add_member(&k1, member("a")).await.unwrap();
        store.add_member(&k2, member("b")).await.unwrap();
        store.remove_session(&k1).await.unwrap();

        assert!(store.members(&k1).await.unwrap().is_empty());
        assert_eq!(store.members(&k2).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failing_store_counts_calls() {
        let store = mock::FailingSessionStore::new();
        let key = SessionKey::new("/room1");

        assert!(matches!(
            store.members(&key).await,
            Err(HubError::Store(_))
        ));
        assert!(store.add_member(&key, member("a")).await.is_err());
        assert_eq!(store.call_count(), 2);
    }
}
