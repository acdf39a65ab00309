//! Session-history collaborator.
//!
//! The orchestrator records every successful join; the presentation layer
//! lists them (e.g. "recent rooms"). Recording is fire-and-forget.

use crate::errors::HistoryError;
use chrono::{DateTime, Utc};
use common::types::SessionKey;
use tokio::sync::Mutex;

/// One recorded join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRecord {
    pub session_key: SessionKey,
    pub joined_at: DateTime<Utc>,
}

/// Storage for join history.
#[async_trait::async_trait]
pub trait SessionHistory: Send + Sync {
    async fn record_join(&self, session_key: &SessionKey) -> Result<(), HistoryError>;

    /// Every recorded join, oldest first.
    async fn list_joins(&self) -> Result<Vec<JoinRecord>, HistoryError>;
}

/// Process-lifetime history.
#[derive(Debug, Default)]
pub struct InMemorySessionHistory {
    records: Mutex<Vec<JoinRecord>>,
}

impl InMemorySessionHistory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl SessionHistory for InMemorySessionHistory {
    async fn record_join(&self, session_key: &SessionKey) -> Result<(), HistoryError> {
        self.records.lock().await.push(JoinRecord {
            session_key: session_key.clone(),
            joined_at: Utc::now(),
        });
        Ok(())
    }

    async fn list_joins(&self) -> Result<Vec<JoinRecord>, HistoryError> {
        Ok(self.records.lock().await.clone())
    }
}
