//! Actor metrics and mailbox monitoring.
//!
//! Backlog bands (messages still queued after a receive):
//!
//! | Actor Type | Elevated | Critical |
//! |------------|----------|----------|
//! | Hub        | > 200    | > 1000   |
//! | Session    | > 100    | > 500    |
//! | Connection | > 50     | > 200    |
//!
//! [`HubMetrics`] holds the in-process counters read by readiness checks and
//! tests; Prometheus series are emitted separately by
//! [`crate::observability::metrics`].

use crate::observability::metrics as prom;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Queued-message counts at which an actor's backlog is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BacklogThresholds {
    /// Backlog above this is logged at debug level.
    pub elevated: usize,
    /// Backlog above this is logged as a warning.
    pub critical: usize,
}

/// Actor type for metrics labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorType {
    /// `HubActor` (singleton).
    Hub,
    /// `SessionActor` (one per session key).
    Session,
    /// `ConnectionActor` (one per WebSocket).
    Connection,
}

impl ActorType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ActorType::Hub => "hub",
            ActorType::Session => "session",
            ActorType::Connection => "connection",
        }
    }

    #[must_use]
    pub const fn backlog_thresholds(&self) -> BacklogThresholds {
        let (elevated, critical) = match self {
            ActorType::Hub => (200, 1000),
            ActorType::Session => (100, 500),
            ActorType::Connection => (50, 200),
        };
        BacklogThresholds { elevated, critical }
    }
}

/// Backlog band of a mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MailboxLevel {
    Normal,
    Elevated,
    Critical,
}

/// Per-actor mailbox statistics.
///
/// Owned by the actor it describes. After each receive the actor reports
/// how many messages are still queued behind the one it took; the monitor
/// logs only when the backlog changes band.
#[derive(Debug)]
pub struct MailboxMonitor {
    actor_type: ActorType,
    /// Session key, participant id, or instance id.
    actor_id: String,
    thresholds: BacklogThresholds,
    backlog: usize,
    peak_backlog: usize,
    level: MailboxLevel,
    processed: u64,
    // Bumped from delivery paths that only hold `&self`
    dropped: AtomicU64,
}

impl MailboxMonitor {
    #[must_use]
    pub fn new(actor_type: ActorType, actor_id: impl Into<String>) -> Self {
        Self {
            actor_type,
            actor_id: actor_id.into(),
            thresholds: actor_type.backlog_thresholds(),
            backlog: 0,
            peak_backlog: 0,
            level: MailboxLevel::Normal,
            processed: 0,
            dropped: AtomicU64::new(0),
        }
    }

    /// Record one received message with `queued` messages still waiting.
    pub fn observe(&mut self, queued: usize) {
        self.processed += 1;
        self.backlog = queued;
        self.peak_backlog = self.peak_backlog.max(queued);

        let level = self.level_for(queued);
        if level == self.level {
            return;
        }
        let previous = std::mem::replace(&mut self.level, level);
        match level {
            MailboxLevel::Critical => warn!(
                target: "hub.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                backlog = queued,
                threshold = self.thresholds.critical,
                "Mailbox backlog critical"
            ),
            MailboxLevel::Elevated if previous == MailboxLevel::Normal => debug!(
                target: "hub.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                backlog = queued,
                "Mailbox backlog elevated"
            ),
            MailboxLevel::Elevated | MailboxLevel::Normal => debug!(
                target: "hub.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                backlog = queued,
                "Mailbox backlog easing"
            ),
        }
    }

    /// Record a frame this actor could not hand on.
    pub fn record_drop(&self) {
        let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(
            target: "hub.actor.mailbox",
            actor_type = self.actor_type.as_str(),
            actor_id = %self.actor_id,
            dropped,
            "Message dropped"
        );
    }

    /// Messages queued at the last receive.
    #[must_use]
    pub fn backlog(&self) -> usize {
        self.backlog
    }

    #[must_use]
    pub fn peak_backlog(&self) -> usize {
        self.peak_backlog
    }

    #[must_use]
    pub fn processed(&self) -> u64 {
        self.processed
    }

    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn level(&self) -> MailboxLevel {
        self.level
    }

    fn level_for(&self, backlog: usize) -> MailboxLevel {
        if backlog > self.thresholds.critical {
            MailboxLevel::Critical
        } else if backlog > self.thresholds.elevated {
            MailboxLevel::Elevated
        } else {
            MailboxLevel::Normal
        }
    }
}

/// Live hub counters shared by every actor.
///
/// Each mutation also updates the matching Prometheus gauge so `/metrics`
/// and the in-process snapshot never disagree.
#[derive(Debug, Default)]
pub struct HubMetrics {
    active_sessions: AtomicUsize,
    active_participants: AtomicUsize,
    active_connections: AtomicUsize,
    actor_panics: AtomicU64,
}

/// Point-in-time copy of [`HubMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubMetricsSnapshot {
    pub sessions: usize,
    pub participants: usize,
    pub connections: usize,
}

impl HubMetrics {
    /// Create a new shared metrics instance.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn session_created(&self) {
        let n = self.active_sessions.fetch_add(1, Ordering::SeqCst) + 1;
        prom::set_sessions_active(n);
    }

    pub fn session_removed(&self) {
        let n = decrement(&self.active_sessions);
        prom::set_sessions_active(n);
    }

    pub fn participant_joined(&self) {
        let n = self.active_participants.fetch_add(1, Ordering::SeqCst) + 1;
        prom::set_participants_active(n);
    }

    pub fn participant_left(&self) {
        let n = decrement(&self.active_participants);
        prom::set_participants_active(n);
    }

    pub fn connection_opened(&self) {
        let n = self.active_connections.fetch_add(1, Ordering::SeqCst) + 1;
        prom::set_connections_active(n);
    }

    pub fn connection_closed(&self) {
        let n = decrement(&self.active_connections);
        prom::set_connections_active(n);
    }

    /// Record an actor task that ended in a panic.
    pub fn record_panic(&self, actor_type: ActorType) {
        let total = self.actor_panics.fetch_add(1, Ordering::Relaxed) + 1;
        prom::record_actor_panic(actor_type.as_str());
        tracing::error!(
            target: "hub.actor.panic",
            actor_type = actor_type.as_str(),
            total_panics = total,
            "Actor panic detected - indicates bug, investigation required"
        );
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.active_sessions.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn participant_count(&self) -> usize {
        self.active_participants.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.active_connections.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn panic_count(&self) -> u64 {
        self.actor_panics.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn snapshot(&self) -> HubMetricsSnapshot {
        HubMetricsSnapshot {
            sessions: self.session_count(),
            participants: self.participant_count(),
            connections: self.connection_count(),
        }
    }
}

fn decrement(counter: &AtomicUsize) -> usize {
    match counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1)) {
        Ok(prev) => prev - 1,
        Err(_) => 0,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_backlog_thresholds_per_actor() {
        assert_eq!(ActorType::Session.as_str(), "session");
        assert_eq!(
            ActorType::Session.backlog_thresholds(),
            BacklogThresholds {
                elevated: 100,
                critical: 500
            }
        );
        assert_eq!(ActorType::Connection.backlog_thresholds().elevated, 50);
        assert_eq!(ActorType::Hub.backlog_thresholds().critical, 1000);
    }

    #[test]
    fn test_observe_tracks_backlog_and_peak() {
        let mut monitor = MailboxMonitor::new(ActorType::Session, "/room1");

        monitor.observe(3);
        monitor.observe(1);
        assert_eq!(monitor.backlog(), 1);
        assert_eq!(monitor.peak_backlog(), 3);
        assert_eq!(monitor.processed(), 2);
    }

    #[test]
    fn test_observe_moves_between_levels() {
        let mut monitor = MailboxMonitor::new(ActorType::Connection, "conn");
        assert_eq!(monitor.level(), MailboxLevel::Normal);

        monitor.observe(75);
        assert_eq!(monitor.level(), MailboxLevel::Elevated);

        monitor.observe(201);
        assert_eq!(monitor.level(), MailboxLevel::Critical);

        monitor.observe(0);
        assert_eq!(monitor.level(), MailboxLevel::Normal);
        assert_eq!(monitor.peak_backlog(), 201);
    }

    #[test]
    fn test_record_drop_counts() {
        let monitor = MailboxMonitor::new(ActorType::Session, "/room1");
        monitor.record_drop();
        monitor.record_drop();
        assert_eq!(monitor.dropped(), 2);
    }

    #[test]
    fn test_hub_metrics_counts() {
        let metrics = HubMetrics::new();

        metrics.session_created();
        metrics.participant_joined();
        metrics.participant_joined();
        metrics.connection_opened();
        assert_eq!(
            metrics.snapshot(),
            HubMetricsSnapshot {
                sessions: 1,
                participants: 2,
                connections: 1,
            }
        );

        metrics.participant_left();
        metrics.session_removed();
        metrics.connection_closed();
        assert_eq!(metrics.snapshot().participants, 1);
        assert_eq!(metrics.session_count(), 0);
        assert_eq!(metrics.connection_count(), 0);
    }

    #[test]
    fn test_hub_metrics_decrement_saturates() {
        let metrics = HubMetrics::new();
        metrics.session_removed();
        assert_eq!(metrics.session_count(), 0);
    }

    #[test]
    fn test_hub_metrics_panics() {
        let metrics = HubMetrics::new();
        metrics.record_panic(ActorType::Session);
        metrics.record_panic(ActorType::Connection);
        assert_eq!(metrics.panic_count(), 2);
    }
}
