//! `HubActor` - singleton supervisor for session actors.
//!
//! - Owns the session-key -> `SessionActor` table
//! - Creates a session on first join and releases it when the last member
//!   leaves; both happen inside the hub's own message loop, so a join can
//!   never land on a session that is being torn down
//! - Owns the root `CancellationToken` for graceful shutdown
//! - Detects session actors that exited unexpectedly (panic detection via
//!   `JoinHandle`)

use crate::config::Limits;
use crate::errors::HubError;
use crate::observability::metrics as prom;
use crate::store::SessionStore;

use super::messages::{HubMessage, HubStatus, JoinOutcome, Outbound, SessionState};
use super::metrics::{ActorType, HubMetrics, MailboxMonitor};
use super::session::{SessionActor, SessionActorHandle};

use chrono::{DateTime, Utc};
use common::types::{ParticipantId, SessionKey};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the hub mailbox.
const HUB_CHANNEL_BUFFER: usize = 1000;

/// How long to wait for a released session actor to finish.
const SESSION_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to the `HubActor`.
#[derive(Clone)]
pub struct HubActorHandle {
    sender: mpsc::Sender<HubMessage>,
    cancel_token: CancellationToken,
}

impl HubActorHandle {
    /// Spawn the hub actor and return a handle to it.
    #[must_use]
    pub fn new(
        instance_id: String,
        store: Arc<dyn SessionStore>,
        limits: Limits,
        metrics: Arc<HubMetrics>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(HUB_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();

        let actor = HubActor {
            mailbox: MailboxMonitor::new(ActorType::Hub, &instance_id),
            instance_id,
            receiver,
            cancel_token: cancel_token.clone(),
            store,
            sessions: HashMap::new(),
            accepting_new: true,
            limits,
            metrics,
        };

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
        }
    }

    /// Join `session_key`, creating the session if needed.
    pub async fn join(
        &self,
        session_key: SessionKey,
        participant_id: ParticipantId,
        display_name: String,
        outbound: Outbound,
    ) -> Result<JoinOutcome, HubError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(HubMessage::Join {
                session_key,
                participant_id,
                display_name,
                outbound,
                respond_to: tx,
            })
            .await
            .map_err(|e| HubError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| HubError::Internal(format!("response receive failed: {e}")))?
    }

    /// Leave `session_key`. Unknown sessions and non-members are a no-op.
    pub async fn leave(
        &self,
        session_key: SessionKey,
        participant_id: ParticipantId,
    ) -> Result<(), HubError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(HubMessage::Leave {
                session_key,
                participant_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| HubError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| HubError::Internal(format!("response receive failed: {e}")))?
    }

    pub async fn get_session(&self, session_key: SessionKey) -> Result<SessionState, HubError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(HubMessage::GetSession {
                session_key,
                respond_to: tx,
            })
            .await
            .map_err(|e| HubError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| HubError::Internal(format!("response receive failed: {e}")))?
    }

    pub async fn get_status(&self) -> Result<HubStatus, HubError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(HubMessage::GetStatus { respond_to: tx })
            .await
            .map_err(|e| HubError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| HubError::Internal(format!("response receive failed: {e}")))
    }

    /// Stop accepting joins and cancel every session.
    pub async fn shutdown(&self) -> Result<(), HubError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(HubMessage::Shutdown { respond_to: tx })
            .await
            .map_err(|e| HubError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| HubError::Internal(format!("response receive failed: {e}")))?
    }

    /// Cancel the actor (for immediate shutdown).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Get a child token for tasks that must stop with the hub.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

struct ManagedSession {
    handle: SessionActorHandle,
    task_handle: JoinHandle<()>,
    created_at: DateTime<Utc>,
}

/// The `HubActor` implementation.
pub struct HubActor {
    instance_id: String,
    receiver: mpsc::Receiver<HubMessage>,
    cancel_token: CancellationToken,
    store: Arc<dyn SessionStore>,
    sessions: HashMap<SessionKey, ManagedSession>,
    accepting_new: bool,
    limits: Limits,
    metrics: Arc<HubMetrics>,
    mailbox: MailboxMonitor,
}

impl HubActor {
    #[instrument(skip_all, name = "hub.actor.hub", fields(instance_id = %self.instance_id))]
    async fn run(mut self) {
        info!(
            target: "hub.actor.hub",
            instance_id = %self.instance_id,
            "HubActor started"
        );

        loop {
            self.check_session_health().await;

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "hub.actor.hub",
                        instance_id = %self.instance_id,
                        "HubActor received cancellation signal"
                    );
                    self.graceful_shutdown().await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.observe(self.receiver.len());
                            self.handle_message(message).await;
                        }
                        None => {
                            info!(
                                target: "hub.actor.hub",
                                instance_id = %self.instance_id,
                                "HubActor channel closed, exiting"
                            );
                            self.graceful_shutdown().await;
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "hub.actor.hub",
            instance_id = %self.instance_id,
            messages_processed = self.mailbox.processed(),
            "HubActor stopped"
        );
    }

    async fn handle_message(&mut self, message: HubMessage) {
        match message {
            HubMessage::Join {
                session_key,
                participant_id,
                display_name,
                outbound,
                respond_to,
            } => {
                let result = self
                    .join(session_key, participant_id, display_name, outbound)
                    .await;
                let _ = respond_to.send(result);
            }

            HubMessage::Leave {
                session_key,
                participant_id,
                respond_to,
            } => {
                let result = self.leave(&session_key, participant_id).await;
                let _ = respond_to.send(result);
            }

            HubMessage::GetSession {
                session_key,
                respond_to,
            } => {
                let result = match self.sessions.get(&session_key) {
                    Some(managed) => managed.handle.get_state().await,
                    None => Err(HubError::SessionNotFound(session_key.to_string())),
                };
                let _ = respond_to.send(result);
            }

            HubMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.status());
            }

            HubMessage::Shutdown { respond_to } => {
                info!(
                    target: "hub.actor.hub",
                    instance_id = %self.instance_id,
                    session_count = self.sessions.len(),
                    "Initiating graceful shutdown"
                );
                self.accepting_new = false;
                self.cancel_token.cancel();
                let _ = respond_to.send(Ok(()));
            }
        }
    }

    async fn join(
        &mut self,
        session_key: SessionKey,
        participant_id: ParticipantId,
        display_name: String,
        outbound: Outbound,
    ) -> Result<JoinOutcome, HubError> {
        if !self.accepting_new {
            return Err(HubError::Draining);
        }

        let created = if self.sessions.contains_key(&session_key) {
            false
        } else {
            if self.sessions.len() >= self.limits.max_sessions {
                prom::record_join("capacity");
                warn!(
                    target: "hub.actor.hub",
                    instance_id = %self.instance_id,
                    max_sessions = self.limits.max_sessions,
                    "Hub at capacity, rejecting new session"
                );
                return Err(HubError::HubCapacityExceeded);
            }
            self.create_session(session_key.clone());
            true
        };

        let handle = self
            .sessions
            .get(&session_key)
            .map(|managed| managed.handle.clone())
            .ok_or_else(|| HubError::Internal("session vanished after creation".to_string()))?;

        match handle.join(participant_id, display_name, outbound).await {
            Ok(result) => Ok(JoinOutcome {
                result,
                session: handle,
            }),
            Err(e) => {
                if created {
                    self.release_session(&session_key).await;
                }
                Err(e)
            }
        }
    }

    async fn leave(
        &mut self,
        session_key: &SessionKey,
        participant_id: ParticipantId,
    ) -> Result<(), HubError> {
        let Some(managed) = self.sessions.get(session_key) else {
            return Ok(());
        };

        let remaining = managed.handle.leave(participant_id).await?;
        if remaining == 0 {
            self.release_session(session_key).await;
        }
        Ok(())
    }

    fn create_session(&mut self, session_key: SessionKey) {
        let (handle, task_handle) = SessionActor::spawn(
            session_key.clone(),
            self.cancel_token.child_token(),
            Arc::clone(&self.store),
            self.limits.max_participants_per_session,
            Arc::clone(&self.metrics),
        );

        self.sessions.insert(
            session_key.clone(),
            ManagedSession {
                handle,
                task_handle,
                created_at: Utc::now(),
            },
        );
        self.metrics.session_created();

        info!(
            target: "hub.actor.hub",
            instance_id = %self.instance_id,
            session_key = %session_key,
            total_sessions = self.sessions.len(),
            "Session created"
        );
    }

    /// Cancel and forget a session. Waiting for the task happens in the
    /// background so the hub loop is never blocked on it.
    async fn release_session(&mut self, session_key: &SessionKey) {
        let Some(managed) = self.sessions.remove(session_key) else {
            return;
        };

        managed.handle.cancel();
        self.metrics.session_removed();

        let lifetime = Utc::now().signed_duration_since(managed.created_at);
        info!(
            target: "hub.actor.hub",
            instance_id = %self.instance_id,
            session_key = %session_key,
            lifetime_secs = lifetime.num_seconds(),
            total_sessions = self.sessions.len(),
            "Session released"
        );

        let key = session_key.clone();
        let metrics = Arc::clone(&self.metrics);
        tokio::spawn(async move {
            match tokio::time::timeout(SESSION_STOP_TIMEOUT, managed.task_handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.is_panic() => {
                    metrics.record_panic(ActorType::Session);
                    warn!(
                        target: "hub.actor.hub",
                        session_key = %key,
                        error = ?e,
                        "Session actor panicked during release"
                    );
                }
                Ok(Err(_)) => {}
                Err(_) => {
                    warn!(
                        target: "hub.actor.hub",
                        session_key = %key,
                        "Session actor release timed out"
                    );
                }
            }
        });

        if let Err(e) = self.store.remove_session(session_key).await {
            warn!(
                target: "hub.actor.hub",
                session_key = %session_key,
                error = %e,
                "Failed to clear released session from store"
            );
        }
    }

    fn status(&self) -> HubStatus {
        HubStatus {
            session_count: self.sessions.len(),
            participant_count: self.metrics.participant_count(),
            connection_count: self.metrics.connection_count(),
            is_draining: !self.accepting_new,
            mailbox_depth: self.mailbox.backlog(),
        }
    }

    async fn graceful_shutdown(&mut self) {
        self.accepting_new = false;

        for managed in self.sessions.values() {
            managed.handle.cancel();
        }

        for (session_key, managed) in self.sessions.drain() {
            match tokio::time::timeout(SESSION_STOP_TIMEOUT, managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "hub.actor.hub",
                        session_key = %session_key,
                        "Session actor completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "hub.actor.hub",
                        session_key = %session_key,
                        error = ?e,
                        "Session actor task failed during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "hub.actor.hub",
                        session_key = %session_key,
                        "Session actor shutdown timed out"
                    );
                }
            }
            self.metrics.session_removed();
            if let Err(e) = self.store.remove_session(&session_key).await {
                warn!(
                    target: "hub.actor.hub",
                    session_key = %session_key,
                    error = %e,
                    "Failed to clear session from store during shutdown"
                );
            }
        }

        info!(
            target: "hub.actor.hub",
            instance_id = %self.instance_id,
            "Graceful shutdown complete"
        );
    }

    /// Reap session actors whose task ended without being released.
    async fn check_session_health(&mut self) {
        let finished: Vec<SessionKey> = self
            .sessions
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(key, _)| key.clone())
            .collect();

        for session_key in finished {
            let Some(managed) = self.sessions.remove(&session_key) else {
                continue;
            };

            match managed.task_handle.await {
                Ok(()) => {
                    warn!(
                        target: "hub.actor.hub",
                        session_key = %session_key,
                        "Session actor exited unexpectedly"
                    );
                }
                Err(join_error) if join_error.is_panic() => {
                    error!(
                        target: "hub.actor.hub",
                        session_key = %session_key,
                        error = ?join_error,
                        "Session actor panicked - members lose this session"
                    );
                    self.metrics.record_panic(ActorType::Session);
                }
                Err(_) => {}
            }

            self.metrics.session_removed();
            if let Err(e) = self.store.remove_session(&session_key).await {
                warn!(
                    target: "hub.actor.hub",
                    session_key = %session_key,
                    error = %e,
                    "Failed to clear dead session from store"
                );
            }
        }
    }
}
