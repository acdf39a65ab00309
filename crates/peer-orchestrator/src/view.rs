//! Session membership view.
//!
//! A read-only projection of the orchestrator's state for the presentation
//! layer, recomputed by [`project`] after every change and published on a
//! `tokio::sync::watch` channel.

use crate::client::ConnectivityStatus;
use crate::engine::RemoteTrack;
use crate::link::{LinkState, PeerLink};
use crate::media::{LocalMedia, LocalTrack};
use chrono::{DateTime, Utc};
use common::protocol::Member;
use common::types::ParticipantId;
use std::collections::HashMap;

/// One chat message as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEntry {
    pub sender_id: ParticipantId,
    pub sender_name: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    /// Sent by the local participant.
    pub is_local: bool,
}

/// Chat history of the current session with an unread counter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatLog {
    entries: Vec<ChatEntry>,
    unread: usize,
}

impl ChatLog {
    pub fn push_remote(&mut self, sender_id: ParticipantId, sender_name: String, text: String) {
        self.entries.push(ChatEntry {
            sender_id,
            sender_name,
            text,
            timestamp: Utc::now(),
            is_local: false,
        });
        self.unread += 1;
    }

    pub fn push_local(&mut self, sender_id: ParticipantId, sender_name: String, text: String) {
        self.entries.push(ChatEntry {
            sender_id,
            sender_name,
            text,
            timestamp: Utc::now(),
            is_local: true,
        });
    }

    pub fn mark_read(&mut self) {
        self.unread = 0;
    }

    #[must_use]
    pub fn entries(&self) -> &[ChatEntry] {
        &self.entries
    }

    #[must_use]
    pub fn unread(&self) -> usize {
        self.unread
    }
}

/// Session membership as last announced by the hub, in join order.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    order: Vec<ParticipantId>,
    names: HashMap<ParticipantId, String>,
}

impl Roster {
    /// Replace the roster with a full member list from the hub.
    pub fn update(&mut self, members: &[Member]) {
        self.order = members.iter().map(|m| m.participant_id).collect();
        self.names = members
            .iter()
            .map(|m| (m.participant_id, m.display_name.clone()))
            .collect();
    }

    pub fn remove(&mut self, participant_id: ParticipantId) {
        self.order.retain(|id| *id != participant_id);
        self.names.remove(&participant_id);
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.names.clear();
    }

    #[must_use]
    pub fn name(&self, participant_id: ParticipantId) -> Option<&str> {
        self.names.get(&participant_id).map(String::as_str)
    }

    fn position(&self, participant_id: ParticipantId) -> usize {
        self.order
            .iter()
            .position(|id| *id == participant_id)
            .unwrap_or(usize::MAX)
    }
}

/// The local participant's preview.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalPreview {
    pub participant_id: Option<ParticipantId>,
    pub display_name: String,
    /// Track shown in the preview: the screen while sharing, else the camera.
    pub video: Option<LocalTrack>,
    pub has_audio: bool,
    pub video_enabled: bool,
    pub audio_enabled: bool,
    pub screen_sharing: bool,
}

/// A connected remote participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteParticipant {
    pub participant_id: ParticipantId,
    pub display_name: String,
    pub tracks: Vec<RemoteTrack>,
}

/// Everything the presentation layer renders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipView {
    pub local: LocalPreview,
    /// Connected remotes in join order.
    pub remotes: Vec<RemoteParticipant>,
    pub chat: Vec<ChatEntry>,
    pub unread_chat: usize,
    pub connectivity: ConnectivityStatus,
}

impl MembershipView {
    #[must_use]
    pub fn remote(&self, participant_id: ParticipantId) -> Option<&RemoteParticipant> {
        self.remotes
            .iter()
            .find(|r| r.participant_id == participant_id)
    }
}

/// Inputs of [`project`].
pub struct ViewSource<'a> {
    pub local_id: Option<ParticipantId>,
    pub display_name: &'a str,
    pub media: &'a LocalMedia,
    pub links: &'a HashMap<ParticipantId, PeerLink>,
    pub roster: &'a Roster,
    pub chat: &'a ChatLog,
    pub connectivity: ConnectivityStatus,
}

/// Compute the view. Only CONNECTED links appear as remotes.
#[must_use]
pub fn project(source: &ViewSource<'_>) -> MembershipView {
    let mut remotes: Vec<RemoteParticipant> = source
        .links
        .values()
        .filter(|link| link.state() == LinkState::Connected)
        .map(|link| RemoteParticipant {
            participant_id: link.remote_id(),
            display_name: source
                .roster
                .name(link.remote_id())
                .unwrap_or_default()
                .to_string(),
            tracks: link.remote_tracks().to_vec(),
        })
        .collect();
    remotes.sort_by_key(|r| (source.roster.position(r.participant_id), r.participant_id));

    MembershipView {
        local: LocalPreview {
            participant_id: source.local_id,
            display_name: source.display_name.to_string(),
            video: source.media.outgoing_video().cloned(),
            has_audio: source.media.microphone.is_some(),
            video_enabled: source.media.video_enabled,
            audio_enabled: source.media.audio_enabled,
            screen_sharing: source.media.is_screen_sharing(),
        },
        remotes,
        chat: source.chat.entries().to_vec(),
        unread_chat: source.chat.unread(),
        connectivity: source.connectivity,
    }
}
