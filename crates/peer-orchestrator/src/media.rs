//! Media capability probe.
//!
//! Capture hardware is reached through [`CaptureDevices`]. [`MediaProbe`]
//! applies the permission degrade chain (camera + microphone, then
//! microphone only, then nothing) and never fails: a participant without
//! devices still joins and receives.

use crate::errors::CaptureError;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Kind of a media track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

/// Where a local track comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackSource {
    Camera,
    Microphone,
    Screen,
}

/// Handle to one captured track. Cheap to clone; every `PeerLink` shares it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocalTrack {
    pub id: String,
    pub kind: MediaKind,
    pub source: TrackSource,
}

/// Host capture devices.
#[async_trait::async_trait]
pub trait CaptureDevices: Send + Sync {
    /// Open camera and/or microphone in one request.
    async fn open(&self, video: bool, audio: bool) -> Result<Vec<LocalTrack>, CaptureError>;

    /// Open a display-capture (screen share) video track.
    async fn open_display(&self) -> Result<LocalTrack, CaptureError>;

    /// Enable or mute an open track without releasing it.
    fn set_enabled(&self, track: &LocalTrack, enabled: bool);

    /// Stop a track and release its device.
    fn release(&self, track: &LocalTrack);
}

/// Local capture state of one orchestrator.
///
/// Exactly one outgoing video source at a time: the screen track while
/// sharing, the camera otherwise.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalMedia {
    pub camera: Option<LocalTrack>,
    pub microphone: Option<LocalTrack>,
    pub screen: Option<LocalTrack>,
    pub video_enabled: bool,
    pub audio_enabled: bool,
}

impl LocalMedia {
    /// The video track currently sent to peers.
    #[must_use]
    pub fn outgoing_video(&self) -> Option<&LocalTrack> {
        self.screen.as_ref().or(self.camera.as_ref())
    }

    /// Every track attached to a new peer connection.
    #[must_use]
    pub fn outgoing_tracks(&self) -> Vec<&LocalTrack> {
        self.microphone
            .iter()
            .chain(self.outgoing_video())
            .collect()
    }

    #[must_use]
    pub fn is_screen_sharing(&self) -> bool {
        self.screen.is_some()
    }
}

/// Requests capture with graceful degradation.
#[derive(Clone)]
pub struct MediaProbe {
    devices: Arc<dyn CaptureDevices>,
}

impl MediaProbe {
    #[must_use]
    pub fn new(devices: Arc<dyn CaptureDevices>) -> Self {
        Self { devices }
    }

    /// Acquire the requested kinds, degrading on denial. Never fails.
    pub async fn acquire(&self, want_video: bool, want_audio: bool) -> LocalMedia {
        let attempts: &[(bool, bool)] = match (want_video, want_audio) {
            (true, true) => &[(true, true), (false, true)],
            (true, false) => &[(true, false)],
            (false, true) => &[(false, true)],
            (false, false) => &[],
        };

        for &(video, audio) in attempts {
            match self.devices.open(video, audio).await {
                Ok(tracks) => {
                    let media = Self::assemble(tracks);
                    info!(
                        target: "peer.media",
                        video = media.camera.is_some(),
                        audio = media.microphone.is_some(),
                        "Capture acquired"
                    );
                    return media;
                }
                Err(e) => {
                    warn!(
                        target: "peer.media",
                        video,
                        audio,
                        error = %e,
                        "Capture request denied, degrading"
                    );
                }
            }
        }

        info!(target: "peer.media", "Continuing without local media");
        LocalMedia::default()
    }

    /// Open a screen-share track.
    pub async fn acquire_display(&self) -> Result<LocalTrack, CaptureError> {
        self.devices.open_display().await
    }

    /// Mute or unmute the local tracks of `kind`. Returns false when no such
    /// track is captured.
    pub fn set_enabled(&self, media: &mut LocalMedia, kind: MediaKind, enabled: bool) -> bool {
        let track = match kind {
            MediaKind::Audio => media.microphone.as_ref(),
            MediaKind::Video => media.camera.as_ref(),
        };
        let Some(track) = track else {
            return false;
        };
        self.devices.set_enabled(track, enabled);
        match kind {
            MediaKind::Audio => media.audio_enabled = enabled,
            MediaKind::Video => media.video_enabled = enabled,
        }
        debug!(target: "peer.media", kind = kind.as_str(), enabled, "Track toggled");
        true
    }

    /// Release one track.
    pub fn release(&self, track: &LocalTrack) {
        self.devices.release(track);
    }

    /// Release every captured track.
    pub fn release_all(&self, media: &mut LocalMedia) {
        for track in [
            media.camera.take(),
            media.microphone.take(),
            media.screen.take(),
        ]
        .into_iter()
        .flatten()
        {
            self.devices.release(&track);
        }
        media.video_enabled = false;
        media.audio_enabled = false;
    }

    fn assemble(tracks: Vec<LocalTrack>) -> LocalMedia {
        let mut media = LocalMedia::default();
        for track in tracks {
            match track.kind {
                MediaKind::Video if media.camera.is_none() => {
                    media.video_enabled = true;
                    media.camera = Some(track);
                }
                MediaKind::Audio if media.microphone.is_none() => {
                    media.audio_enabled = true;
                    media.microphone = Some(track);
                }
                _ => {}
            }
        }
        media
    }
}

/// Mock capture devices for testing.
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Mutex, PoisonError};

    /// Capture devices with configurable denial.
    #[derive(Default)]
    pub struct MockCaptureDevices {
        deny_video: bool,
        deny_audio: bool,
        deny_display: bool,
        next_id: AtomicUsize,
        open_calls: Mutex<Vec<(bool, bool)>>,
        enabled: Mutex<HashMap<String, bool>>,
        released: Mutex<Vec<String>>,
    }

    impl MockCaptureDevices {
        /// Grant every request.
        pub fn granting() -> Self {
            Self::default()
        }

        /// Deny camera access; microphone is granted.
        pub fn denying_video() -> Self {
            Self {
                deny_video: true,
                ..Self::default()
            }
        }

        /// Deny every capture request.
        pub fn denying_all() -> Self {
            Self {
                deny_video: true,
                deny_audio: true,
                deny_display: true,
                ..Self::default()
            }
        }

        /// Also deny display capture.
        #[must_use]
        pub fn with_display_denied(mut self) -> Self {
            self.deny_display = true;
            self
        }

        /// `(video, audio)` of every `open` call in order.
        pub fn open_calls(&self) -> Vec<(bool, bool)> {
            self.open_calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        /// Last enabled state set for `track_id`, if any.
        pub fn is_enabled(&self, track_id: &str) -> Option<bool> {
            self.enabled
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(track_id)
                .copied()
        }

        /// Ids of released tracks in order.
        pub fn released(&self) -> Vec<String> {
            self.released
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        fn track(&self, kind: MediaKind, source: TrackSource) -> LocalTrack {
            let n = self.next_id.fetch_add(1, Ordering::SeqCst);
            let prefix = match source {
                TrackSource::Camera => "camera",
                TrackSource::Microphone => "mic",
                TrackSource::Screen => "screen",
            };
            LocalTrack {
                id: format!("{prefix}-{n}"),
                kind,
                source,
            }
        }
    }

    #[async_trait::async_trait]
    impl CaptureDevices for MockCaptureDevices {
        async fn open(&self, video: bool, audio: bool) -> Result<Vec<LocalTrack>, CaptureError> {
            self.open_calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((video, audio));

            if video && self.deny_video {
                return Err(CaptureError::PermissionDenied("camera".to_string()));
            }
            if audio && self.deny_audio {
                return Err(CaptureError::PermissionDenied("microphone".to_string()));
            }

            let mut tracks = Vec::new();
            if video {
                tracks.push(self.track(MediaKind::Video, TrackSource::Camera));
            }
            if audio {
                tracks.push(self.track(MediaKind::Audio, TrackSource::Microphone));
            }
            Ok(tracks)
        }

        async fn open_display(&self) -> Result<LocalTrack, CaptureError> {
            if self.deny_display {
                return Err(CaptureError::PermissionDenied("display".to_string()));
            }
            Ok(self.track(MediaKind::Video, TrackSource::Screen))
        }

        fn set_enabled(&self, track: &LocalTrack, enabled: bool) {
            self.enabled
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(track.id.clone(), enabled);
        }

        fn release(&self, track: &LocalTrack) {
            self.released
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(track.id.clone());
        }
    }
}
