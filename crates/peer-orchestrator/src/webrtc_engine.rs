//! [`MediaEngine`] on the `webrtc` crate.
//!
//! Local tracks are exposed as `TrackLocalStaticSample`s; the capture
//! pipeline writes encoded samples into the track returned by
//! [`WebRtcEngine::local_track`]. Callbacks from the peer connection are
//! forwarded as [`PeerEvent`]s.

use crate::engine::{
    ConnectionId, ConnectionState, MediaConnection, MediaEngine, PeerEvent, RemoteTrack, SenderId,
};
use crate::errors::EngineError;
use crate::media::{LocalTrack, MediaKind};
use crate::signal::{IceCandidate, SdpKind, SessionDescription};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine as CodecRegistry, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

type SampleTracks = Arc<Mutex<HashMap<String, Arc<TrackLocalStaticSample>>>>;

/// Media engine backed by `webrtc::api::API`.
pub struct WebRtcEngine {
    api: API,
    ice_servers: Vec<String>,
    tracks: SampleTracks,
}

impl WebRtcEngine {
    /// Build an engine with default codecs and interceptors.
    pub fn new(ice_servers: Vec<String>) -> Result<Self, EngineError> {
        let mut codecs = CodecRegistry::default();
        codecs
            .register_default_codecs()
            .map_err(|e| EngineError::Internal(format!("codec registration failed: {e}")))?;

        let registry = register_default_interceptors(Registry::new(), &mut codecs)
            .map_err(|e| EngineError::Internal(format!("interceptor registration failed: {e}")))?;

        let api = APIBuilder::new()
            .with_media_engine(codecs)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self {
            api,
            ice_servers,
            tracks: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Sample track backing `track`, created on first use.
    pub async fn local_track(&self, track: &LocalTrack) -> Arc<TrackLocalStaticSample> {
        sample_track(&self.tracks, track).await
    }

    fn rtc_config(&self) -> RTCConfiguration {
        RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }
}

async fn sample_track(tracks: &SampleTracks, track: &LocalTrack) -> Arc<TrackLocalStaticSample> {
    let mut tracks = tracks.lock().await;
    Arc::clone(tracks.entry(track.id.clone()).or_insert_with(|| {
        let codec = match track.kind {
            MediaKind::Audio => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48_000,
                channels: 2,
                ..Default::default()
            },
            MediaKind::Video => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                clock_rate: 90_000,
                ..Default::default()
            },
        };
        Arc::new(TrackLocalStaticSample::new(
            codec,
            track.id.clone(),
            "mesh-meeting".to_owned(),
        ))
    }))
}

fn map_state(state: RTCPeerConnectionState) -> Option<ConnectionState> {
    match state {
        RTCPeerConnectionState::New => Some(ConnectionState::New),
        RTCPeerConnectionState::Connecting => Some(ConnectionState::Connecting),
        RTCPeerConnectionState::Connected => Some(ConnectionState::Connected),
        RTCPeerConnectionState::Disconnected => Some(ConnectionState::Disconnected),
        RTCPeerConnectionState::Failed => Some(ConnectionState::Failed),
        RTCPeerConnectionState::Closed => Some(ConnectionState::Closed),
        RTCPeerConnectionState::Unspecified => None,
    }
}

fn to_rtc(description: SessionDescription) -> Result<RTCSessionDescription, EngineError> {
    match description.kind {
        SdpKind::Offer => RTCSessionDescription::offer(description.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(description.sdp),
    }
    .map_err(|e| EngineError::Negotiation(e.to_string()))
}

fn from_rtc(description: RTCSessionDescription) -> Result<SessionDescription, EngineError> {
    let kind = match description.sdp_type {
        RTCSdpType::Offer => SdpKind::Offer,
        RTCSdpType::Answer => SdpKind::Answer,
        other => {
            return Err(EngineError::Negotiation(format!(
                "unsupported description type {other}"
            )))
        }
    };
    Ok(SessionDescription {
        kind,
        sdp: description.sdp,
    })
}

#[async_trait::async_trait]
impl MediaEngine for WebRtcEngine {
    async fn create_connection(
        &self,
        id: ConnectionId,
        events: mpsc::Sender<PeerEvent>,
    ) -> Result<Box<dyn MediaConnection>, EngineError> {
        let pc = Arc::new(
            self.api
                .new_peer_connection(self.rtc_config())
                .await
                .map_err(|e| EngineError::Internal(e.to_string()))?,
        );

        let ice_tx = events.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let ice_tx = ice_tx.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = ice_tx
                            .send(PeerEvent::IceCandidate {
                                connection: id,
                                candidate: IceCandidate {
                                    candidate: init.candidate,
                                    sdp_mid: init.sdp_mid,
                                    sdp_mline_index: init.sdp_mline_index,
                                },
                            })
                            .await;
                    }
                    Err(e) => {
                        warn!(target: "peer.webrtc", connection = %id, error = %e, "Candidate serialization failed");
                    }
                }
            })
        }));

        let state_tx = events.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let state_tx = state_tx.clone();
            Box::pin(async move {
                debug!(target: "peer.webrtc", connection = %id, state = %state, "Peer connection state");
                if let Some(state) = map_state(state) {
                    let _ = state_tx
                        .send(PeerEvent::StateChanged {
                            connection: id,
                            state,
                        })
                        .await;
                }
            })
        }));

        let track_tx = events;
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let track_tx = track_tx.clone();
            Box::pin(async move {
                let kind = match track.kind() {
                    RTPCodecType::Audio => MediaKind::Audio,
                    RTPCodecType::Video => MediaKind::Video,
                    RTPCodecType::Unspecified => return,
                };
                let _ = track_tx
                    .send(PeerEvent::RemoteTrack {
                        connection: id,
                        track: RemoteTrack {
                            id: track.id(),
                            kind,
                            stream_id: track.stream_id(),
                        },
                    })
                    .await;
            })
        }));

        Ok(Box::new(WebRtcConnection {
            pc,
            tracks: Arc::clone(&self.tracks),
            senders: Mutex::new(Vec::new()),
        }))
    }
}

struct WebRtcConnection {
    pc: Arc<RTCPeerConnection>,
    tracks: SampleTracks,
    senders: Mutex<Vec<Arc<RTCRtpSender>>>,
}

#[async_trait::async_trait]
impl MediaConnection for WebRtcConnection {
    async fn add_track(&self, track: &LocalTrack) -> Result<SenderId, EngineError> {
        let local = sample_track(&self.tracks, track).await;
        let sender = self
            .pc
            .add_track(local as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| EngineError::Track(e.to_string()))?;

        // Drain RTCP so interceptors keep running
        let rtcp_sender = Arc::clone(&sender);
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while let Ok((_, _)) = rtcp_sender.read(&mut rtcp_buf).await {}
        });

        let mut senders = self.senders.lock().await;
        let id = u32::try_from(senders.len())
            .map_err(|_| EngineError::Track("too many senders".to_string()))?;
        senders.push(sender);
        Ok(SenderId(id))
    }

    async fn replace_track(
        &self,
        sender: SenderId,
        track: Option<&LocalTrack>,
    ) -> Result<(), EngineError> {
        let rtp_sender = self
            .senders
            .lock()
            .await
            .get(sender.0 as usize)
            .cloned()
            .ok_or_else(|| EngineError::Track(format!("unknown sender {}", sender.0)))?;

        let replacement = match track {
            Some(track) => {
                Some(sample_track(&self.tracks, track).await as Arc<dyn TrackLocal + Send + Sync>)
            }
            None => None,
        };
        rtp_sender
            .replace_track(replacement)
            .await
            .map_err(|e| EngineError::Track(e.to_string()))
    }

    async fn create_offer(&self) -> Result<SessionDescription, EngineError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| EngineError::Negotiation(e.to_string()))?;
        from_rtc(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription, EngineError> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| EngineError::Negotiation(e.to_string()))?;
        from_rtc(answer)
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), EngineError> {
        self.pc
            .set_local_description(to_rtc(description)?)
            .await
            .map_err(|e| EngineError::Negotiation(e.to_string()))
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), EngineError> {
        self.pc
            .set_remote_description(to_rtc(description)?)
            .await
            .map_err(|e| EngineError::Negotiation(e.to_string()))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), EngineError> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: None,
            })
            .await
            .map_err(|e| EngineError::Candidate(e.to_string()))
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            debug!(target: "peer.webrtc", error = %e, "Peer connection close failed");
        }
    }
}
