//! Interface to the native WebRTC engine
//!
//! The client never touches media itself. Peer connections, transceivers and
//! local capture are provided by the platform engine through the traits in
//! this module, and asynchronous engine callbacks are delivered as
//! [`NativeEvent`]s on a channel.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use str0m::media::{Direction, MediaKind, Rid};
use tokio::sync::mpsc;

use crate::config::EncoderOptions;
use crate::model::media::VideoParameters;

pub use crate::model::stats::NativeStatsEntry;

pub type NativeResult<T> = anyhow::Result<T>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceTransportPolicy {
    All,
    /// Only TURN relayed candidates are used.
    Relay,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceServer {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }

    pub fn turn(url: impl Into<String>, username: &str, credential: &str) -> Self {
        Self {
            urls: vec![url.into()],
            username: Some(username.to_string()),
            credential: Some(credential.to_string()),
        }
    }
}

/// Configuration of a native peer connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtcConfiguration {
    pub ice_servers: Vec<IceServer>,
    pub ice_transport_policy: IceTransportPolicy,
    pub unified_plan: bool,
    pub gather_continually: bool,
    pub disable_ipv6: bool,
    pub disable_tcp_candidates: bool,
}

impl RtcConfiguration {
    /// Configuration used for every session: unified plan, continual
    /// gathering, IPv6 and TCP candidates off.
    pub fn new(ice_servers: Vec<IceServer>, ice_transport_policy: IceTransportPolicy) -> Self {
        Self {
            ice_servers,
            ice_transport_policy,
            unified_plan: true,
            gather_continually: true,
            disable_ipv6: true,
            disable_tcp_candidates: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpType {
    Offer,
    Answer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub kind: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Answer,
            sdp: sdp.into(),
        }
    }

    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Offer,
            sdp: sdp.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_m_line_index: u32,
    pub sdp_mid: Option<String>,
}

/// Parameters of one outgoing RTP encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct RtpEncodingParameters {
    /// Simulcast stream id, `None` for single encoding senders
    pub rid: Option<Rid>,
    pub active: bool,
    pub scale_resolution_down_by: Option<f64>,
    /// Cap in bits per second, `None` means unlimited
    pub max_bitrate_bps: Option<u32>,
}

impl RtpEncodingParameters {
    pub fn new(rid: Option<Rid>, active: bool, scale_resolution_down_by: Option<f64>) -> Self {
        Self {
            rid,
            active,
            scale_resolution_down_by,
            max_bitrate_bps: None,
        }
    }

    pub fn is_rid(&self, rid: &str) -> bool {
        self.rid == Some(Rid::from(rid))
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RtpParameters {
    pub encodings: Vec<RtpEncodingParameters>,
}

/// Opaque handle of a transceiver within one peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransceiverId(pub u64);

pub struct TransceiverInit {
    pub kind: MediaKind,
    /// Track to send, `None` for receive-only transceivers
    pub track: Option<Arc<dyn NativeLocalTrack>>,
    pub direction: Direction,
    pub stream_ids: Vec<String>,
    pub send_encodings: Vec<RtpEncodingParameters>,
}

impl TransceiverInit {
    pub fn recv_only(kind: MediaKind) -> Self {
        Self {
            kind,
            track: None,
            direction: Direction::RecvOnly,
            stream_ids: Vec::new(),
            send_encodings: Vec::new(),
        }
    }
}

/// Snapshot of a transceiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransceiverInfo {
    pub id: TransceiverId,
    pub kind: MediaKind,
    /// Assigned once the transceiver was part of a local description
    pub mid: Option<String>,
    pub direction: Direction,
    /// Id of the track carried by the sender
    pub sender_track_id: Option<String>,
    pub receiver_id: String,
    /// Kind of the receiver track, `None` while the receiver has no track
    pub receiver_track_kind: Option<MediaKind>,
}

/// A remote track surfaced by the native engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeRemoteTrack {
    pub id: String,
    /// Kind as reported by the engine, expected to be `audio` or `video`
    pub kind: String,
}

/// Asynchronous callbacks of the native engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeEvent {
    IceCandidate(IceCandidate),
    /// A receiver started delivering media.
    TrackAdded {
        receiver_id: String,
        track: NativeRemoteTrack,
    },
    SignalingStateChanged(String),
    IceConnectionStateChanged(String),
    IceGatheringStateChanged(String),
    RenegotiationNeeded,
    /// A local capture ended, e.g. the user revoked screen capture.
    CaptureEnded { track_id: String },
}

pub type NativeEventSender = mpsc::UnboundedSender<NativeEvent>;

/// A local capture track owned by the native engine.
pub trait NativeLocalTrack: Debug + Send + Sync {
    fn id(&self) -> &str;
    fn kind(&self) -> MediaKind;
    fn start(&self);
    fn stop(&self);
    fn enabled(&self) -> bool;
    fn set_enabled(&self, enabled: bool);
}

#[async_trait]
pub trait NativePeerConnection: Send + Sync {
    fn add_transceiver(&mut self, init: TransceiverInit) -> NativeResult<TransceiverId>;

    fn transceivers(&self) -> Vec<TransceiverInfo>;

    fn set_direction(&mut self, id: TransceiverId, direction: Direction) -> NativeResult<()>;

    async fn create_offer(&mut self) -> NativeResult<SessionDescription>;

    async fn set_local_description(&mut self, description: SessionDescription) -> NativeResult<()>;

    async fn set_remote_description(&mut self, description: SessionDescription)
        -> NativeResult<()>;

    async fn add_ice_candidate(&mut self, candidate: IceCandidate) -> NativeResult<()>;

    fn restart_ice(&mut self);

    fn sender_parameters(&self, id: TransceiverId) -> Option<RtpParameters>;

    fn set_sender_parameters(&mut self, id: TransceiverId, parameters: RtpParameters)
        -> NativeResult<()>;

    /// Detach the sender of the transceiver from its track.
    fn remove_sender(&mut self, id: TransceiverId) -> NativeResult<()>;

    async fn stats(&self) -> NativeResult<Vec<NativeStatsEntry>>;

    fn close(&mut self);
}

pub trait PeerConnectionFactory: Send + Sync {
    fn create_peer_connection(
        &self,
        config: RtcConfiguration,
        events: NativeEventSender,
    ) -> NativeResult<Box<dyn NativePeerConnection>>;

    fn create_audio_track(&self) -> NativeResult<Arc<dyn NativeLocalTrack>>;

    /// Create a camera track, `capture_device` selects a camera by name.
    fn create_video_track(
        &self,
        parameters: &VideoParameters,
        capture_device: Option<&str>,
    ) -> NativeResult<Arc<dyn NativeLocalTrack>>;

    /// Create a screen capture track. The engine reports the end of the
    /// capture with [`NativeEvent::CaptureEnded`].
    fn create_screencast_track(
        &self,
        parameters: &VideoParameters,
        events: NativeEventSender,
    ) -> NativeResult<Arc<dyn NativeLocalTrack>>;

    fn set_encoder_options(&self, _options: &EncoderOptions) {}
}
