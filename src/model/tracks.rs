//! Remote track state
//!
//! This module provides the data structures describing remote tracks received
//! from the engine, their simulcast layers and the voice activity reported for
//! them.

use serde::{Deserialize, Serialize};
use str0m::media::Rid;

use crate::model::endpoint::Metadata;
use crate::peer::native::NativeRemoteTrack;

/// Simulcast layer of a video track.
///
/// `H` is the full capture resolution, `M` and `L` are scaled down by 2 and 4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TrackEncoding {
    #[serde(rename = "l")]
    L,
    #[serde(rename = "m")]
    M,
    #[serde(rename = "h")]
    H,
}

impl TrackEncoding {
    /// All layers, lowest resolution first.
    pub const ALL: [TrackEncoding; 3] = [TrackEncoding::L, TrackEncoding::M, TrackEncoding::H];

    /// The RTP stream id used for this layer.
    pub fn rid(self) -> &'static str {
        match self {
            TrackEncoding::L => "l",
            TrackEncoding::M => "m",
            TrackEncoding::H => "h",
        }
    }

    /// Resolution scale-down factor of this layer.
    pub fn scale_down(self) -> f64 {
        match self {
            TrackEncoding::L => 4.0,
            TrackEncoding::M => 2.0,
            TrackEncoding::H => 1.0,
        }
    }

    pub fn from_rid(rid: &str) -> Option<TrackEncoding> {
        TrackEncoding::ALL.into_iter().find(|e| e.rid() == rid)
    }

    pub fn as_rid(self) -> Rid {
        Rid::from(self.rid())
    }
}

/// Simulcast configuration of a video track.
///
/// Encodings missing from `active_encodings` are still negotiated and can be
/// enabled later.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulcastConfig {
    /// Whether the track is sent in three layers
    #[serde(default)]
    pub enabled: bool,
    /// Layers active from the start
    #[serde(default)]
    pub active_encodings: Vec<TrackEncoding>,
}

impl SimulcastConfig {
    pub fn new(enabled: bool, active_encodings: Vec<TrackEncoding>) -> Self {
        Self {
            enabled,
            active_encodings,
        }
    }

    pub fn is_active(&self, encoding: TrackEncoding) -> bool {
        self.active_encodings.contains(&encoding)
    }
}

/// Voice activity status reported by the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VadStatus {
    Speech,
    #[default]
    Silence,
}

/// Why the engine switched the encoding forwarded for a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EncodingReason {
    /// The reason could not be determined
    Other,
    /// The previously selected encoding became inactive
    EncodingInactive,
    /// Not enough bandwidth for the previously selected encoding
    LowBandwidth,
}

/// A remote media track delivered by the native engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteTrack {
    Audio(NativeRemoteTrack),
    Video(NativeRemoteTrack),
}

impl RemoteTrack {
    pub fn native(&self) -> &NativeRemoteTrack {
        match self {
            RemoteTrack::Audio(t) | RemoteTrack::Video(t) => t,
        }
    }
}

/// State of one remote track.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackContext {
    /// Media handle, `None` until the native engine reports the track
    pub remote_track: Option<RemoteTrack>,
    /// Id of the owning endpoint, resolved through the endpoint directory
    pub endpoint_id: String,
    pub track_id: String,
    pub metadata: Metadata,
    pub simulcast_config: Option<SimulcastConfig>,
    pub vad_status: VadStatus,
    /// Encoding currently forwarded by the engine
    pub encoding: Option<TrackEncoding>,
    pub encoding_reason: Option<EncodingReason>,
}

/// Change of a [`TrackContext`] announced to track subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackContextEvent {
    EncodingChanged(TrackContext),
    VoiceActivityChanged(TrackContext),
}

impl TrackContextEvent {
    pub fn context(&self) -> &TrackContext {
        match self {
            TrackContextEvent::EncodingChanged(ctx)
            | TrackContextEvent::VoiceActivityChanged(ctx) => ctx,
        }
    }
}

impl TrackContext {
    pub fn new(
        endpoint_id: impl Into<String>,
        track_id: impl Into<String>,
        metadata: Metadata,
        simulcast_config: Option<SimulcastConfig>,
    ) -> Self {
        Self {
            remote_track: None,
            endpoint_id: endpoint_id.into(),
            track_id: track_id.into(),
            metadata,
            simulcast_config,
            vad_status: VadStatus::Silence,
            encoding: None,
            encoding_reason: None,
        }
    }

    pub fn set_vad_status(&mut self, status: VadStatus) -> TrackContextEvent {
        self.vad_status = status;
        TrackContextEvent::VoiceActivityChanged(self.clone())
    }

    pub fn set_encoding(
        &mut self,
        encoding: TrackEncoding,
        reason: EncodingReason,
    ) -> TrackContextEvent {
        self.encoding = Some(encoding);
        self.encoding_reason = Some(reason);
        TrackContextEvent::EncodingChanged(self.clone())
    }
}
