//! Events received from the engine

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::DecodeError;
use crate::event::{Envelope, CUSTOM};
use crate::model::endpoint::{nullable, Endpoint, Metadata, TrackData};
use crate::model::tracks::{EncodingReason, TrackEncoding, VadStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connected {
    /// Id the engine assigned to the local endpoint
    pub id: String,
    #[serde(default)]
    pub other_endpoints: Vec<Endpoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointUpdated {
    pub id: String,
    #[serde(default, deserialize_with = "nullable")]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointRemoved {
    pub id: String,
    #[serde(default)]
    pub reason: String,
}

/// TURN server hosted by the engine itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnServer {
    pub username: String,
    pub password: String,
    pub server_addr: String,
    pub server_port: u16,
    /// `udp`, `tcp` or `tls`
    pub transport: String,
}

impl TurnServer {
    pub fn url(&self) -> String {
        format!(
            "turn:{}:{}?transport={}",
            self.server_addr, self.server_port, self.transport
        )
    }
}

/// Number of tracks of each kind the engine is about to send.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TracksTypes {
    #[serde(default)]
    pub audio: usize,
    #[serde(default)]
    pub video: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferData {
    #[serde(default)]
    pub integrated_turn_servers: Vec<TurnServer>,
    #[serde(default)]
    pub tracks_types: TracksTypes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TracksAdded {
    pub endpoint_id: String,
    #[serde(default)]
    pub tracks: BTreeMap<String, TrackData>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TracksRemoved {
    pub endpoint_id: String,
    #[serde(default)]
    pub track_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackUpdated {
    pub endpoint_id: String,
    pub track_id: String,
    #[serde(default, deserialize_with = "nullable")]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SdpAnswer {
    #[serde(rename = "type")]
    pub kind: String,
    pub sdp: String,
    #[serde(default)]
    pub mid_to_track_id: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_m_line_index: u32,
    #[serde(default)]
    pub sdp_mid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodingSwitched {
    pub endpoint_id: String,
    pub track_id: String,
    pub encoding: TrackEncoding,
    pub reason: EncodingReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VadNotification {
    pub track_id: String,
    pub status: VadStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandwidthEstimation {
    pub estimation: f64,
}

/// An event the engine may send to the client.
#[derive(Debug, Clone, PartialEq)]
pub enum ReceivableEvent {
    Connected(Connected),
    EndpointAdded(Endpoint),
    EndpointUpdated(EndpointUpdated),
    EndpointRemoved(EndpointRemoved),
    TracksAdded(TracksAdded),
    TracksRemoved(TracksRemoved),
    TrackUpdated(TrackUpdated),
    OfferData(OfferData),
    Candidate(RemoteCandidate),
    SdpAnswer(SdpAnswer),
    EncodingSwitched(EncodingSwitched),
    VadNotification(VadNotification),
    BandwidthEstimation(BandwidthEstimation),
}

impl ReceivableEvent {
    /// Decode a raw media event.
    ///
    /// ## Returns
    ///
    /// * `Ok(ReceivableEvent)` - the payload is a known event with well-formed data
    /// * `Err(DecodeError)` - the payload is malformed or of an unknown type
    pub fn decode(raw: &str) -> Result<Self, DecodeError> {
        let envelope = Envelope::parse(raw)?;

        match envelope.kind.as_str() {
            "connected" => Ok(Self::Connected(envelope.data()?)),
            "endpointAdded" => Ok(Self::EndpointAdded(envelope.data()?)),
            "endpointUpdated" => Ok(Self::EndpointUpdated(envelope.data()?)),
            "endpointRemoved" => Ok(Self::EndpointRemoved(envelope.data()?)),
            "tracksAdded" => Ok(Self::TracksAdded(envelope.data()?)),
            "tracksRemoved" => Ok(Self::TracksRemoved(envelope.data()?)),
            "trackUpdated" => Ok(Self::TrackUpdated(envelope.data()?)),
            CUSTOM => Self::decode_custom(envelope.data()?),
            other => Err(DecodeError::UnknownType(other.to_string())),
        }
    }

    fn decode_custom(inner: Envelope) -> Result<Self, DecodeError> {
        match inner.kind.as_str() {
            "offerData" => Ok(Self::OfferData(inner.data()?)),
            "candidate" => Ok(Self::Candidate(inner.data()?)),
            "sdpAnswer" => Ok(Self::SdpAnswer(inner.data()?)),
            "encodingSwitched" => Ok(Self::EncodingSwitched(inner.data()?)),
            "vadNotification" => Ok(Self::VadNotification(inner.data()?)),
            "bandwidthEstimation" => Ok(Self::BandwidthEstimation(inner.data()?)),
            other => Err(DecodeError::UnknownType(format!("{CUSTOM}/{other}"))),
        }
    }
}
