//! Events sent to the engine

use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::DecodeError;
use crate::event::{Envelope, CUSTOM};
use crate::model::endpoint::{nullable, Metadata};
use crate::model::tracks::TrackEncoding;

/// An event the client may send to the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum SendableEvent {
    /// Join the session.
    Connect { metadata: Metadata },
    /// Leave the session.
    Disconnect,
    UpdateEndpointMetadata {
        metadata: Metadata,
    },
    UpdateTrackMetadata {
        track_id: String,
        track_metadata: Metadata,
    },
    /// Ask the engine to forward a different layer of a remote track.
    SelectEncoding {
        track_id: String,
        encoding: TrackEncoding,
    },
    /// Ask the engine to start a new negotiation round.
    RenegotiateTracks,
    LocalCandidate {
        candidate: String,
        sdp_m_line_index: u32,
    },
    SdpOffer {
        sdp: String,
        track_id_to_track_metadata: BTreeMap<String, Metadata>,
        mid_to_track_id: HashMap<String, String>,
    },
}

#[derive(Deserialize)]
struct MetadataData {
    #[serde(default, deserialize_with = "nullable")]
    metadata: Metadata,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrackMetadataData {
    track_id: String,
    #[serde(default, deserialize_with = "nullable")]
    track_metadata: Metadata,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SelectEncodingData {
    track_id: String,
    variant: TrackEncoding,
}

#[derive(Deserialize)]
struct CandidateData {
    candidate: String,
    #[serde(rename = "sdpMLineIndex")]
    sdp_m_line_index: u32,
}

#[derive(Deserialize)]
struct OfferSdp {
    sdp: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SdpOfferData {
    sdp_offer: OfferSdp,
    #[serde(default)]
    track_id_to_track_metadata: BTreeMap<String, Option<Metadata>>,
    #[serde(default)]
    mid_to_track_id: HashMap<String, String>,
}

impl SendableEvent {
    fn envelope(&self) -> Envelope {
        match self {
            SendableEvent::Connect { metadata } => {
                Envelope::new("connect", Some(json!({ "metadata": metadata })))
            }
            SendableEvent::Disconnect => Envelope::new("disconnect", None),
            SendableEvent::UpdateEndpointMetadata { metadata } => {
                Envelope::new("updateEndpointMetadata", Some(json!({ "metadata": metadata })))
            }
            SendableEvent::UpdateTrackMetadata {
                track_id,
                track_metadata,
            } => Envelope::new(
                "updateTrackMetadata",
                Some(json!({ "trackId": track_id, "trackMetadata": track_metadata })),
            ),
            SendableEvent::SelectEncoding { track_id, encoding } => {
                Envelope::custom(Envelope::new(
                    "setTargetTrackVariant",
                    Some(json!({ "trackId": track_id, "variant": encoding })),
                ))
            }
            SendableEvent::RenegotiateTracks => {
                Envelope::custom(Envelope::new("renegotiateTracks", None))
            }
            SendableEvent::LocalCandidate {
                candidate,
                sdp_m_line_index,
            } => Envelope::custom(Envelope::new(
                "candidate",
                Some(json!({ "candidate": candidate, "sdpMLineIndex": sdp_m_line_index })),
            )),
            SendableEvent::SdpOffer {
                sdp,
                track_id_to_track_metadata,
                mid_to_track_id,
            } => Envelope::custom(Envelope::new(
                "sdpOffer",
                Some(json!({
                    "sdpOffer": { "type": "offer", "sdp": sdp },
                    "trackIdToTrackMetadata": track_id_to_track_metadata,
                    "midToTrackId": mid_to_track_id,
                })),
            )),
        }
    }

    /// The event as a JSON value.
    pub fn to_value(&self) -> Value {
        self.envelope().into_value()
    }

    /// The event serialized for the transport.
    pub fn encode(&self) -> String {
        self.envelope().to_json()
    }

    /// Decode an event produced by [`SendableEvent::encode`].
    pub fn decode(raw: &str) -> Result<Self, DecodeError> {
        let envelope = Envelope::parse(raw)?;

        match envelope.kind.as_str() {
            "connect" => {
                let data: MetadataData = envelope.data()?;
                Ok(SendableEvent::Connect {
                    metadata: data.metadata,
                })
            }
            "disconnect" => Ok(SendableEvent::Disconnect),
            "updateEndpointMetadata" => {
                let data: MetadataData = envelope.data()?;
                Ok(SendableEvent::UpdateEndpointMetadata {
                    metadata: data.metadata,
                })
            }
            "updateTrackMetadata" => {
                let data: TrackMetadataData = envelope.data()?;
                Ok(SendableEvent::UpdateTrackMetadata {
                    track_id: data.track_id,
                    track_metadata: data.track_metadata,
                })
            }
            CUSTOM => Self::decode_custom(envelope.data()?),
            other => Err(DecodeError::UnknownType(other.to_string())),
        }
    }

    fn decode_custom(inner: Envelope) -> Result<Self, DecodeError> {
        match inner.kind.as_str() {
            "setTargetTrackVariant" => {
                let data: SelectEncodingData = inner.data()?;
                Ok(SendableEvent::SelectEncoding {
                    track_id: data.track_id,
                    encoding: data.variant,
                })
            }
            "renegotiateTracks" => Ok(SendableEvent::RenegotiateTracks),
            "candidate" => {
                let data: CandidateData = inner.data()?;
                Ok(SendableEvent::LocalCandidate {
                    candidate: data.candidate,
                    sdp_m_line_index: data.sdp_m_line_index,
                })
            }
            "sdpOffer" => {
                let data: SdpOfferData = inner.data()?;
                Ok(SendableEvent::SdpOffer {
                    sdp: data.sdp_offer.sdp,
                    track_id_to_track_metadata: data
                        .track_id_to_track_metadata
                        .into_iter()
                        .map(|(id, m)| (id, m.unwrap_or_default()))
                        .collect(),
                    mid_to_track_id: data.mid_to_track_id,
                })
            }
            other => Err(DecodeError::UnknownType(format!("{CUSTOM}/{other}"))),
        }
    }
}
