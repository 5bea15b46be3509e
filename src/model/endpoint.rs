//! Session participants
//!
//! An [`Endpoint`] is either the local client or one remote participant of the
//! session, together with the tracks it publishes.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::model::tracks::SimulcastConfig;

/// Opaque key-value metadata attached to endpoints and tracks.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Information about a single published track.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackData {
    /// Metadata of the track, `null` on the wire is read as empty
    #[serde(default, deserialize_with = "nullable")]
    pub metadata: Metadata,
    /// Simulcast configuration, absent for audio and non-simulcast video
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulcast_config: Option<SimulcastConfig>,
}

impl TrackData {
    pub fn new(metadata: Metadata, simulcast_config: Option<SimulcastConfig>) -> Self {
        Self {
            metadata,
            simulcast_config,
        }
    }
}

/// A participant of the session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Identifier assigned by the engine
    pub id: String,
    /// Endpoint type as reported by the engine, e.g. `webrtc`
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Endpoint metadata
    #[serde(default, deserialize_with = "nullable")]
    pub metadata: Metadata,
    /// Published tracks keyed by track id, iterated in track id order
    #[serde(default)]
    pub tracks: BTreeMap<String, TrackData>,
}

impl Endpoint {
    pub fn new(id: impl Into<String>, kind: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            metadata,
            tracks: BTreeMap::new(),
        }
    }

    pub fn with_track(mut self, track_id: impl Into<String>, data: TrackData) -> Self {
        self.tracks.insert(track_id.into(), data);
        self
    }

    pub fn without_track(mut self, track_id: &str) -> Self {
        self.tracks.remove(track_id);
        self
    }

    /// Ids of the tracks published by this endpoint, in ascending order.
    pub fn track_ids(&self) -> Vec<String> {
        self.tracks.keys().cloned().collect()
    }

    /// Track id to metadata mapping, as announced in SDP offers.
    pub fn track_metadata(&self) -> BTreeMap<String, Metadata> {
        self.tracks
            .iter()
            .map(|(id, data)| (id.clone(), data.metadata.clone()))
            .collect()
    }
}

pub(crate) fn nullable<'de, D>(deserializer: D) -> Result<Metadata, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Metadata>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::model::tracks::TrackEncoding;

    #[test]
    fn decodes_endpoint_with_null_metadata() {
        let endpoint: Endpoint = serde_json::from_value(json!({
            "id": "e1",
            "type": "webrtc",
            "metadata": null,
            "tracks": {
                "t2": {"metadata": {"type": "camera"}, "simulcastConfig": {"enabled": true, "activeEncodings": ["l", "h"]}},
                "t1": {"metadata": null}
            }
        }))
        .unwrap();

        assert_eq!(endpoint.kind, "webrtc");
        assert!(endpoint.metadata.is_empty());
        assert_eq!(endpoint.track_ids(), vec!["t1", "t2"]);

        let simulcast = endpoint.tracks["t2"].simulcast_config.as_ref().unwrap();
        assert!(simulcast.enabled);
        assert_eq!(
            simulcast.active_encodings,
            vec![TrackEncoding::L, TrackEncoding::H]
        );
    }

    #[test]
    fn track_helpers_do_not_touch_other_tracks() {
        let endpoint = Endpoint::new("e1", "webrtc", Metadata::new())
            .with_track("a", TrackData::default())
            .with_track("b", TrackData::default())
            .without_track("a");

        assert_eq!(endpoint.track_ids(), vec!["b"]);
    }
}
