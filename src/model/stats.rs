//! RTP statistics snapshot
//!
//! The native engine reports loosely typed stats entries. Only `outbound-rtp`
//! and `inbound-rtp` entries are converted, everything else is skipped.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::endpoint::Metadata;

/// One raw stats entry as reported by the native engine.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeStatsEntry {
    pub id: String,
    /// Stats type, e.g. `outbound-rtp`
    pub kind: String,
    pub members: Metadata,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityLimitationDurations {
    pub bandwidth: f64,
    pub cpu: f64,
    pub none: f64,
    pub other: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RtcOutboundStats {
    pub kind: String,
    pub rid: String,
    pub bytes_sent: u64,
    pub target_bitrate: f64,
    pub packets_sent: u64,
    pub frames_encoded: u64,
    pub frames_per_second: f64,
    pub frame_width: u32,
    pub frame_height: u32,
    pub quality_limitation_durations: Option<QualityLimitationDurations>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RtcInboundStats {
    pub kind: String,
    pub jitter: f64,
    pub packets_lost: i64,
    pub packets_received: u64,
    pub bytes_received: u64,
    pub frames_received: u64,
    pub frames_per_second: f64,
    pub frames_dropped: u64,
    pub frame_width: u32,
    pub frame_height: u32,
}

/// Width to height ratio, `0.0` when the frame size is unknown.
fn ratio(width: u32, height: u32) -> f64 {
    if height == 0 {
        0.0
    } else {
        width as f64 / height as f64
    }
}

impl RtcOutboundStats {
    pub fn frame_width_height_ratio(&self) -> f64 {
        ratio(self.frame_width, self.frame_height)
    }
}

impl RtcInboundStats {
    pub fn frame_width_height_ratio(&self) -> f64 {
        ratio(self.frame_width, self.frame_height)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RtcStats {
    OutboundRtp(RtcOutboundStats),
    InboundRtp(RtcInboundStats),
}

impl RtcStats {
    /// Convert a native entry. Entries of other types, or with members of the
    /// wrong shape, yield `None`.
    pub fn from_native(entry: &NativeStatsEntry) -> Option<RtcStats> {
        let members = serde_json::Value::Object(entry.members.clone());
        match entry.kind.as_str() {
            "outbound-rtp" => serde_json::from_value(members).ok().map(RtcStats::OutboundRtp),
            "inbound-rtp" => serde_json::from_value(members).ok().map(RtcStats::InboundRtp),
            _ => None,
        }
    }
}

/// Stats of all RTP streams keyed by the native stats id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RtcStatsReport {
    pub taken_at: DateTime<Utc>,
    pub stats: HashMap<String, RtcStats>,
}

impl RtcStatsReport {
    pub fn from_native(entries: &[NativeStatsEntry]) -> Self {
        let stats = entries
            .iter()
            .filter_map(|entry| RtcStats::from_native(entry).map(|s| (entry.id.clone(), s)))
            .collect();

        Self {
            taken_at: Utc::now(),
            stats,
        }
    }

    pub fn outbound(&self) -> impl Iterator<Item = (&String, &RtcOutboundStats)> {
        self.stats.iter().filter_map(|(id, s)| match s {
            RtcStats::OutboundRtp(out) => Some((id, out)),
            RtcStats::InboundRtp(_) => None,
        })
    }

    pub fn inbound(&self) -> impl Iterator<Item = (&String, &RtcInboundStats)> {
        self.stats.iter().filter_map(|(id, s)| match s {
            RtcStats::InboundRtp(inb) => Some((id, inb)),
            RtcStats::OutboundRtp(_) => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn entry(id: &str, kind: &str, members: serde_json::Value) -> NativeStatsEntry {
        NativeStatsEntry {
            id: id.to_string(),
            kind: kind.to_string(),
            members: members.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn keeps_only_rtp_entries() {
        let report = RtcStatsReport::from_native(&[
            entry(
                "RTCOutboundRTPVideoStream_1",
                "outbound-rtp",
                json!({
                    "kind": "video",
                    "rid": "h",
                    "bytesSent": 123456,
                    "packetsSent": 10,
                    "frameWidth": 1280,
                    "frameHeight": 720,
                    "qualityLimitationDurations": {"bandwidth": 1.5, "cpu": 0.0, "none": 10.0, "other": 0.0}
                }),
            ),
            entry(
                "RTCInboundRTPAudioStream_2",
                "inbound-rtp",
                json!({"kind": "audio", "jitter": 0.009, "packetsLost": 3}),
            ),
            entry("RTCTransport_0_1", "transport", json!({"bytesSent": 1})),
        ]);

        assert_eq!(report.stats.len(), 2);

        let (_, out) = report.outbound().next().unwrap();
        assert_eq!(out.rid, "h");
        assert_eq!(out.bytes_sent, 123456);
        assert!((out.frame_width_height_ratio() - 16.0 / 9.0).abs() < 1e-9);
        assert_eq!(out.quality_limitation_durations.as_ref().unwrap().bandwidth, 1.5);

        let (_, inb) = report.inbound().next().unwrap();
        assert_eq!(inb.packets_lost, 3);
        assert_eq!(inb.frame_width_height_ratio(), 0.0);
    }
}
