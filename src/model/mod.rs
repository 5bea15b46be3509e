//! Data models for an RTC session
//!
//! This module contains the core data structures used throughout the client
//! for describing endpoints, local and remote tracks, statistics and the
//! notifications delivered to the application.

pub mod endpoint;
pub mod media;
pub mod notification;
pub mod stats;
pub mod tracks;

pub use endpoint::{Endpoint, Metadata, TrackData};
pub use media::{BandwidthLimit, Dimensions, LocalTrack, TrackBandwidthLimit, VideoParameters};
pub use notification::RtcEvent;
pub use stats::{RtcInboundStats, RtcOutboundStats, RtcStats, RtcStatsReport};
pub use tracks::{
    EncodingReason, RemoteTrack, SimulcastConfig, TrackContext, TrackContextEvent, TrackEncoding,
    VadStatus,
};
