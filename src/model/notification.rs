use crate::error::RtcError;
use crate::model::endpoint::{Endpoint, Metadata};
use crate::model::tracks::{TrackContext, TrackContextEvent};

/// Notifications delivered to the embedding application.
///
/// Every notification is emitted after the endpoint and track directories were
/// updated, so reading session state from a handler observes the change.
#[derive(Debug, Clone, PartialEq)]
pub enum RtcEvent {
    /// The engine accepted the join.
    Connected {
        endpoint_id: String,
        other_endpoints: Vec<Endpoint>,
    },
    /// The engine removed the local endpoint from the session.
    Disconnected { reason: String },
    EndpointAdded(Endpoint),
    EndpointUpdated {
        endpoint_id: String,
        metadata: Metadata,
    },
    EndpointRemoved(Endpoint),
    /// A remote track was announced, media is not flowing yet.
    TrackAdded(TrackContext),
    /// Media for a remote track arrived.
    TrackReady(TrackContext),
    TrackUpdated(TrackContext),
    TrackRemoved(TrackContext),
    /// Encoding or voice activity of a remote track changed.
    TrackContextChanged(TrackContextEvent),
    /// Estimated downlink bandwidth in bits per second.
    BandwidthEstimationChanged(i64),
    /// Capture of a local track ended outside of the application's control.
    LocalTrackEnded { track_id: String },
    Error(RtcError),
}
