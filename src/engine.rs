//! Engine communication
//!
//! [`EngineCommunication`] turns client intents into [`SendableEvent`]s on the
//! transport, and decodes raw inbound events into calls on an
//! [`EngineListener`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{trace, warn};

use crate::error::TransportError;
use crate::event::incoming::{RemoteCandidate, TracksTypes, TurnServer};
use crate::event::{ReceivableEvent, SendableEvent};
use crate::model::endpoint::{Endpoint, Metadata, TrackData};
use crate::model::tracks::{EncodingReason, TrackEncoding, VadStatus};
use crate::transport::EventTransport;

/// Receiver of decoded engine events, one method per event kind.
#[async_trait]
pub trait EngineListener: Send {
    async fn on_connected(&mut self, endpoint_id: String, other_endpoints: Vec<Endpoint>);
    async fn on_endpoint_added(&mut self, endpoint: Endpoint);
    async fn on_endpoint_updated(&mut self, endpoint_id: String, metadata: Metadata);
    async fn on_endpoint_removed(&mut self, endpoint_id: String, reason: String);
    async fn on_offer_data(&mut self, turn_servers: Vec<TurnServer>, tracks_types: TracksTypes);
    async fn on_sdp_answer(&mut self, sdp: String, mid_to_track_id: HashMap<String, String>);
    async fn on_remote_candidate(&mut self, candidate: RemoteCandidate);
    async fn on_tracks_added(&mut self, endpoint_id: String, tracks: BTreeMap<String, TrackData>);
    async fn on_tracks_removed(&mut self, endpoint_id: String, track_ids: Vec<String>);
    async fn on_track_updated(&mut self, endpoint_id: String, track_id: String, metadata: Metadata);
    async fn on_track_encoding_changed(
        &mut self,
        endpoint_id: String,
        track_id: String,
        encoding: TrackEncoding,
        reason: EncodingReason,
    );
    async fn on_vad_notification(&mut self, track_id: String, status: VadStatus);
    async fn on_bandwidth_estimation(&mut self, estimation: i64);
}

#[derive(Clone)]
pub struct EngineCommunication {
    transport: Arc<dyn EventTransport>,
}

impl EngineCommunication {
    pub fn new(transport: Arc<dyn EventTransport>) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &Arc<dyn EventTransport> {
        &self.transport
    }

    async fn send(&self, event: SendableEvent) -> Result<(), TransportError> {
        trace!("Sending {:?}", event);
        self.transport.send(event.encode()).await
    }

    pub async fn connect(&self, metadata: Metadata) -> Result<(), TransportError> {
        self.send(SendableEvent::Connect { metadata }).await
    }

    pub async fn disconnect(&self) -> Result<(), TransportError> {
        self.send(SendableEvent::Disconnect).await
    }

    pub async fn update_endpoint_metadata(&self, metadata: Metadata) -> Result<(), TransportError> {
        self.send(SendableEvent::UpdateEndpointMetadata { metadata })
            .await
    }

    pub async fn update_track_metadata(
        &self,
        track_id: String,
        track_metadata: Metadata,
    ) -> Result<(), TransportError> {
        self.send(SendableEvent::UpdateTrackMetadata {
            track_id,
            track_metadata,
        })
        .await
    }

    pub async fn set_target_track_encoding(
        &self,
        track_id: String,
        encoding: TrackEncoding,
    ) -> Result<(), TransportError> {
        self.send(SendableEvent::SelectEncoding { track_id, encoding })
            .await
    }

    pub async fn renegotiate_tracks(&self) -> Result<(), TransportError> {
        self.send(SendableEvent::RenegotiateTracks).await
    }

    pub async fn local_candidate(
        &self,
        candidate: String,
        sdp_m_line_index: u32,
    ) -> Result<(), TransportError> {
        self.send(SendableEvent::LocalCandidate {
            candidate,
            sdp_m_line_index,
        })
        .await
    }

    pub async fn sdp_offer(
        &self,
        sdp: String,
        track_id_to_track_metadata: BTreeMap<String, Metadata>,
        mid_to_track_id: HashMap<String, String>,
    ) -> Result<(), TransportError> {
        self.send(SendableEvent::SdpOffer {
            sdp,
            track_id_to_track_metadata,
            mid_to_track_id,
        })
        .await
    }

    /// Decode `raw` and dispatch it to `listener`. Payloads that fail to
    /// decode are logged and dropped.
    pub async fn on_event<L>(&self, raw: &str, listener: &mut L)
    where
        L: EngineListener + ?Sized,
    {
        let event = match ReceivableEvent::decode(raw) {
            Ok(event) => event,
            Err(e) => {
                warn!("Dropping media event: {}", e);
                return;
            }
        };
        trace!("Received {:?}", event);

        match event {
            ReceivableEvent::Connected(data) => {
                listener.on_connected(data.id, data.other_endpoints).await
            }
            ReceivableEvent::EndpointAdded(endpoint) => listener.on_endpoint_added(endpoint).await,
            ReceivableEvent::EndpointUpdated(data) => {
                listener.on_endpoint_updated(data.id, data.metadata).await
            }
            ReceivableEvent::EndpointRemoved(data) => {
                listener.on_endpoint_removed(data.id, data.reason).await
            }
            ReceivableEvent::TracksAdded(data) => {
                listener.on_tracks_added(data.endpoint_id, data.tracks).await
            }
            ReceivableEvent::TracksRemoved(data) => {
                listener
                    .on_tracks_removed(data.endpoint_id, data.track_ids)
                    .await
            }
            ReceivableEvent::TrackUpdated(data) => {
                listener
                    .on_track_updated(data.endpoint_id, data.track_id, data.metadata)
                    .await
            }
            ReceivableEvent::OfferData(data) => {
                listener
                    .on_offer_data(data.integrated_turn_servers, data.tracks_types)
                    .await
            }
            ReceivableEvent::Candidate(candidate) => listener.on_remote_candidate(candidate).await,
            ReceivableEvent::SdpAnswer(data) => {
                listener.on_sdp_answer(data.sdp, data.mid_to_track_id).await
            }
            ReceivableEvent::EncodingSwitched(data) => {
                listener
                    .on_track_encoding_changed(
                        data.endpoint_id,
                        data.track_id,
                        data.encoding,
                        data.reason,
                    )
                    .await
            }
            ReceivableEvent::VadNotification(data) => {
                listener.on_vad_notification(data.track_id, data.status).await
            }
            ReceivableEvent::BandwidthEstimation(data) => {
                listener
                    .on_bandwidth_estimation(data.estimation.round() as i64)
                    .await
            }
        }
    }
}
