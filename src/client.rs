//! Session orchestration
//!
//! A session runs as a single task that owns the endpoint directory, the
//! remote track contexts, the local tracks and the peer connection manager.
//! Application commands, transport events and native engine callbacks are
//! queued on separate channels and processed one at a time, so every handler
//! observes a consistent directory.
//!
//! [`MembraneRtc`] is the cheap handle the application talks to.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::config::ConnectOptions;
use crate::engine::{EngineCommunication, EngineListener};
use crate::error::{Result, RtcError, TransportError};
use crate::event::incoming::{RemoteCandidate, TracksTypes, TurnServer};
use crate::model::endpoint::{Endpoint, Metadata, TrackData};
use crate::model::media::{BandwidthLimit, LocalTrack, VideoParameters};
use crate::model::notification::RtcEvent;
use crate::model::stats::RtcStatsReport;
use crate::model::tracks::{
    EncodingReason, TrackContext, TrackContextEvent, TrackEncoding, VadStatus,
};
use crate::peer::native::{IceCandidate, NativeEvent, NativeEventSender, PeerConnectionFactory};
use crate::peer::{PeerConnectionEvent, PeerConnectionManager};
use crate::transport::{EventTransport, TransportEvent, TransportHandler};
use crate::util;

/// Capacity of each per-track subscription channel.
const TRACK_EVENTS_CAPACITY: usize = 32;

/// Kind of local track to create.
#[derive(Debug, Clone)]
pub enum TrackRequest {
    Audio,
    Video {
        parameters: VideoParameters,
        capture_device: Option<String>,
    },
    Screencast {
        parameters: VideoParameters,
    },
}

enum Command {
    Connect {
        metadata: Metadata,
    },
    Disconnect,
    CreateTrack {
        request: TrackRequest,
        metadata: Metadata,
        reply: oneshot::Sender<Result<LocalTrack>>,
    },
    RemoveTrack {
        track_id: String,
        reply: oneshot::Sender<bool>,
    },
    SetTargetTrackEncoding {
        track_id: String,
        encoding: TrackEncoding,
    },
    SetTrackEncodingEnabled {
        track_id: String,
        encoding: TrackEncoding,
        enabled: bool,
        reply: oneshot::Sender<bool>,
    },
    UpdateEndpointMetadata {
        metadata: Metadata,
    },
    UpdateTrackMetadata {
        track_id: String,
        metadata: Metadata,
    },
    SetTrackBandwidth {
        track_id: String,
        limit: BandwidthLimit,
        reply: oneshot::Sender<bool>,
    },
    SetEncodingBandwidth {
        track_id: String,
        encoding: TrackEncoding,
        limit: BandwidthLimit,
        reply: oneshot::Sender<bool>,
    },
    GetStats {
        reply: oneshot::Sender<RtcStatsReport>,
    },
    SubscribeTrack {
        track_id: String,
        reply: oneshot::Sender<broadcast::Receiver<TrackContextEvent>>,
    },
    LocalEndpoint {
        reply: oneshot::Sender<Endpoint>,
    },
    RemoteEndpoints {
        reply: oneshot::Sender<Vec<Endpoint>>,
    },
    TrackContexts {
        reply: oneshot::Sender<Vec<TrackContext>>,
    },
}

/// Handle to a running session.
///
/// Dropping every clone of the handle ends the session the same way as
/// [`MembraneRtc::disconnect`].
#[derive(Clone)]
pub struct MembraneRtc {
    commands: mpsc::UnboundedSender<Command>,
}

impl MembraneRtc {
    /// Spawn a session on the current tokio runtime.
    ///
    /// ## Returns
    ///
    /// * `MembraneRtc` - handle used to drive the session
    /// * `UnboundedReceiver<RtcEvent>` - notifications of the session, closed
    ///   when the session ends
    pub fn create(
        options: ConnectOptions,
        transport: Arc<dyn EventTransport>,
        factory: Arc<dyn PeerConnectionFactory>,
    ) -> (Self, mpsc::UnboundedReceiver<RtcEvent>) {
        factory.set_encoder_options(&options.encoder_options);

        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (events, events_rx) = mpsc::unbounded_channel();
        let (transport_events, transport_rx) = mpsc::unbounded_channel();
        let (native_events, native_rx) = mpsc::unbounded_channel();

        let session = Session {
            engine: EngineCommunication::new(transport),
            peer: PeerConnectionManager::new(
                factory.clone(),
                native_events.clone(),
                options.default_stun_url.clone(),
            ),
            factory,
            events,
            transport_events,
            native_events,
            local_endpoint: Endpoint::new("", "webrtc", Metadata::new()),
            connected: false,
            remote_endpoints: HashMap::new(),
            track_contexts: HashMap::new(),
            local_tracks: Vec::new(),
            subscriptions: HashMap::new(),
        };
        tokio::spawn(session.run(commands_rx, transport_rx, native_rx));

        (Self { commands }, events_rx)
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| RtcError::SessionClosed)
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.send(command(reply))?;
        response.await.map_err(|_| RtcError::SessionClosed)
    }

    /// Open the transport and join the session with `metadata`.
    pub fn connect(&self, metadata: Metadata) -> Result<()> {
        self.send(Command::Connect { metadata })
    }

    /// Leave the session, stop local tracks and close the transport.
    pub fn disconnect(&self) -> Result<()> {
        self.send(Command::Disconnect)
    }

    pub async fn create_audio_track(&self, metadata: Metadata) -> Result<LocalTrack> {
        self.create_track(TrackRequest::Audio, metadata).await
    }

    pub async fn create_video_track(
        &self,
        parameters: VideoParameters,
        metadata: Metadata,
        capture_device: Option<String>,
    ) -> Result<LocalTrack> {
        self.create_track(
            TrackRequest::Video {
                parameters,
                capture_device,
            },
            metadata,
        )
        .await
    }

    pub async fn create_screencast_track(
        &self,
        parameters: VideoParameters,
        metadata: Metadata,
    ) -> Result<LocalTrack> {
        self.create_track(TrackRequest::Screencast { parameters }, metadata)
            .await
    }

    /// Create a local track, start it and announce it to the engine.
    pub async fn create_track(&self, request: TrackRequest, metadata: Metadata) -> Result<LocalTrack> {
        self.request(|reply| Command::CreateTrack {
            request,
            metadata,
            reply,
        })
        .await?
    }

    /// Stop and unpublish a local track. Returns `false` for unknown tracks.
    pub async fn remove_track(&self, track_id: &str) -> Result<bool> {
        let track_id = track_id.to_string();
        self.request(|reply| Command::RemoveTrack { track_id, reply })
            .await
    }

    /// Ask the engine to forward `encoding` of a remote simulcast track.
    pub fn set_target_track_encoding(&self, track_id: &str, encoding: TrackEncoding) -> Result<()> {
        self.send(Command::SetTargetTrackEncoding {
            track_id: track_id.to_string(),
            encoding,
        })
    }

    pub async fn enable_track_encoding(&self, track_id: &str, encoding: TrackEncoding) -> Result<bool> {
        self.set_track_encoding_enabled(track_id, encoding, true)
            .await
    }

    pub async fn disable_track_encoding(&self, track_id: &str, encoding: TrackEncoding) -> Result<bool> {
        self.set_track_encoding_enabled(track_id, encoding, false)
            .await
    }

    async fn set_track_encoding_enabled(
        &self,
        track_id: &str,
        encoding: TrackEncoding,
        enabled: bool,
    ) -> Result<bool> {
        let track_id = track_id.to_string();
        self.request(|reply| Command::SetTrackEncodingEnabled {
            track_id,
            encoding,
            enabled,
            reply,
        })
        .await
    }

    pub fn update_endpoint_metadata(&self, metadata: Metadata) -> Result<()> {
        self.send(Command::UpdateEndpointMetadata { metadata })
    }

    pub fn update_track_metadata(&self, track_id: &str, metadata: Metadata) -> Result<()> {
        self.send(Command::UpdateTrackMetadata {
            track_id: track_id.to_string(),
            metadata,
        })
    }

    /// Limit the total bandwidth of a local track, split across its layers.
    pub async fn set_track_bandwidth(&self, track_id: &str, limit: BandwidthLimit) -> Result<bool> {
        let track_id = track_id.to_string();
        self.request(|reply| Command::SetTrackBandwidth {
            track_id,
            limit,
            reply,
        })
        .await
    }

    /// Limit the bandwidth of one simulcast layer of a local track.
    pub async fn set_encoding_bandwidth(
        &self,
        track_id: &str,
        encoding: TrackEncoding,
        limit: BandwidthLimit,
    ) -> Result<bool> {
        let track_id = track_id.to_string();
        self.request(|reply| Command::SetEncodingBandwidth {
            track_id,
            encoding,
            limit,
            reply,
        })
        .await
    }

    pub async fn get_stats(&self) -> Result<RtcStatsReport> {
        self.request(|reply| Command::GetStats { reply }).await
    }

    /// Receive encoding and voice activity changes of one remote track. The
    /// channel closes when the track is removed.
    pub async fn subscribe_track(
        &self,
        track_id: &str,
    ) -> Result<broadcast::Receiver<TrackContextEvent>> {
        let track_id = track_id.to_string();
        self.request(|reply| Command::SubscribeTrack { track_id, reply })
            .await
    }

    pub async fn local_endpoint(&self) -> Result<Endpoint> {
        self.request(|reply| Command::LocalEndpoint { reply }).await
    }

    /// Remote endpoints ordered by id.
    pub async fn remote_endpoints(&self) -> Result<Vec<Endpoint>> {
        self.request(|reply| Command::RemoteEndpoints { reply })
            .await
    }

    /// Contexts of all remote tracks ordered by track id.
    pub async fn track_contexts(&self) -> Result<Vec<TrackContext>> {
        self.request(|reply| Command::TrackContexts { reply }).await
    }
}

enum Flow {
    Continue,
    Stop,
}

struct Session {
    engine: EngineCommunication,
    peer: PeerConnectionManager,
    factory: Arc<dyn PeerConnectionFactory>,
    events: mpsc::UnboundedSender<RtcEvent>,
    transport_events: TransportHandler,
    native_events: NativeEventSender,
    local_endpoint: Endpoint,
    /// Set once the engine accepted the join
    connected: bool,
    remote_endpoints: HashMap<String, Endpoint>,
    track_contexts: HashMap<String, TrackContext>,
    local_tracks: Vec<LocalTrack>,
    subscriptions: HashMap<String, broadcast::Sender<TrackContextEvent>>,
}

impl Session {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut transport_events: mpsc::UnboundedReceiver<TransportEvent>,
        mut native_events: mpsc::UnboundedReceiver<NativeEvent>,
    ) {
        loop {
            let flow = tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        debug!("All session handles dropped");
                        self.shutdown().await;
                        Flow::Stop
                    }
                },
                Some(event) = transport_events.recv() => self.handle_transport_event(event).await,
                Some(event) = native_events.recv() => self.handle_native_event(event).await,
            };

            if let Flow::Stop = flow {
                break;
            }
        }

        info!("Session {} stopped", self.local_endpoint.id);
    }

    fn emit(&self, event: RtcEvent) {
        if self.events.send(event).is_err() {
            debug!("Notification dropped, receiver is gone");
        }
    }

    fn publish(&self, event: TrackContextEvent) {
        if let Some(subscription) = self.subscriptions.get(&event.context().track_id) {
            let _ = subscription.send(event.clone());
        }
        self.emit(RtcEvent::TrackContextChanged(event));
    }

    async fn handle_command(&mut self, command: Command) -> Flow {
        match command {
            Command::Connect { metadata } => self.connect(metadata).await,
            Command::Disconnect => {
                self.shutdown().await;
                return Flow::Stop;
            }
            Command::CreateTrack {
                request,
                metadata,
                reply,
            } => {
                let result = self.create_track(request, metadata).await;
                let _ = reply.send(result);
            }
            Command::RemoveTrack { track_id, reply } => {
                let removed = self.remove_track(&track_id).await;
                let _ = reply.send(removed);
            }
            Command::SetTargetTrackEncoding { track_id, encoding } => {
                if !self.track_contexts.contains_key(&track_id) {
                    warn!("Selecting encoding of unknown remote track {}", track_id);
                }
                if let Err(e) = self.engine.set_target_track_encoding(track_id, encoding).await {
                    warn!("Failed to select encoding: {}", e);
                }
            }
            Command::SetTrackEncodingEnabled {
                track_id,
                encoding,
                enabled,
                reply,
            } => {
                let updated = self
                    .peer
                    .set_track_encoding(&track_id, encoding, enabled)
                    .await;
                let _ = reply.send(updated);
            }
            Command::UpdateEndpointMetadata { metadata } => {
                self.local_endpoint.metadata = metadata.clone();
                if let Err(e) = self.engine.update_endpoint_metadata(metadata).await {
                    warn!("Failed to update endpoint metadata: {}", e);
                }
            }
            Command::UpdateTrackMetadata { track_id, metadata } => {
                match self.local_endpoint.tracks.get_mut(&track_id) {
                    Some(data) => data.metadata = metadata.clone(),
                    None => warn!("Updating metadata of unknown local track {}", track_id),
                }
                if let Err(e) = self
                    .engine
                    .update_track_metadata(track_id, metadata)
                    .await
                {
                    warn!("Failed to update track metadata: {}", e);
                }
            }
            Command::SetTrackBandwidth {
                track_id,
                limit,
                reply,
            } => {
                let updated = self.peer.set_track_bandwidth(&track_id, limit).await;
                let _ = reply.send(updated);
            }
            Command::SetEncodingBandwidth {
                track_id,
                encoding,
                limit,
                reply,
            } => {
                let updated = self
                    .peer
                    .set_encoding_bandwidth(&track_id, encoding.rid(), limit)
                    .await;
                let _ = reply.send(updated);
            }
            Command::GetStats { reply } => {
                let _ = reply.send(self.peer.get_stats().await);
            }
            Command::SubscribeTrack { track_id, reply } => {
                let subscription = self
                    .subscriptions
                    .entry(track_id)
                    .or_insert_with(|| broadcast::channel(TRACK_EVENTS_CAPACITY).0);
                let _ = reply.send(subscription.subscribe());
            }
            Command::LocalEndpoint { reply } => {
                let _ = reply.send(self.local_endpoint.clone());
            }
            Command::RemoteEndpoints { reply } => {
                let mut endpoints: Vec<_> = self.remote_endpoints.values().cloned().collect();
                endpoints.sort_by(|a, b| a.id.cmp(&b.id));
                let _ = reply.send(endpoints);
            }
            Command::TrackContexts { reply } => {
                let mut contexts: Vec<_> = self.track_contexts.values().cloned().collect();
                contexts.sort_by(|a, b| a.track_id.cmp(&b.track_id));
                let _ = reply.send(contexts);
            }
        }

        Flow::Continue
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) -> Flow {
        match event {
            TransportEvent::Event(raw) => {
                let engine = self.engine.clone();
                engine.on_event(&raw, self).await;
            }
            TransportEvent::Error(reason) => {
                error!("Transport error: {}", reason);
                self.emit(RtcEvent::Error(TransportError::Connection(reason).into()));
            }
            TransportEvent::Closed => {
                warn!("Transport closed");
                self.connected = false;
                self.emit(RtcEvent::Error(TransportError::Closed.into()));
            }
        }

        Flow::Continue
    }

    async fn handle_native_event(&mut self, event: NativeEvent) -> Flow {
        let event = match self.peer.handle_native_event(event).await {
            Ok(Some(event)) => event,
            Ok(None) => return Flow::Continue,
            Err(e) => {
                error!("Unrecoverable native engine error: {}", e);
                self.emit(RtcEvent::Error(e));
                self.shutdown().await;
                return Flow::Stop;
            }
        };

        match event {
            PeerConnectionEvent::LocalCandidate(candidate) => {
                if let Err(e) = self
                    .engine
                    .local_candidate(candidate.candidate, candidate.sdp_m_line_index)
                    .await
                {
                    warn!("Failed to send local candidate: {}", e);
                }
            }
            PeerConnectionEvent::TrackReady { track_id, track } => {
                match self.track_contexts.get_mut(&track_id) {
                    Some(context) => {
                        context.remote_track = Some(track);
                        let context = context.clone();
                        self.emit(RtcEvent::TrackReady(context));
                    }
                    None => warn!("Media arrived for unknown track {}", track_id),
                }
            }
            PeerConnectionEvent::CaptureEnded { track_id } => {
                if self.remove_track(&track_id).await {
                    self.emit(RtcEvent::LocalTrackEnded { track_id });
                }
            }
        }

        Flow::Continue
    }

    async fn connect(&mut self, metadata: Metadata) {
        self.local_endpoint.metadata = metadata.clone();

        let transport = self.engine.transport().clone();
        if let Err(e) = transport.connect(self.transport_events.clone()).await {
            error!("Failed to connect transport: {}", e);
            self.emit(RtcEvent::Error(e.into()));
            return;
        }

        if let Err(e) = self.engine.connect(metadata).await {
            error!("Failed to send join: {}", e);
            self.emit(RtcEvent::Error(e.into()));
        }
    }

    async fn shutdown(&mut self) {
        if let Err(e) = self.engine.disconnect().await {
            debug!("Leave not delivered: {}", e);
        }
        for track in &self.local_tracks {
            track.stop();
        }
        self.peer.close().await;
        if let Err(e) = self.engine.transport().disconnect().await {
            warn!("Failed to close transport: {}", e);
        }
        self.connected = false;
    }

    async fn renegotiate(&self) {
        if !self.connected {
            return;
        }
        if let Err(e) = self.engine.renegotiate_tracks().await {
            warn!("Failed to request renegotiation: {}", e);
        }
    }

    async fn create_track(&mut self, request: TrackRequest, metadata: Metadata) -> Result<LocalTrack> {
        let track = match request {
            TrackRequest::Audio => self.factory.create_audio_track().map(LocalTrack::Audio),
            TrackRequest::Video {
                parameters,
                capture_device,
            } => self
                .factory
                .create_video_track(&parameters, capture_device.as_deref())
                .map(|native| LocalTrack::Video { native, parameters }),
            TrackRequest::Screencast { parameters } => self
                .factory
                .create_screencast_track(&parameters, self.native_events.clone())
                .map(|native| LocalTrack::Screencast { native, parameters }),
        }
        .map_err(|e| RtcError::TrackCreation(format!("{e:#}")))?;

        track.start();
        self.local_endpoint.tracks.insert(
            track.id().to_string(),
            TrackData::new(metadata, track.simulcast_config().cloned()),
        );
        self.local_tracks.push(track.clone());
        self.peer.add_track(&track, vec![util::random_id()]).await;
        self.renegotiate().await;

        info!("Created local {:?} track {}", track.kind(), track.id());
        Ok(track)
    }

    async fn remove_track(&mut self, track_id: &str) -> bool {
        let Some(index) = self.local_tracks.iter().position(|t| t.id() == track_id) else {
            warn!("Removing unknown local track {}", track_id);
            return false;
        };

        let track = self.local_tracks.remove(index);
        track.stop();
        self.local_endpoint.tracks.remove(track_id);
        self.peer.remove_track(track_id).await;
        self.renegotiate().await;

        info!("Removed local track {}", track_id);
        true
    }

    /// Register the tracks of a remote endpoint and return their new contexts.
    fn register_tracks(&mut self, endpoint_id: &str) -> Vec<TrackContext> {
        let Some(endpoint) = self.remote_endpoints.get(endpoint_id) else {
            return Vec::new();
        };

        let contexts: Vec<TrackContext> = endpoint
            .tracks
            .iter()
            .map(|(track_id, data)| {
                TrackContext::new(
                    endpoint_id,
                    track_id.clone(),
                    data.metadata.clone(),
                    data.simulcast_config.clone(),
                )
            })
            .collect();

        for context in &contexts {
            self.track_contexts
                .insert(context.track_id.clone(), context.clone());
        }
        contexts
    }

    fn unregister_track(&mut self, track_id: &str) -> Option<TrackContext> {
        self.subscriptions.remove(track_id);
        self.track_contexts.remove(track_id)
    }
}

#[async_trait]
impl EngineListener for Session {
    async fn on_connected(&mut self, endpoint_id: String, other_endpoints: Vec<Endpoint>) {
        info!("Connected as endpoint {}", endpoint_id);
        self.local_endpoint.id = endpoint_id.clone();
        self.connected = true;

        let others: Vec<Endpoint> = other_endpoints
            .into_iter()
            .filter(|e| e.id != endpoint_id)
            .collect();

        let mut added = Vec::new();
        for endpoint in &others {
            self.remote_endpoints
                .insert(endpoint.id.clone(), endpoint.clone());
            added.extend(self.register_tracks(&endpoint.id));
        }

        self.emit(RtcEvent::Connected {
            endpoint_id,
            other_endpoints: others,
        });
        for context in added {
            self.emit(RtcEvent::TrackAdded(context));
        }

        if !self.local_tracks.is_empty() {
            self.renegotiate().await;
        }
    }

    async fn on_endpoint_added(&mut self, endpoint: Endpoint) {
        if endpoint.id == self.local_endpoint.id {
            return;
        }

        let endpoint_id = endpoint.id.clone();
        self.remote_endpoints
            .insert(endpoint_id.clone(), endpoint.clone());
        let added = self.register_tracks(&endpoint_id);

        self.emit(RtcEvent::EndpointAdded(endpoint));
        for context in added {
            self.emit(RtcEvent::TrackAdded(context));
        }
    }

    async fn on_endpoint_updated(&mut self, endpoint_id: String, metadata: Metadata) {
        let Some(endpoint) = self.remote_endpoints.get_mut(&endpoint_id) else {
            warn!("Update of unknown endpoint {}", endpoint_id);
            return;
        };
        endpoint.metadata = metadata.clone();

        self.emit(RtcEvent::EndpointUpdated {
            endpoint_id,
            metadata,
        });
    }

    async fn on_endpoint_removed(&mut self, endpoint_id: String, reason: String) {
        if endpoint_id == self.local_endpoint.id {
            info!("Local endpoint removed: {}", reason);
            self.connected = false;
            self.emit(RtcEvent::Disconnected { reason });
            return;
        }

        let Some(endpoint) = self.remote_endpoints.remove(&endpoint_id) else {
            warn!("Removal of unknown endpoint {}", endpoint_id);
            return;
        };

        let removed: Vec<TrackContext> = endpoint
            .tracks
            .keys()
            .filter_map(|track_id| self.unregister_track(track_id))
            .collect();

        for context in removed {
            self.emit(RtcEvent::TrackRemoved(context));
        }
        self.emit(RtcEvent::EndpointRemoved(endpoint));
    }

    async fn on_offer_data(&mut self, turn_servers: Vec<TurnServer>, tracks_types: TracksTypes) {
        let offer = match self
            .peer
            .get_sdp_offer(&turn_servers, tracks_types, &self.local_tracks)
            .await
        {
            Ok(offer) => offer,
            Err(e) => {
                error!("Failed to create sdp offer: {}", e);
                return;
            }
        };

        if let Err(e) = self
            .engine
            .sdp_offer(
                offer.sdp,
                self.local_endpoint.track_metadata(),
                offer.mid_to_track_id,
            )
            .await
        {
            warn!("Failed to send sdp offer: {}", e);
        }
    }

    async fn on_sdp_answer(&mut self, sdp: String, mid_to_track_id: HashMap<String, String>) {
        if let Err(e) = self
            .peer
            .on_sdp_answer(sdp, mid_to_track_id, &self.local_tracks)
            .await
        {
            error!("Failed to apply sdp answer: {}", e);
        }
    }

    async fn on_remote_candidate(&mut self, candidate: RemoteCandidate) {
        self.peer
            .on_remote_candidate(IceCandidate {
                candidate: candidate.candidate,
                sdp_m_line_index: candidate.sdp_m_line_index,
                sdp_mid: candidate.sdp_mid,
            })
            .await;
    }

    async fn on_tracks_added(
        &mut self,
        endpoint_id: String,
        tracks: BTreeMap<String, TrackData>,
    ) {
        if endpoint_id == self.local_endpoint.id {
            return;
        }
        let Some(endpoint) = self.remote_endpoints.get_mut(&endpoint_id) else {
            warn!("Tracks added by unknown endpoint {}", endpoint_id);
            return;
        };

        let mut added = Vec::with_capacity(tracks.len());
        for (track_id, data) in tracks {
            let context = TrackContext::new(
                endpoint_id.clone(),
                track_id.clone(),
                data.metadata.clone(),
                data.simulcast_config.clone(),
            );
            endpoint.tracks.insert(track_id.clone(), data);
            added.push(context);
        }
        for context in &added {
            self.track_contexts
                .insert(context.track_id.clone(), context.clone());
        }

        for context in added {
            self.emit(RtcEvent::TrackAdded(context));
        }
    }

    async fn on_tracks_removed(&mut self, endpoint_id: String, track_ids: Vec<String>) {
        let Some(endpoint) = self.remote_endpoints.get_mut(&endpoint_id) else {
            warn!("Tracks removed by unknown endpoint {}", endpoint_id);
            return;
        };
        for track_id in &track_ids {
            endpoint.tracks.remove(track_id);
        }

        let removed: Vec<TrackContext> = track_ids
            .iter()
            .filter_map(|track_id| self.unregister_track(track_id))
            .collect();

        for context in removed {
            self.emit(RtcEvent::TrackRemoved(context));
        }
    }

    async fn on_track_updated(&mut self, endpoint_id: String, track_id: String, metadata: Metadata) {
        let Some(endpoint) = self.remote_endpoints.get_mut(&endpoint_id) else {
            warn!("Track update from unknown endpoint {}", endpoint_id);
            return;
        };
        if let Some(data) = endpoint.tracks.get_mut(&track_id) {
            data.metadata = metadata.clone();
        }

        let Some(context) = self.track_contexts.get_mut(&track_id) else {
            warn!("Update of unknown track {}", track_id);
            return;
        };
        context.metadata = metadata;
        let context = context.clone();

        self.emit(RtcEvent::TrackUpdated(context));
    }

    async fn on_track_encoding_changed(
        &mut self,
        _endpoint_id: String,
        track_id: String,
        encoding: TrackEncoding,
        reason: EncodingReason,
    ) {
        let Some(context) = self.track_contexts.get_mut(&track_id) else {
            warn!("Encoding switched on unknown track {}", track_id);
            return;
        };
        let event = context.set_encoding(encoding, reason);
        self.publish(event);
    }

    async fn on_vad_notification(&mut self, track_id: String, status: VadStatus) {
        let Some(context) = self.track_contexts.get_mut(&track_id) else {
            debug!("Voice activity of unknown track {}", track_id);
            return;
        };
        let event = context.set_vad_status(status);
        self.publish(event);
    }

    async fn on_bandwidth_estimation(&mut self, estimation: i64) {
        self.emit(RtcEvent::BandwidthEstimationChanged(estimation));
    }
}
