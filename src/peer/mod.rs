//! Peer connection management
//!
//! [`PeerConnectionManager`] owns the single native peer connection of a
//! session. It drives offer/answer negotiation, buffers remote ICE candidates
//! while a negotiation is in flight and manipulates sender parameters for
//! simulcast and bandwidth control.
//!
//! Two locks guard the state: the candidate queue and the connection itself.
//! Whenever both are needed the queue is locked first.

pub mod encodings;
pub mod native;
pub mod udp;

use std::collections::HashMap;
use std::sync::Arc;

use str0m::media::{Direction, MediaKind};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::{NegotiationError, RtcError};
use crate::event::incoming::{TracksTypes, TurnServer};
use crate::model::media::{BandwidthLimit, LocalTrack};
use crate::model::stats::RtcStatsReport;
use crate::model::tracks::{RemoteTrack, TrackEncoding};
use crate::peer::native::{
    IceCandidate, IceServer, IceTransportPolicy, NativeEvent, NativeEventSender,
    NativePeerConnection, NativeRemoteTrack, NativeResult, PeerConnectionFactory,
    RtcConfiguration, SessionDescription, TransceiverId, TransceiverInit, TransceiverInfo,
};
use crate::util;

/// Negotiation progress of the peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    NotCreated,
    /// Created and offered, no answer applied yet
    Created,
    Negotiated,
    /// A new offer was made on an already negotiated connection
    Renegotiating,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdpOffer {
    pub sdp: String,
    /// Mid of every transceiver sending a local track, mapped to the track id
    pub mid_to_track_id: HashMap<String, String>,
}

/// Native callbacks the session has to act upon.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerConnectionEvent {
    /// A local candidate to forward to the engine.
    LocalCandidate(IceCandidate),
    /// Media of a remote track arrived.
    TrackReady { track_id: String, track: RemoteTrack },
    CaptureEnded { track_id: String },
}

struct Connection {
    native: Option<Box<dyn NativePeerConnection>>,
    state: NegotiationState,
    config: Option<RtcConfiguration>,
    mid_to_track_id: HashMap<String, String>,
    /// Tracks added before the peer connection existed, with their stream ids
    pending_tracks: Vec<(LocalTrack, Vec<String>)>,
}

pub struct PeerConnectionManager {
    factory: Arc<dyn PeerConnectionFactory>,
    events: NativeEventSender,
    default_stun_url: String,
    queued_candidates: Mutex<Option<Vec<IceCandidate>>>,
    connection: Mutex<Connection>,
}

impl PeerConnectionManager {
    pub fn new(
        factory: Arc<dyn PeerConnectionFactory>,
        events: NativeEventSender,
        default_stun_url: impl Into<String>,
    ) -> Self {
        Self {
            factory,
            events,
            default_stun_url: default_stun_url.into(),
            queued_candidates: Mutex::new(None),
            connection: Mutex::new(Connection {
                native: None,
                state: NegotiationState::NotCreated,
                config: None,
                mid_to_track_id: HashMap::new(),
                pending_tracks: Vec::new(),
            }),
        }
    }

    pub async fn state(&self) -> NegotiationState {
        self.connection.lock().await.state
    }

    /// Add a local track. Before the peer connection exists the track is kept
    /// until the first offer is created.
    pub async fn add_track(&self, track: &LocalTrack, stream_ids: Vec<String>) {
        let mut guard = self.connection.lock().await;
        let connection = &mut *guard;

        match connection.native.as_deref_mut() {
            Some(pc) => {
                if let Err(e) = add_track_to(pc, track, stream_ids) {
                    error!("Failed to add track {}: {:#}", track.id(), e);
                }
                enforce_send_only(pc);
            }
            None if connection.state == NegotiationState::Closed => {
                warn!("Peer connection closed, not adding track {}", track.id());
            }
            None => {
                debug!("Peer connection not yet created, queueing track {}", track.id());
                connection
                    .pending_tracks
                    .push((track.clone(), stream_ids));
            }
        }
    }

    /// Detach the sender of a local track.
    ///
    /// ## Returns
    ///
    /// * `true` - a sender carrying the track was found and removed
    /// * `false` - there is no peer connection or no such sender
    pub async fn remove_track(&self, track_id: &str) -> bool {
        let mut guard = self.connection.lock().await;
        let connection = &mut *guard;
        connection
            .pending_tracks
            .retain(|(track, _)| track.id() != track_id);

        let Some(pc) = connection.native.as_deref_mut() else {
            error!("remove_track: peer connection not yet established");
            return false;
        };
        let Some(id) = find_sender(pc, track_id) else {
            warn!("remove_track: no sender for track {}", track_id);
            return false;
        };

        match pc.remove_sender(id) {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to remove sender of track {}: {:#}", track_id, e);
                false
            }
        }
    }

    /// Create the offer for a negotiation round.
    ///
    /// Remote candidates received from now on are buffered until the answer
    /// is applied. The first call creates the peer connection, later calls
    /// restart ICE on it.
    pub async fn get_sdp_offer(
        &self,
        turn_servers: &[TurnServer],
        tracks_types: TracksTypes,
        local_tracks: &[LocalTrack],
    ) -> Result<SdpOffer, NegotiationError> {
        *self.queued_candidates.lock().await = Some(Vec::new());

        let mut guard = self.connection.lock().await;
        let connection = &mut *guard;
        if connection.state == NegotiationState::Closed {
            return Err(NegotiationError::Closed);
        }

        self.prepare_ice_servers(connection, turn_servers);

        match connection.native.as_deref_mut() {
            Some(pc) => pc.restart_ice(),
            None => self.setup_peer_connection(connection, local_tracks)?,
        }
        let pc = connection
            .native
            .as_deref_mut()
            .ok_or(NegotiationError::Closed)?;

        add_necessary_transceivers(pc, tracks_types);
        enforce_send_only(pc);

        info!("Creating offer");
        let offer = pc
            .create_offer()
            .await
            .map_err(NegotiationError::CreateOffer)?;

        info!("Setting local description");
        pc.set_local_description(offer.clone())
            .await
            .map_err(NegotiationError::SetLocalDescription)?;

        let mid_to_track_id = local_mid_to_track_id(pc, local_tracks);

        connection.state = match connection.state {
            NegotiationState::Negotiated | NegotiationState::Renegotiating => {
                NegotiationState::Renegotiating
            }
            _ => NegotiationState::Created,
        };

        Ok(SdpOffer {
            sdp: offer.sdp,
            mid_to_track_id,
        })
    }

    /// Apply the engine's answer, then flush the buffered remote candidates.
    pub async fn on_sdp_answer(
        &self,
        sdp: String,
        mid_to_track_id: HashMap<String, String>,
        local_tracks: &[LocalTrack],
    ) -> Result<(), NegotiationError> {
        {
            let mut guard = self.connection.lock().await;
            let connection = &mut *guard;
            connection.mid_to_track_id = mid_to_track_id;

            let Some(pc) = connection.native.as_deref_mut() else {
                warn!("Received sdp answer without a peer connection");
                return Ok(());
            };
            pc.set_remote_description(SessionDescription::answer(sdp))
                .await
                .map_err(NegotiationError::SetRemoteDescription)?;
            connection.state = NegotiationState::Negotiated;
        }

        self.drain_candidates().await;

        // The engine does not echo inactive simulcast layers in its answer,
        // disable them on the sender again.
        let mut guard = self.connection.lock().await;
        if let Some(pc) = guard.native.as_deref_mut() {
            for track in local_tracks.iter().filter(|t| t.kind() == MediaKind::Video) {
                let Some(config) = track.simulcast_config().filter(|c| c.enabled) else {
                    continue;
                };
                for encoding in TrackEncoding::ALL {
                    if !config.is_active(encoding) {
                        set_encoding_active(pc, track.id(), encoding, false);
                    }
                }
            }
        }

        Ok(())
    }

    /// Apply a remote candidate, or buffer it while a negotiation is in flight.
    pub async fn on_remote_candidate(&self, candidate: IceCandidate) {
        let mut queued = self.queued_candidates.lock().await;
        if let Some(queue) = queued.as_mut() {
            queue.push(candidate);
            return;
        }

        let mut connection = self.connection.lock().await;
        match connection.native.as_deref_mut() {
            Some(pc) => {
                if let Err(e) = pc.add_ice_candidate(candidate).await {
                    warn!("Failed to add remote candidate: {:#}", e);
                }
            }
            None => warn!("Dropping remote candidate, no peer connection"),
        }
    }

    async fn drain_candidates(&self) {
        let mut queued = self.queued_candidates.lock().await;
        let Some(candidates) = queued.take() else {
            return;
        };

        let mut connection = self.connection.lock().await;
        let Some(pc) = connection.native.as_deref_mut() else {
            return;
        };
        debug!("Applying {} queued remote candidates", candidates.len());
        for candidate in candidates {
            if let Err(e) = pc.add_ice_candidate(candidate).await {
                warn!("Failed to add queued remote candidate: {:#}", e);
            }
        }
    }

    /// Toggle one simulcast layer of a local track.
    pub async fn set_track_encoding(
        &self,
        track_id: &str,
        encoding: TrackEncoding,
        enabled: bool,
    ) -> bool {
        let mut connection = self.connection.lock().await;
        match connection.native.as_deref_mut() {
            Some(pc) => set_encoding_active(pc, track_id, encoding, enabled),
            None => {
                error!("set_track_encoding: peer connection not yet established");
                false
            }
        }
    }

    /// Split `limit` across all encodings of a local track.
    pub async fn set_track_bandwidth(&self, track_id: &str, limit: BandwidthLimit) -> bool {
        self.update_sender(track_id, |parameters| {
            encodings::split_bitrate(&mut parameters.encodings, limit);
            true
        })
        .await
    }

    /// Cap a single encoding of a local track.
    pub async fn set_encoding_bandwidth(
        &self,
        track_id: &str,
        rid: &str,
        limit: BandwidthLimit,
    ) -> bool {
        self.update_sender(track_id, |parameters| {
            match parameters.encodings.iter_mut().find(|e| e.is_rid(rid)) {
                Some(encoding) => {
                    encoding.max_bitrate_bps = limit.as_bps();
                    true
                }
                None => {
                    error!("set_encoding_bandwidth: no encoding {} on track {}", rid, track_id);
                    false
                }
            }
        })
        .await
    }

    async fn update_sender<F>(&self, track_id: &str, update: F) -> bool
    where
        F: FnOnce(&mut native::RtpParameters) -> bool,
    {
        let mut connection = self.connection.lock().await;
        let Some(pc) = connection.native.as_deref_mut() else {
            error!("Peer connection not yet established");
            return false;
        };
        let Some(id) = find_sender(pc, track_id) else {
            error!("Invalid track id {}, no sender found", track_id);
            return false;
        };
        let Some(mut parameters) = pc.sender_parameters(id) else {
            return false;
        };

        if !update(&mut parameters) {
            return false;
        }
        match pc.set_sender_parameters(id, parameters) {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to update sender of track {}: {:#}", track_id, e);
                false
            }
        }
    }

    pub async fn get_stats(&self) -> RtcStatsReport {
        let connection = self.connection.lock().await;
        let entries = match connection.native.as_deref() {
            Some(pc) => pc.stats().await.unwrap_or_else(|e| {
                warn!("Failed to collect stats: {:#}", e);
                Vec::new()
            }),
            None => Vec::new(),
        };
        RtcStatsReport::from_native(&entries)
    }

    /// Interpret a native callback.
    ///
    /// Fails only when the engine delivered a track that is neither audio nor
    /// video, which ends the session.
    pub async fn handle_native_event(
        &self,
        event: NativeEvent,
    ) -> Result<Option<PeerConnectionEvent>, RtcError> {
        match event {
            NativeEvent::IceCandidate(candidate) => {
                Ok(Some(PeerConnectionEvent::LocalCandidate(candidate)))
            }
            NativeEvent::TrackAdded { receiver_id, track } => {
                self.on_track_added(&receiver_id, track).await
            }
            NativeEvent::CaptureEnded { track_id } => {
                Ok(Some(PeerConnectionEvent::CaptureEnded { track_id }))
            }
            NativeEvent::SignalingStateChanged(state) => {
                debug!("Signaling state changed to {}", state);
                Ok(None)
            }
            NativeEvent::IceConnectionStateChanged(state) => {
                info!("ICE connection state changed to {}", state);
                Ok(None)
            }
            NativeEvent::IceGatheringStateChanged(state) => {
                debug!("ICE gathering state changed to {}", state);
                Ok(None)
            }
            NativeEvent::RenegotiationNeeded => {
                debug!("Native engine requested renegotiation");
                Ok(None)
            }
        }
    }

    async fn on_track_added(
        &self,
        receiver_id: &str,
        track: NativeRemoteTrack,
    ) -> Result<Option<PeerConnectionEvent>, RtcError> {
        let track = match track.kind.as_str() {
            "audio" => RemoteTrack::Audio(track),
            "video" => RemoteTrack::Video(track),
            other => return Err(RtcError::InvalidTrackKind(other.to_string())),
        };

        let connection = self.connection.lock().await;
        let Some(pc) = connection.native.as_deref() else {
            return Ok(None);
        };
        let mid = pc
            .transceivers()
            .into_iter()
            .find(|t| t.receiver_id == receiver_id)
            .and_then(|t| t.mid);
        let Some(track_id) = mid.and_then(|mid| connection.mid_to_track_id.get(&mid).cloned())
        else {
            warn!("No track id known for receiver {}", receiver_id);
            return Ok(None);
        };

        Ok(Some(PeerConnectionEvent::TrackReady { track_id, track }))
    }

    pub async fn close(&self) {
        *self.queued_candidates.lock().await = None;

        let mut connection = self.connection.lock().await;
        if let Some(mut pc) = connection.native.take() {
            pc.close();
        }
        connection.pending_tracks.clear();
        connection.state = NegotiationState::Closed;
    }

    /// Build the ICE configuration once per session. Integrated TURN servers
    /// force relay-only traffic, without them the default STUN server is used.
    fn prepare_ice_servers(&self, connection: &mut Connection, turn_servers: &[TurnServer]) {
        if connection.config.is_some() {
            debug!("ICE servers already prepared, skipping");
            return;
        }

        let config = if turn_servers.is_empty() {
            RtcConfiguration::new(
                vec![IceServer::stun(self.default_stun_url.clone())],
                IceTransportPolicy::All,
            )
        } else {
            let servers = turn_servers
                .iter()
                .map(|s| IceServer::turn(s.url(), &s.username, &s.password))
                .collect();
            RtcConfiguration::new(servers, IceTransportPolicy::Relay)
        };
        connection.config = Some(config);
    }

    fn setup_peer_connection(
        &self,
        connection: &mut Connection,
        local_tracks: &[LocalTrack],
    ) -> Result<(), NegotiationError> {
        let config = connection.config.clone().unwrap_or_else(|| {
            RtcConfiguration::new(
                vec![IceServer::stun(self.default_stun_url.clone())],
                IceTransportPolicy::All,
            )
        });

        let mut pc = self
            .factory
            .create_peer_connection(config, self.events.clone())
            .map_err(NegotiationError::CreatePeerConnection)?;

        let stream_ids = vec![util::random_id()];
        let pending = std::mem::take(&mut connection.pending_tracks);
        for track in local_tracks {
            let ids = pending
                .iter()
                .find(|(t, _)| t.id() == track.id())
                .map(|(_, ids)| ids.clone())
                .unwrap_or_else(|| stream_ids.clone());
            if let Err(e) = add_track_to(pc.as_mut(), track, ids) {
                error!("Failed to add track {}: {:#}", track.id(), e);
            }
        }
        enforce_send_only(pc.as_mut());

        info!("Peer connection created with {} local tracks", local_tracks.len());
        connection.native = Some(pc);
        Ok(())
    }
}

fn add_track_to(
    pc: &mut dyn NativePeerConnection,
    track: &LocalTrack,
    stream_ids: Vec<String>,
) -> NativeResult<TransceiverId> {
    pc.add_transceiver(TransceiverInit {
        kind: track.kind(),
        track: Some(track.native().clone()),
        direction: Direction::SendRecv,
        stream_ids,
        send_encodings: encodings::send_encodings(track),
    })
}

/// The engine only accepts one-directional legs, turn every bidirectional
/// transceiver into a sender.
fn enforce_send_only(pc: &mut dyn NativePeerConnection) {
    for transceiver in pc.transceivers() {
        if transceiver.direction == Direction::SendRecv {
            if let Err(e) = pc.set_direction(transceiver.id, Direction::SendOnly) {
                warn!("Failed to make transceiver send-only: {:#}", e);
            }
        }
    }
}

/// Add receive-only transceivers until there is one per track the engine is
/// going to send.
fn add_necessary_transceivers(pc: &mut dyn NativePeerConnection, tracks_types: TracksTypes) {
    let receiving = |kind: MediaKind, transceivers: &[TransceiverInfo]| {
        transceivers
            .iter()
            .filter(|t| t.direction == Direction::RecvOnly && t.receiver_track_kind == Some(kind))
            .count()
    };

    let transceivers = pc.transceivers();
    let lacking_audio = tracks_types
        .audio
        .saturating_sub(receiving(MediaKind::Audio, &transceivers));
    let lacking_video = tracks_types
        .video
        .saturating_sub(receiving(MediaKind::Video, &transceivers));

    debug!(
        "Adding {} audio and {} video receive-only transceivers",
        lacking_audio, lacking_video
    );

    let lacking = std::iter::repeat(MediaKind::Audio)
        .take(lacking_audio)
        .chain(std::iter::repeat(MediaKind::Video).take(lacking_video));
    for kind in lacking {
        if let Err(e) = pc.add_transceiver(TransceiverInit::recv_only(kind)) {
            error!("Failed to add receive-only transceiver: {:#}", e);
        }
    }
}

fn find_sender(pc: &dyn NativePeerConnection, track_id: &str) -> Option<TransceiverId> {
    pc.transceivers()
        .into_iter()
        .find(|t| t.sender_track_id.as_deref() == Some(track_id))
        .map(|t| t.id)
}

fn set_encoding_active(
    pc: &mut dyn NativePeerConnection,
    track_id: &str,
    encoding: TrackEncoding,
    enabled: bool,
) -> bool {
    let Some(id) = find_sender(pc, track_id) else {
        error!("Invalid track id {}, no sender found", track_id);
        return false;
    };
    let Some(mut parameters) = pc.sender_parameters(id) else {
        return false;
    };
    let Some(target) = parameters
        .encodings
        .iter_mut()
        .find(|e| e.is_rid(encoding.rid()))
    else {
        error!("Track {} has no encoding {}", track_id, encoding.rid());
        return false;
    };

    target.active = enabled;
    match pc.set_sender_parameters(id, parameters) {
        Ok(()) => true,
        Err(e) => {
            error!("Failed to update encoding of track {}: {:#}", track_id, e);
            false
        }
    }
}

fn local_mid_to_track_id(
    pc: &dyn NativePeerConnection,
    local_tracks: &[LocalTrack],
) -> HashMap<String, String> {
    pc.transceivers()
        .into_iter()
        .filter_map(|t| {
            let track_id = t.sender_track_id?;
            let mid = t.mid?;
            local_tracks
                .iter()
                .any(|track| track.id() == track_id)
                .then_some((mid, track_id))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;
    use crate::config::DEFAULT_STUN_URL;
    use crate::model::media::VideoParameters;
    use crate::peer::native::NativeEvent;
    use crate::testing::{audio_track, video_track, FakeFactory};

    fn manager() -> (Arc<PeerConnectionManager>, Arc<FakeFactory>) {
        let factory = FakeFactory::new();
        let (events, _rx) = mpsc::unbounded_channel();
        let manager = PeerConnectionManager::new(factory.clone(), events, DEFAULT_STUN_URL);
        (Arc::new(manager), factory)
    }

    fn candidate(name: &str) -> IceCandidate {
        IceCandidate {
            candidate: name.to_string(),
            sdp_m_line_index: 0,
            sdp_mid: None,
        }
    }

    fn turn_server() -> TurnServer {
        TurnServer {
            username: "user".into(),
            password: "pass".into(),
            server_addr: "10.0.0.1".into(),
            server_port: 50018,
            transport: "udp".into(),
        }
    }

    #[tokio::test]
    async fn first_offer_creates_the_connection() {
        let (manager, factory) = manager();
        let tracks = vec![audio_track("mic")];
        manager.add_track(&tracks[0], vec!["s1".into()]).await;
        assert_eq!(manager.state().await, NegotiationState::NotCreated);

        let offer = manager
            .get_sdp_offer(&[], TracksTypes::default(), &tracks)
            .await
            .unwrap();

        assert_eq!(offer.sdp, "offer-1");
        assert_eq!(offer.mid_to_track_id.get("0").map(String::as_str), Some("mic"));
        assert_eq!(manager.state().await, NegotiationState::Created);

        factory.peer(|pc| {
            let sender = pc.transceiver_for("mic").unwrap();
            assert_eq!(sender.direction, Direction::SendOnly);
            assert_eq!(sender.stream_ids, vec!["s1".to_string()]);
            assert_eq!(pc.transceivers.len(), 1);
        });
    }

    #[tokio::test]
    async fn ice_configuration_is_prepared_once() {
        let (manager, factory) = manager();

        manager
            .get_sdp_offer(&[turn_server()], TracksTypes::default(), &[])
            .await
            .unwrap();
        manager
            .get_sdp_offer(&[], TracksTypes::default(), &[])
            .await
            .unwrap();

        let configs = factory.configs();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].ice_transport_policy, IceTransportPolicy::Relay);
        assert_eq!(
            configs[0].ice_servers,
            vec![IceServer::turn(
                "turn:10.0.0.1:50018?transport=udp",
                "user",
                "pass"
            )]
        );
        assert!(configs[0].disable_ipv6 && configs[0].disable_tcp_candidates);
        factory.peer(|pc| assert_eq!(pc.ice_restarts, 1));
    }

    #[tokio::test]
    async fn stun_is_used_without_turn_servers() {
        let (manager, factory) = manager();
        manager
            .get_sdp_offer(&[], TracksTypes::default(), &[])
            .await
            .unwrap();

        let config = &factory.configs()[0];
        assert_eq!(config.ice_transport_policy, IceTransportPolicy::All);
        assert_eq!(config.ice_servers, vec![IceServer::stun(DEFAULT_STUN_URL)]);
    }

    #[tokio::test]
    async fn receive_transceivers_are_reconciled() {
        let (manager, factory) = manager();
        let tracks = vec![audio_track("mic")];

        let types = TracksTypes { audio: 1, video: 2 };
        manager.get_sdp_offer(&[], types, &tracks).await.unwrap();
        factory.peer(|pc| {
            assert_eq!(pc.count(MediaKind::Audio, Direction::RecvOnly), 1);
            assert_eq!(pc.count(MediaKind::Video, Direction::RecvOnly), 2);
            assert_eq!(pc.count(MediaKind::Audio, Direction::SendOnly), 1);
        });

        let types = TracksTypes { audio: 1, video: 3 };
        manager.get_sdp_offer(&[], types, &tracks).await.unwrap();
        factory.peer(|pc| {
            assert_eq!(pc.count(MediaKind::Audio, Direction::RecvOnly), 1);
            assert_eq!(pc.count(MediaKind::Video, Direction::RecvOnly), 3);
        });

        let types = TracksTypes { audio: 0, video: 1 };
        manager.get_sdp_offer(&[], types, &tracks).await.unwrap();
        factory.peer(|pc| assert_eq!(pc.count(MediaKind::Video, Direction::RecvOnly), 3));
    }

    #[tokio::test]
    async fn tracks_added_later_are_send_only() {
        let (manager, factory) = manager();
        manager
            .get_sdp_offer(&[], TracksTypes::default(), &[])
            .await
            .unwrap();

        let track = video_track("cam", VideoParameters::preset_vga_169());
        manager.add_track(&track, vec!["s".into()]).await;

        factory.peer(|pc| {
            assert!(pc.transceivers.iter().all(|t| t.direction != Direction::SendRecv));
            assert_eq!(
                pc.transceiver_for("cam").unwrap().direction,
                Direction::SendOnly
            );
        });
    }

    #[tokio::test]
    async fn candidates_wait_for_the_answer() {
        let (manager, factory) = manager();
        factory.delay_remote_description(Duration::from_millis(50));
        manager
            .get_sdp_offer(&[], TracksTypes::default(), &[])
            .await
            .unwrap();

        manager.on_remote_candidate(candidate("c1")).await;

        let answering = {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager
                    .on_sdp_answer("answer".into(), HashMap::new(), &[])
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        manager.on_remote_candidate(candidate("c2")).await;

        answering.await.unwrap().unwrap();
        manager.on_remote_candidate(candidate("c3")).await;

        factory.peer(|pc| {
            let remote = pc.log.iter().position(|e| e == "remote:answer").unwrap();
            let first = pc.log.iter().position(|e| e == "candidate:c1").unwrap();
            assert!(remote < first);
            assert_eq!(pc.applied_candidates(), vec!["c1", "c2", "c3"]);
        });
        assert_eq!(manager.state().await, NegotiationState::Negotiated);
    }

    #[tokio::test]
    async fn candidates_without_connection_are_dropped() {
        let (manager, factory) = manager();
        manager.on_remote_candidate(candidate("early")).await;
        manager
            .get_sdp_offer(&[], TracksTypes::default(), &[])
            .await
            .unwrap();
        manager
            .on_sdp_answer("answer".into(), HashMap::new(), &[])
            .await
            .unwrap();

        factory.peer(|pc| assert!(pc.applied_candidates().is_empty()));
    }

    #[tokio::test]
    async fn renegotiation_restarts_ice() {
        let (manager, factory) = manager();
        manager
            .get_sdp_offer(&[], TracksTypes::default(), &[])
            .await
            .unwrap();
        manager
            .on_sdp_answer("a1".into(), HashMap::new(), &[])
            .await
            .unwrap();
        manager
            .get_sdp_offer(&[], TracksTypes::default(), &[])
            .await
            .unwrap();

        assert_eq!(manager.state().await, NegotiationState::Renegotiating);
        factory.peer(|pc| {
            assert_eq!(pc.ice_restarts, 1);
            assert_eq!(pc.offers, 2);
        });
    }

    #[tokio::test]
    async fn failed_offer_is_reported() {
        let (manager, factory) = manager();
        factory.fail_create_offer(true);

        let result = manager
            .get_sdp_offer(&[], TracksTypes::default(), &[])
            .await;
        assert!(matches!(result, Err(NegotiationError::CreateOffer(_))));
    }

    #[tokio::test]
    async fn answer_disables_inactive_simulcast_layers() {
        let (manager, factory) = manager();
        let params =
            VideoParameters::preset_hd_169().with_simulcast(vec![TrackEncoding::H, TrackEncoding::L]);
        let tracks = vec![video_track("cam", params)];

        manager
            .get_sdp_offer(&[], TracksTypes::default(), &tracks)
            .await
            .unwrap();
        assert!(
            manager
                .set_track_encoding("cam", TrackEncoding::M, true)
                .await
        );
        manager
            .on_sdp_answer("answer".into(), HashMap::new(), &tracks)
            .await
            .unwrap();

        factory.peer(|pc| {
            let active: Vec<_> = pc
                .transceiver_for("cam")
                .unwrap()
                .parameters
                .encodings
                .iter()
                .map(|e| e.active)
                .collect();
            assert_eq!(active, vec![true, false, true]);
        });
    }

    #[tokio::test]
    async fn bandwidth_updates_sender_parameters() {
        let (manager, factory) = manager();
        let params = VideoParameters::preset_hd_169().with_simulcast(TrackEncoding::ALL.to_vec());
        let tracks = vec![video_track("cam", params)];
        manager
            .get_sdp_offer(&[], TracksTypes::default(), &tracks)
            .await
            .unwrap();

        assert!(manager.set_track_bandwidth("cam", BandwidthLimit(1000)).await);
        assert!(
            manager
                .set_encoding_bandwidth("cam", "l", BandwidthLimit(10))
                .await
        );
        assert!(
            !manager
                .set_encoding_bandwidth("cam", "x", BandwidthLimit(10))
                .await
        );
        assert!(!manager.set_track_bandwidth("nope", BandwidthLimit(10)).await);

        factory.peer(|pc| {
            let caps: Vec<_> = pc
                .transceiver_for("cam")
                .unwrap()
                .parameters
                .encodings
                .iter()
                .map(|e| e.max_bitrate_bps)
                .collect();
            assert_eq!(caps, vec![Some(10_240), Some(195047), Some(780190)]);
        });
    }

    #[tokio::test]
    async fn remove_track_detaches_the_sender() {
        let (manager, factory) = manager();
        let tracks = vec![audio_track("mic")];
        assert!(!manager.remove_track("mic").await);

        manager
            .get_sdp_offer(&[], TracksTypes::default(), &tracks)
            .await
            .unwrap();
        assert!(manager.remove_track("mic").await);
        assert!(!manager.remove_track("mic").await);
        factory.peer(|pc| assert!(pc.transceiver_for("mic").is_none()));
    }

    #[tokio::test]
    async fn remote_tracks_are_resolved_through_the_answer_mapping() {
        let (manager, factory) = manager();
        manager
            .get_sdp_offer(&[], TracksTypes { audio: 0, video: 1 }, &[])
            .await
            .unwrap();
        manager
            .on_sdp_answer(
                "answer".into(),
                HashMap::from([("0".to_string(), "remote-cam".to_string())]),
                &[],
            )
            .await
            .unwrap();

        let receiver_id = factory.peer(|pc| pc.transceivers[0].receiver_id());
        let event = manager
            .handle_native_event(NativeEvent::TrackAdded {
                receiver_id: receiver_id.clone(),
                track: NativeRemoteTrack {
                    id: "native-1".into(),
                    kind: "video".into(),
                },
            })
            .await
            .unwrap();

        match event {
            Some(PeerConnectionEvent::TrackReady { track_id, track }) => {
                assert_eq!(track_id, "remote-cam");
                assert!(matches!(track, RemoteTrack::Video(_)));
            }
            other => panic!("unexpected {other:?}"),
        }

        let invalid = manager
            .handle_native_event(NativeEvent::TrackAdded {
                receiver_id,
                track: NativeRemoteTrack {
                    id: "native-2".into(),
                    kind: "data".into(),
                },
            })
            .await;
        assert_eq!(invalid, Err(RtcError::InvalidTrackKind("data".into())));
    }

    #[tokio::test]
    async fn closed_manager_refuses_offers() {
        let (manager, factory) = manager();
        manager
            .get_sdp_offer(&[], TracksTypes::default(), &[])
            .await
            .unwrap();
        manager.close().await;

        factory.peer(|pc| assert!(pc.closed));
        assert!(matches!(
            manager.get_sdp_offer(&[], TracksTypes::default(), &[]).await,
            Err(NegotiationError::Closed)
        ));
        assert!(manager.get_stats().await.stats.is_empty());
    }
}
