//! In-memory stand-ins for the native engine and the transport.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use str0m::media::{Direction, MediaKind};
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::event::SendableEvent;
use crate::model::media::{LocalTrack, VideoParameters};
use crate::model::stats::NativeStatsEntry;
use crate::peer::native::{
    IceCandidate, NativeEventSender, NativeLocalTrack, NativePeerConnection, NativeResult,
    PeerConnectionFactory, RtcConfiguration, RtpParameters, SdpType, SessionDescription,
    TransceiverId, TransceiverInfo, TransceiverInit,
};
use crate::transport::{EventTransport, TransportEvent, TransportHandler};

#[derive(Debug)]
pub struct FakeLocalTrack {
    id: String,
    kind: MediaKind,
    running: AtomicBool,
    enabled: AtomicBool,
}

impl FakeLocalTrack {
    pub fn new(id: &str, kind: MediaKind) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            kind,
            running: AtomicBool::new(false),
            enabled: AtomicBool::new(true),
        })
    }

    pub fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl NativeLocalTrack for FakeLocalTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }
}

pub fn audio_track(id: &str) -> LocalTrack {
    LocalTrack::Audio(FakeLocalTrack::new(id, MediaKind::Audio))
}

pub fn video_track(id: &str, parameters: VideoParameters) -> LocalTrack {
    LocalTrack::Video {
        native: FakeLocalTrack::new(id, MediaKind::Video),
        parameters,
    }
}

#[derive(Debug, Clone)]
pub struct FakeTransceiver {
    pub id: TransceiverId,
    pub kind: MediaKind,
    pub mid: Option<String>,
    pub direction: Direction,
    pub sender_track_id: Option<String>,
    pub stream_ids: Vec<String>,
    pub parameters: RtpParameters,
}

impl FakeTransceiver {
    pub fn receiver_id(&self) -> String {
        format!("receiver-{}", self.id.0)
    }
}

/// Observable state of the most recently created peer connection.
#[derive(Debug, Default)]
pub struct FakePeerState {
    pub transceivers: Vec<FakeTransceiver>,
    /// Native calls in order, e.g. `remote:<sdp>` or `candidate:<candidate>`
    pub log: Vec<String>,
    pub ice_restarts: usize,
    pub offers: usize,
    pub closed: bool,
}

impl FakePeerState {
    pub fn transceiver_for(&self, track_id: &str) -> Option<&FakeTransceiver> {
        self.transceivers
            .iter()
            .find(|t| t.sender_track_id.as_deref() == Some(track_id))
    }

    pub fn count(&self, kind: MediaKind, direction: Direction) -> usize {
        self.transceivers
            .iter()
            .filter(|t| t.kind == kind && t.direction == direction)
            .count()
    }

    pub fn applied_candidates(&self) -> Vec<&str> {
        self.log
            .iter()
            .filter_map(|entry| entry.strip_prefix("candidate:"))
            .collect()
    }
}

#[derive(Default)]
struct FactoryState {
    configs: Vec<RtcConfiguration>,
    peer: Arc<Mutex<FakePeerState>>,
    events: Option<NativeEventSender>,
    fail_create_offer: bool,
    remote_description_delay: Option<Duration>,
    tracks: Vec<Arc<FakeLocalTrack>>,
}

#[derive(Default)]
pub struct FakeFactory {
    state: Mutex<FactoryState>,
    next_track: AtomicU64,
}

impl FakeFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FactoryState> {
        self.state.lock().unwrap()
    }

    /// Configurations of all peer connections created so far.
    pub fn configs(&self) -> Vec<RtcConfiguration> {
        self.lock().configs.clone()
    }

    pub fn peer<R>(&self, inspect: impl FnOnce(&FakePeerState) -> R) -> R {
        let peer = self.lock().peer.clone();
        let state = peer.lock().unwrap();
        inspect(&state)
    }

    /// Sender handed to the peer connection for native callbacks.
    pub fn events(&self) -> Option<NativeEventSender> {
        self.lock().events.clone()
    }

    pub fn fail_create_offer(&self, fail: bool) {
        self.lock().fail_create_offer = fail;
    }

    pub fn delay_remote_description(&self, delay: Duration) {
        self.lock().remote_description_delay = Some(delay);
    }

    /// Tracks created through this factory.
    pub fn created_tracks(&self) -> Vec<Arc<FakeLocalTrack>> {
        self.lock().tracks.clone()
    }

    fn new_track(&self, prefix: &str, kind: MediaKind) -> Arc<dyn NativeLocalTrack> {
        let n = self.next_track.fetch_add(1, Ordering::SeqCst);
        let track = FakeLocalTrack::new(&format!("{prefix}-{n}"), kind);
        self.lock().tracks.push(track.clone());
        track
    }
}

impl PeerConnectionFactory for FakeFactory {
    fn create_peer_connection(
        &self,
        config: RtcConfiguration,
        events: NativeEventSender,
    ) -> NativeResult<Box<dyn NativePeerConnection>> {
        let mut state = self.lock();
        state.configs.push(config);
        state.events = Some(events);
        state.peer = Arc::new(Mutex::new(FakePeerState::default()));

        Ok(Box::new(FakePeerConnection {
            peer: state.peer.clone(),
            fail_create_offer: state.fail_create_offer,
            remote_description_delay: state.remote_description_delay,
            next_id: 0,
        }))
    }

    fn create_audio_track(&self) -> NativeResult<Arc<dyn NativeLocalTrack>> {
        Ok(self.new_track("audio", MediaKind::Audio))
    }

    fn create_video_track(
        &self,
        _parameters: &VideoParameters,
        _capture_device: Option<&str>,
    ) -> NativeResult<Arc<dyn NativeLocalTrack>> {
        Ok(self.new_track("video", MediaKind::Video))
    }

    fn create_screencast_track(
        &self,
        _parameters: &VideoParameters,
        events: NativeEventSender,
    ) -> NativeResult<Arc<dyn NativeLocalTrack>> {
        self.lock().events = Some(events);
        Ok(self.new_track("screencast", MediaKind::Video))
    }
}

pub struct FakePeerConnection {
    peer: Arc<Mutex<FakePeerState>>,
    fail_create_offer: bool,
    remote_description_delay: Option<Duration>,
    next_id: u64,
}

impl FakePeerConnection {
    fn with<R>(&self, f: impl FnOnce(&mut FakePeerState) -> R) -> R {
        let mut state = self.peer.lock().unwrap();
        f(&mut state)
    }
}

#[async_trait]
impl NativePeerConnection for FakePeerConnection {
    fn add_transceiver(&mut self, init: TransceiverInit) -> NativeResult<TransceiverId> {
        let id = TransceiverId(self.next_id);
        self.next_id += 1;

        self.with(|state| {
            state.transceivers.push(FakeTransceiver {
                id,
                kind: init.kind,
                mid: None,
                direction: init.direction,
                sender_track_id: init.track.map(|t| t.id().to_string()),
                stream_ids: init.stream_ids,
                parameters: RtpParameters {
                    encodings: init.send_encodings,
                },
            })
        });
        Ok(id)
    }

    fn transceivers(&self) -> Vec<TransceiverInfo> {
        self.with(|state| {
            state
                .transceivers
                .iter()
                .map(|t| TransceiverInfo {
                    id: t.id,
                    kind: t.kind,
                    mid: t.mid.clone(),
                    direction: t.direction,
                    sender_track_id: t.sender_track_id.clone(),
                    receiver_id: t.receiver_id(),
                    receiver_track_kind: Some(t.kind),
                })
                .collect()
        })
    }

    fn set_direction(&mut self, id: TransceiverId, direction: Direction) -> NativeResult<()> {
        self.with(|state| {
            let transceiver = state
                .transceivers
                .iter_mut()
                .find(|t| t.id == id)
                .ok_or_else(|| anyhow!("no transceiver {:?}", id))?;
            transceiver.direction = direction;
            Ok(())
        })
    }

    async fn create_offer(&mut self) -> NativeResult<SessionDescription> {
        if self.fail_create_offer {
            return Err(anyhow!("offer creation failed"));
        }
        self.with(|state| {
            state.offers += 1;
            for (index, transceiver) in state.transceivers.iter_mut().enumerate() {
                if transceiver.mid.is_none() {
                    transceiver.mid = Some(index.to_string());
                }
            }
            state.log.push("offer".to_string());
            Ok(SessionDescription::offer(format!("offer-{}", state.offers)))
        })
    }

    async fn set_local_description(&mut self, description: SessionDescription) -> NativeResult<()> {
        assert_eq!(description.kind, SdpType::Offer);
        self.with(|state| state.log.push(format!("local:{}", description.sdp)));
        Ok(())
    }

    async fn set_remote_description(
        &mut self,
        description: SessionDescription,
    ) -> NativeResult<()> {
        if let Some(delay) = self.remote_description_delay {
            tokio::time::sleep(delay).await;
        }
        self.with(|state| state.log.push(format!("remote:{}", description.sdp)));
        Ok(())
    }

    async fn add_ice_candidate(&mut self, candidate: IceCandidate) -> NativeResult<()> {
        self.with(|state| state.log.push(format!("candidate:{}", candidate.candidate)));
        Ok(())
    }

    fn restart_ice(&mut self) {
        self.with(|state| state.ice_restarts += 1);
    }

    fn sender_parameters(&self, id: TransceiverId) -> Option<RtpParameters> {
        self.with(|state| {
            state
                .transceivers
                .iter()
                .find(|t| t.id == id)
                .map(|t| t.parameters.clone())
        })
    }

    fn set_sender_parameters(&mut self, id: TransceiverId, parameters: RtpParameters) -> NativeResult<()> {
        self.with(|state| {
            let transceiver = state
                .transceivers
                .iter_mut()
                .find(|t| t.id == id)
                .ok_or_else(|| anyhow!("no transceiver {:?}", id))?;
            transceiver.parameters = parameters;
            Ok(())
        })
    }

    fn remove_sender(&mut self, id: TransceiverId) -> NativeResult<()> {
        self.with(|state| {
            let transceiver = state
                .transceivers
                .iter_mut()
                .find(|t| t.id == id)
                .ok_or_else(|| anyhow!("no transceiver {:?}", id))?;
            transceiver.sender_track_id = None;
            transceiver.direction = Direction::Inactive;
            Ok(())
        })
    }

    async fn stats(&self) -> NativeResult<Vec<NativeStatsEntry>> {
        let entries = self.with(|state| {
            state
                .transceivers
                .iter()
                .filter(|t| t.sender_track_id.is_some())
                .map(|t| NativeStatsEntry {
                    id: format!("outbound-{}", t.id.0),
                    kind: "outbound-rtp".to_string(),
                    members: serde_json::json!({"kind": "audio", "bytesSent": 100})
                        .as_object()
                        .cloned()
                        .unwrap_or_default(),
                })
                .collect()
        });
        Ok(entries)
    }

    fn close(&mut self) {
        self.with(|state| state.closed = true);
    }
}

/// Transport recording sent events and letting tests inject inbound ones.
pub struct FakeTransport {
    connected: AtomicBool,
    fail_connect: Mutex<Option<TransportError>>,
    handler: Mutex<Option<TransportHandler>>,
    sent: mpsc::UnboundedSender<SendableEvent>,
}

impl FakeTransport {
    /// The transport and a receiver of every event it sent, decoded.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<SendableEvent>) {
        let (sent, sent_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            connected: AtomicBool::new(false),
            fail_connect: Mutex::new(None),
            handler: Mutex::new(None),
            sent,
        });
        (transport, sent_rx)
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn fail_connect_with(&self, error: TransportError) {
        *self.fail_connect.lock().unwrap() = Some(error);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Deliver a raw inbound media event.
    pub fn deliver(&self, event: serde_json::Value) {
        self.emit(TransportEvent::Event(event.to_string()));
    }

    pub fn emit(&self, event: TransportEvent) {
        if let Some(handler) = self.handler.lock().unwrap().as_ref() {
            let _ = handler.send(event);
        }
    }
}

#[async_trait]
impl EventTransport for FakeTransport {
    async fn connect(&self, handler: TransportHandler) -> Result<(), TransportError> {
        if let Some(error) = self.fail_connect.lock().unwrap().clone() {
            return Err(error);
        }
        *self.handler.lock().unwrap() = Some(handler);
        self.set_connected(true);
        Ok(())
    }

    async fn send(&self, event: String) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Closed);
        }
        let event = SendableEvent::decode(&event).map_err(|e| TransportError::Send(e.to_string()))?;
        let _ = self.sent.send(event);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.set_connected(false);
        *self.handler.lock().unwrap() = None;
        Ok(())
    }
}
