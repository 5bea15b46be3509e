//! Peer connections backed by a sans-IO `str0m` instance
//!
//! Each [`UdpPeerConnection`] owns one [`Rtc`] and a UDP socket. A background
//! task moves datagrams between the two and drives the timers, while the
//! negotiation calls of [`NativePeerConnection`] are applied through the SDP
//! API. Only host candidates are gathered, and local tracks carry no capture.

use std::collections::HashMap;
use std::net::{SocketAddr, UdpSocket as StdUdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use serde_json::json;
use str0m::change::{SdpAnswer, SdpPendingOffer};
use str0m::media::{Direction, MediaKind, Mid};
use str0m::net::{Protocol, Receive};
use str0m::{Candidate, Event, IceConnectionState, Input, Output, Rtc};
use tokio::net::UdpSocket;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::model::media::VideoParameters;
use crate::peer::native::{
    IceCandidate, IceTransportPolicy, NativeEvent, NativeEventSender, NativeLocalTrack,
    NativePeerConnection, NativeRemoteTrack, NativeResult, NativeStatsEntry, PeerConnectionFactory,
    RtcConfiguration, RtpParameters, SdpType, SessionDescription, TransceiverId, TransceiverInfo,
    TransceiverInit,
};
use crate::util;

/// Factory creating [`UdpPeerConnection`]s.
#[derive(Debug, Default)]
pub struct UdpFactory;

impl UdpFactory {
    pub fn new() -> Self {
        Self
    }
}

impl PeerConnectionFactory for UdpFactory {
    fn create_peer_connection(
        &self,
        config: RtcConfiguration,
        events: NativeEventSender,
    ) -> NativeResult<Box<dyn NativePeerConnection>> {
        Ok(Box::new(UdpPeerConnection::new(&config, events)?))
    }

    fn create_audio_track(&self) -> NativeResult<Arc<dyn NativeLocalTrack>> {
        Ok(Arc::new(SilentTrack::new(MediaKind::Audio)))
    }

    fn create_video_track(
        &self,
        _parameters: &VideoParameters,
        capture_device: Option<&str>,
    ) -> NativeResult<Arc<dyn NativeLocalTrack>> {
        if let Some(device) = capture_device {
            debug!("Ignoring capture device {}", device);
        }
        Ok(Arc::new(SilentTrack::new(MediaKind::Video)))
    }

    fn create_screencast_track(
        &self,
        _parameters: &VideoParameters,
        _events: NativeEventSender,
    ) -> NativeResult<Arc<dyn NativeLocalTrack>> {
        Ok(Arc::new(SilentTrack::new(MediaKind::Video)))
    }
}

/// Local track without a capture source. It is negotiated like any other
/// track but never produces samples.
#[derive(Debug)]
pub struct SilentTrack {
    id: String,
    kind: MediaKind,
    running: AtomicBool,
    enabled: AtomicBool,
}

impl SilentTrack {
    pub fn new(kind: MediaKind) -> Self {
        Self {
            id: util::random_id(),
            kind,
            running: AtomicBool::new(false),
            enabled: AtomicBool::new(true),
        }
    }

    pub fn running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }
}

impl NativeLocalTrack for SilentTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn start(&self) {
        self.running.store(true, Ordering::Relaxed);
    }

    fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }
}

#[derive(Debug)]
struct Transceiver {
    id: TransceiverId,
    kind: MediaKind,
    mid: Option<Mid>,
    direction: Direction,
    /// Direction as last put into an offer
    offered_direction: Option<Direction>,
    stream_id: Option<String>,
    sender_track_id: Option<String>,
    parameters: RtpParameters,
}

impl Transceiver {
    fn receiver_id(&self) -> String {
        format!("receiver-{}", self.id.0)
    }

    fn info(&self) -> TransceiverInfo {
        TransceiverInfo {
            id: self.id,
            kind: self.kind,
            mid: self.mid.map(|mid| mid.to_string()),
            direction: self.direction,
            sender_track_id: self.sender_track_id.clone(),
            receiver_id: self.receiver_id(),
            receiver_track_kind: Some(self.kind),
        }
    }
}

/// State shared with the socket task.
struct Inner {
    rtc: Rtc,
    /// Receiver ids of the negotiated m-lines that receive media
    receivers: HashMap<Mid, (String, MediaKind)>,
}

fn lock(inner: &Mutex<Inner>) -> NativeResult<MutexGuard<'_, Inner>> {
    inner
        .lock()
        .map_err(|_| anyhow!("peer connection state poisoned"))
}

fn receives(direction: Direction) -> bool {
    matches!(direction, Direction::RecvOnly | Direction::SendRecv)
}

fn kind_name(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Audio => "audio",
        MediaKind::Video => "video",
    }
}

/// [`NativePeerConnection`] over a `str0m` [`Rtc`] bound to one UDP port.
pub struct UdpPeerConnection {
    inner: Arc<Mutex<Inner>>,
    wake: Arc<Notify>,
    events: NativeEventSender,
    local_addr: SocketAddr,
    local_candidates: Vec<Candidate>,
    candidates_announced: bool,
    transceivers: Vec<Transceiver>,
    pending: Option<SdpPendingOffer>,
    ice_restart: bool,
    next_id: u64,
    driver: JoinHandle<()>,
}

impl UdpPeerConnection {
    /// Bind a socket on all interfaces and start the socket task. Must be
    /// called within a tokio runtime.
    pub fn new(config: &RtcConfiguration, events: NativeEventSender) -> NativeResult<Self> {
        if config.ice_transport_policy == IceTransportPolicy::Relay {
            warn!("Relay-only ICE is not available, offering host candidates");
        }
        debug!("Ignoring {} ICE servers", config.ice_servers.len());

        let socket = StdUdpSocket::bind("0.0.0.0:0").context("binding udp socket")?;
        let local_candidates = util::host_candidates(&socket);
        socket.set_nonblocking(true)?;
        let socket = UdpSocket::from_std(socket)?;
        let local_addr = socket.local_addr()?;
        info!(
            "Bound UDP port {} with {} host candidates",
            local_addr.port(),
            local_candidates.len()
        );

        let mut rtc = Rtc::new();
        for candidate in &local_candidates {
            rtc.add_local_candidate(candidate.clone());
        }

        let inner = Arc::new(Mutex::new(Inner {
            rtc,
            receivers: HashMap::new(),
        }));
        let wake = Arc::new(Notify::new());
        // Inbound datagrams are attributed to the first host candidate, the
        // socket itself is bound to the unspecified address.
        let destination = local_candidates
            .first()
            .map(Candidate::addr)
            .unwrap_or(local_addr);
        let driver = tokio::spawn(drive(
            inner.clone(),
            socket,
            destination,
            wake.clone(),
            events.clone(),
        ));

        Ok(Self {
            inner,
            wake,
            events,
            local_addr,
            local_candidates,
            candidates_announced: false,
            transceivers: Vec::new(),
            pending: None,
            ice_restart: false,
            next_id: 0,
            driver,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn transceiver_mut(&mut self, id: TransceiverId) -> NativeResult<&mut Transceiver> {
        self.transceivers
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| anyhow!("unknown transceiver {:?}", id))
    }

    /// Report the host candidates once the first local description is set.
    fn announce_candidates(&mut self) {
        if self.candidates_announced {
            return;
        }
        self.candidates_announced = true;

        let sdp_mid = self
            .transceivers
            .iter()
            .find_map(|t| t.mid)
            .map(|mid| mid.to_string());
        for candidate in &self.local_candidates {
            let _ = self.events.send(NativeEvent::IceCandidate(IceCandidate {
                candidate: candidate.to_sdp_string(),
                sdp_m_line_index: 0,
                sdp_mid: sdp_mid.clone(),
            }));
        }
        let _ = self
            .events
            .send(NativeEvent::IceGatheringStateChanged("complete".to_string()));
    }
}

impl Drop for UdpPeerConnection {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

#[async_trait]
impl NativePeerConnection for UdpPeerConnection {
    fn add_transceiver(&mut self, init: TransceiverInit) -> NativeResult<TransceiverId> {
        let id = TransceiverId(self.next_id);
        self.next_id += 1;
        if init.send_encodings.len() > 1 {
            debug!("Sending a single layer of {} encodings", init.send_encodings.len());
        }

        self.transceivers.push(Transceiver {
            id,
            kind: init.kind,
            mid: None,
            direction: init.direction,
            offered_direction: None,
            stream_id: init.stream_ids.into_iter().next(),
            sender_track_id: init.track.map(|t| t.id().to_string()),
            parameters: RtpParameters {
                encodings: init.send_encodings,
            },
        });
        Ok(id)
    }

    fn transceivers(&self) -> Vec<TransceiverInfo> {
        self.transceivers.iter().map(Transceiver::info).collect()
    }

    fn set_direction(&mut self, id: TransceiverId, direction: Direction) -> NativeResult<()> {
        self.transceiver_mut(id)?.direction = direction;
        Ok(())
    }

    async fn create_offer(&mut self) -> NativeResult<SessionDescription> {
        let mut guard = lock(&self.inner)?;
        let Inner { rtc, receivers } = &mut *guard;
        let mut change = rtc.sdp_api();

        if std::mem::take(&mut self.ice_restart) {
            change.ice_restart(true);
        }

        for t in &mut self.transceivers {
            match t.mid {
                None => {
                    let mid = change.add_media(
                        t.kind,
                        t.direction,
                        t.stream_id.clone(),
                        t.sender_track_id.clone(),
                        None,
                    );
                    t.mid = Some(mid);
                }
                Some(mid) if t.offered_direction != Some(t.direction) => {
                    change.set_direction(mid, t.direction);
                }
                Some(_) => continue,
            }
            t.offered_direction = Some(t.direction);

            if let Some(mid) = t.mid {
                if receives(t.direction) {
                    receivers.insert(mid, (t.receiver_id(), t.kind));
                } else {
                    receivers.remove(&mid);
                }
            }
        }

        let Some((offer, pending)) = change.apply() else {
            bail!("no media to negotiate");
        };
        drop(guard);

        self.pending = Some(pending);
        self.wake.notify_one();
        Ok(SessionDescription::offer(offer.to_string()))
    }

    async fn set_local_description(&mut self, description: SessionDescription) -> NativeResult<()> {
        if description.kind != SdpType::Offer {
            bail!("only local offers are supported");
        }
        if self.pending.is_none() {
            bail!("no offer was created");
        }

        self.announce_candidates();
        Ok(())
    }

    async fn set_remote_description(
        &mut self,
        description: SessionDescription,
    ) -> NativeResult<()> {
        if description.kind != SdpType::Answer {
            bail!("only remote answers are supported");
        }
        let pending = self
            .pending
            .take()
            .ok_or_else(|| anyhow!("answer without a pending offer"))?;

        let answer: SdpAnswer =
            serde_json::from_value(json!({"type": "answer", "sdp": description.sdp}))
                .context("parsing sdp answer")?;

        lock(&self.inner)?
            .rtc
            .sdp_api()
            .accept_answer(pending, answer)?;
        self.wake.notify_one();
        Ok(())
    }

    async fn add_ice_candidate(&mut self, candidate: IceCandidate) -> NativeResult<()> {
        let remote = Candidate::from_sdp_string(&candidate.candidate)
            .map_err(|e| anyhow!("invalid candidate `{}`: {:?}", candidate.candidate, e))?;

        lock(&self.inner)?.rtc.add_remote_candidate(remote);
        self.wake.notify_one();
        Ok(())
    }

    fn restart_ice(&mut self) {
        self.ice_restart = true;
    }

    fn sender_parameters(&self, id: TransceiverId) -> Option<RtpParameters> {
        self.transceivers
            .iter()
            .find(|t| t.id == id && t.sender_track_id.is_some())
            .map(|t| t.parameters.clone())
    }

    fn set_sender_parameters(
        &mut self,
        id: TransceiverId,
        parameters: RtpParameters,
    ) -> NativeResult<()> {
        let transceiver = self.transceiver_mut(id)?;
        if transceiver.sender_track_id.is_none() {
            bail!("transceiver {:?} has no sender", id);
        }
        transceiver.parameters = parameters;
        Ok(())
    }

    fn remove_sender(&mut self, id: TransceiverId) -> NativeResult<()> {
        let transceiver = self.transceiver_mut(id)?;
        transceiver.sender_track_id = None;
        transceiver.direction = match transceiver.direction {
            Direction::SendRecv => Direction::RecvOnly,
            Direction::SendOnly => Direction::Inactive,
            other => other,
        };
        Ok(())
    }

    async fn stats(&self) -> NativeResult<Vec<NativeStatsEntry>> {
        Ok(Vec::new())
    }

    fn close(&mut self) {
        if let Ok(mut inner) = lock(&self.inner) {
            inner.rtc.disconnect();
        }
        self.driver.abort();
        self.pending = None;
    }
}

/// Drain `rtc` output until it asks for a timeout. Transmits are collected
/// so the lock is not held while sending.
fn poll_until_timeout(
    inner: &Mutex<Inner>,
    events: &NativeEventSender,
) -> NativeResult<(Instant, Vec<(SocketAddr, Vec<u8>)>)> {
    let mut guard = lock(inner)?;
    let Inner { rtc, receivers } = &mut *guard;
    let mut transmits = Vec::new();

    loop {
        if !rtc.is_alive() {
            bail!("peer connection closed");
        }

        match rtc.poll_output()? {
            Output::Timeout(deadline) => return Ok((deadline, transmits)),
            Output::Transmit(transmit) => {
                transmits.push((transmit.destination, transmit.contents.to_vec()));
            }
            Output::Event(event) => match event {
                Event::IceConnectionStateChange(state) => {
                    info!("ICE connection state: {:?}", state);
                    let name = format!("{state:?}").to_lowercase();
                    let _ = events.send(NativeEvent::IceConnectionStateChanged(name));
                    if state == IceConnectionState::Disconnected {
                        rtc.disconnect();
                    }
                }
                Event::MediaAdded(added) => {
                    let Some((receiver_id, kind)) = receivers.get(&added.mid) else {
                        debug!("Media added on {} without a receiver", added.mid);
                        continue;
                    };
                    let _ = events.send(NativeEvent::TrackAdded {
                        receiver_id: receiver_id.clone(),
                        track: NativeRemoteTrack {
                            id: added.mid.to_string(),
                            kind: kind_name(*kind).to_string(),
                        },
                    });
                }
                Event::Connected => info!("Peer connection established"),
                other => trace!("Event: {:?}", other),
            },
        }
    }
}

async fn drive(
    inner: Arc<Mutex<Inner>>,
    socket: UdpSocket,
    local_addr: SocketAddr,
    wake: Arc<Notify>,
    events: NativeEventSender,
) {
    let mut buf = vec![0; 2000];

    loop {
        let (deadline, transmits) = match poll_until_timeout(&inner, &events) {
            Ok(output) => output,
            Err(e) => {
                debug!("Stopping socket task: {:#}", e);
                break;
            }
        };

        for (destination, contents) in transmits {
            if let Err(e) = socket.send_to(&contents, destination).await {
                debug!("Failed to send to {}: {}", destination, e);
            }
        }

        let received = tokio::select! {
            received = socket.recv_from(&mut buf) => match received {
                Ok((n, source)) => Some((n, source)),
                Err(e) => {
                    warn!("UDP receive failed: {}", e);
                    break;
                }
            },
            _ = tokio::time::sleep_until(deadline.into()) => None,
            _ = wake.notified() => continue,
        };

        let Ok(mut guard) = lock(&inner) else {
            break;
        };
        let now = Instant::now();
        let input = match received {
            Some((n, source)) => match (&buf[..n]).try_into() {
                Ok(contents) => Input::Receive(
                    now,
                    Receive {
                        proto: Protocol::Udp,
                        source,
                        destination: local_addr,
                        contents,
                    },
                ),
                Err(e) => {
                    trace!("Dropping datagram from {}: {:?}", source, e);
                    continue;
                }
            },
            None => Input::Timeout(now),
        };

        if let Err(e) = guard.rtc.handle_input(input) {
            warn!("Peer connection failed: {:?}", e);
            guard.rtc.disconnect();
        }
    }
}
