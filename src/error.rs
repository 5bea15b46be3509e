//! Error types for the RTC client.
//!
//! Only transport failures and the invalid-track-kind condition ever reach the
//! application as [`RtcError`]. Decode failures are logged and dropped, and
//! operational misuse (unknown track ids, missing peer connection) is reported
//! through return values instead of errors.

use thiserror::Error;

/// Result type alias using the session error type.
pub type Result<T> = std::result::Result<T, RtcError>;

/// Session-level error surfaced to the embedding application.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RtcError {
    /// The transport failed to connect, was closed or reported an error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The native engine delivered a track that is neither audio nor video.
    #[error("invalid track kind: {0}")]
    InvalidTrackKind(String),

    /// The native engine could not create a local media track.
    #[error("failed to create local track: {0}")]
    TrackCreation(String),

    /// The session task is gone, the handle can no longer be used.
    #[error("session closed")]
    SessionClosed,
}

/// Errors reported by an [`EventTransport`](crate::transport::EventTransport).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Opening the socket failed, or the channel join timed out.
    #[error("connection error: {0}")]
    Connection(String),

    /// The remote side rejected the channel join.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The transport is not connected or was closed.
    #[error("transport closed")]
    Closed,

    /// A message could not be handed to the socket.
    #[error("send failed: {0}")]
    Send(String),
}

/// Failure while decoding an event received from (or sent to) the engine.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed event payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown event type `{0}`")]
    UnknownType(String),

    #[error("event `{0}` carries no data")]
    MissingData(String),
}

/// Failure of a native negotiation step.
#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("failed to create sdp offer: {0}")]
    CreateOffer(#[source] anyhow::Error),

    #[error("failed to set local description: {0}")]
    SetLocalDescription(#[source] anyhow::Error),

    #[error("failed to set remote description: {0}")]
    SetRemoteDescription(#[source] anyhow::Error),

    #[error("failed to create peer connection: {0}")]
    CreatePeerConnection(#[source] anyhow::Error),

    #[error("peer connection is closed")]
    Closed,
}
