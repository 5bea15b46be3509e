//! Membrane RTC client
//!
//! Client side of a Membrane RTC engine session: the media event codec, the
//! Phoenix channel transport, offer/answer negotiation over a native peer
//! connection and the session that ties them together.
//!
//! The native WebRTC engine is abstracted behind
//! [`PeerConnectionFactory`](peer::native::PeerConnectionFactory), so the crate
//! can be embedded on top of any media stack.

pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod model;
pub mod peer;
pub mod transport;
pub mod util;

#[cfg(test)]
mod testing;

pub use client::{MembraneRtc, TrackRequest};
pub use config::{ConnectOptions, EncoderOptions, EncoderType};
pub use error::{Result, RtcError, TransportError};
pub use model::RtcEvent;
