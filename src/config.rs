use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Public STUN server used when the engine offers no integrated TURN servers.
pub const DEFAULT_STUN_URL: &str = "stun:stun.l.google.com:19302";

/// Encoder implementation requested from the native engine.
///
/// Simulcast is only reliable with software encoders on most devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderType {
    Software,
    #[default]
    Hardware,
}

/// Options forwarded to the native factory when creating encoders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EncoderOptions {
    pub encoder_type: EncoderType,
    pub enable_intel_vp8_encoder: bool,
    pub enable_h264_high_profile: bool,
}

impl Default for EncoderOptions {
    fn default() -> Self {
        Self {
            encoder_type: EncoderType::Hardware,
            enable_intel_vp8_encoder: true,
            enable_h264_high_profile: false,
        }
    }
}

/// Session and transport configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConnectOptions {
    /// Upper bound for the channel join handshake.
    #[serde(with = "millis")]
    pub join_timeout: Duration,
    /// Interval of the socket keep-alive heartbeat.
    #[serde(with = "millis")]
    pub heartbeat_interval: Duration,
    /// STUN server used when no TURN servers are provided by the engine.
    pub default_stun_url: String,
    pub encoder_options: EncoderOptions,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            join_timeout: Duration::from_secs(3),
            heartbeat_interval: Duration::from_secs(30),
            default_stun_url: DEFAULT_STUN_URL.to_string(),
            encoder_options: EncoderOptions::default(),
        }
    }
}

impl ConnectOptions {
    /// Parse options from a JSON document, missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
