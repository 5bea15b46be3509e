//! Local media tracks and their encoding parameters

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use str0m::media::MediaKind;

use crate::model::tracks::{SimulcastConfig, TrackEncoding};
use crate::peer::native::NativeLocalTrack;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Swap width and height, used for portrait capture.
    pub fn flip(self) -> Self {
        Self {
            width: self.height,
            height: self.width,
        }
    }
}

/// Maximal bandwidth in kbps, `0` means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BandwidthLimit(pub u32);

impl BandwidthLimit {
    pub fn is_unlimited(self) -> bool {
        self.0 == 0
    }

    /// The limit in bits per second, `None` when unlimited.
    pub fn as_bps(self) -> Option<u32> {
        if self.is_unlimited() {
            None
        } else {
            Some(self.0.saturating_mul(1024))
        }
    }
}

/// Bandwidth limit of a track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackBandwidthLimit {
    /// Total limit, split across simulcast layers when there are several.
    Limit(BandwidthLimit),
    /// Per layer limits keyed by rid. Layers missing here are unlimited.
    Simulcast(HashMap<String, BandwidthLimit>),
}

impl Default for TrackBandwidthLimit {
    fn default() -> Self {
        TrackBandwidthLimit::Limit(BandwidthLimit(0))
    }
}

/// Capture and encoding parameters of a video feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoParameters {
    pub dimensions: Dimensions,
    pub max_bitrate: TrackBandwidthLimit,
    pub max_fps: u32,
    #[serde(default)]
    pub simulcast_config: SimulcastConfig,
}

macro_rules! presets {
    ($($(#[$doc:meta])* $name:ident => ($w:expr, $h:expr, $kbps:expr, $fps:expr);)*) => {
        impl VideoParameters {
            $(
                $(#[$doc])*
                pub fn $name() -> Self {
                    Self::new(Dimensions::new($w, $h), BandwidthLimit($kbps), $fps)
                }
            )*
        }
    };
}

presets! {
    preset_qvga_43 => (240, 180, 90, 10);
    preset_vga_43 => (480, 360, 225, 20);
    preset_qhd_43 => (720, 540, 450, 25);
    preset_hd_43 => (960, 720, 1_500, 30);
    preset_fhd_43 => (1440, 1080, 2_800, 30);

    preset_qvga_169 => (320, 180, 120, 10);
    preset_vga_169 => (640, 360, 300, 20);
    preset_qhd_169 => (960, 540, 600, 25);
    preset_hd_169 => (1280, 720, 2_000, 30);
    preset_fhd_169 => (1920, 1080, 3_000, 30);

    /// Low frame rate screen share, suitable for slides.
    preset_screen_share_vga => (640, 360, 200, 3);
    preset_screen_share_hd5 => (1280, 720, 400, 5);
    preset_screen_share_hd15 => (1280, 720, 1_000, 15);
    preset_screen_share_fhd15 => (1920, 1080, 1_500, 15);
    preset_screen_share_fhd30 => (1920, 1080, 3_000, 30);
}

impl VideoParameters {
    pub fn new(dimensions: Dimensions, max_bitrate: BandwidthLimit, max_fps: u32) -> Self {
        Self {
            dimensions,
            max_bitrate: TrackBandwidthLimit::Limit(max_bitrate),
            max_fps,
            simulcast_config: SimulcastConfig::default(),
        }
    }

    pub fn with_bandwidth_limit(mut self, limit: TrackBandwidthLimit) -> Self {
        self.max_bitrate = limit;
        self
    }

    /// Enable simulcast with the given active layers.
    pub fn with_simulcast(mut self, active_encodings: Vec<TrackEncoding>) -> Self {
        self.simulcast_config = SimulcastConfig::new(true, active_encodings);
        self
    }
}

impl Default for VideoParameters {
    fn default() -> Self {
        Self::preset_vga_169()
    }
}

/// A media track produced on this device.
#[derive(Debug, Clone)]
pub enum LocalTrack {
    Audio(Arc<dyn NativeLocalTrack>),
    Video {
        native: Arc<dyn NativeLocalTrack>,
        parameters: VideoParameters,
    },
    Screencast {
        native: Arc<dyn NativeLocalTrack>,
        parameters: VideoParameters,
    },
}

impl LocalTrack {
    pub fn native(&self) -> &Arc<dyn NativeLocalTrack> {
        match self {
            LocalTrack::Audio(native)
            | LocalTrack::Video { native, .. }
            | LocalTrack::Screencast { native, .. } => native,
        }
    }

    pub fn id(&self) -> &str {
        self.native().id()
    }

    pub fn kind(&self) -> MediaKind {
        match self {
            LocalTrack::Audio(_) => MediaKind::Audio,
            LocalTrack::Video { .. } | LocalTrack::Screencast { .. } => MediaKind::Video,
        }
    }

    pub fn video_parameters(&self) -> Option<&VideoParameters> {
        match self {
            LocalTrack::Audio(_) => None,
            LocalTrack::Video { parameters, .. } | LocalTrack::Screencast { parameters, .. } => {
                Some(parameters)
            }
        }
    }

    /// Simulcast configuration, `None` for audio tracks.
    pub fn simulcast_config(&self) -> Option<&SimulcastConfig> {
        self.video_parameters().map(|p| &p.simulcast_config)
    }

    pub fn start(&self) {
        self.native().start();
    }

    pub fn stop(&self) {
        self.native().stop();
    }

    pub fn enabled(&self) -> bool {
        self.native().enabled()
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.native().set_enabled(enabled);
    }
}
