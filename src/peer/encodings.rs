//! Send encodings and bitrate distribution

use tracing::{error, warn};

use crate::model::media::{BandwidthLimit, LocalTrack, TrackBandwidthLimit};
use crate::model::tracks::{SimulcastConfig, TrackEncoding};
use crate::peer::native::RtpEncodingParameters;

/// Three encodings `l`, `m`, `h`, active as listed in `config`.
pub fn simulcast_encodings(config: &SimulcastConfig) -> Vec<RtpEncodingParameters> {
    TrackEncoding::ALL
        .into_iter()
        .map(|encoding| {
            RtpEncodingParameters::new(
                Some(encoding.as_rid()),
                config.is_active(encoding),
                Some(encoding.scale_down()),
            )
        })
        .collect()
}

/// Send encodings of a local track with its bitrate limit applied.
///
/// Audio tracks and video tracks without simulcast get a single active
/// encoding without rid.
pub fn send_encodings(track: &LocalTrack) -> Vec<RtpEncodingParameters> {
    let Some(parameters) = track.video_parameters() else {
        return vec![RtpEncodingParameters::new(None, true, None)];
    };

    let mut encodings = if parameters.simulcast_config.enabled {
        simulcast_encodings(&parameters.simulcast_config)
    } else {
        vec![RtpEncodingParameters::new(None, true, None)]
    };
    apply_bitrate(&mut encodings, &parameters.max_bitrate);

    encodings
}

pub fn apply_bitrate(encodings: &mut [RtpEncodingParameters], limit: &TrackBandwidthLimit) {
    match limit {
        TrackBandwidthLimit::Limit(limit) => split_bitrate(encodings, *limit),
        TrackBandwidthLimit::Simulcast(limits) => {
            for encoding in encodings.iter_mut() {
                let limit = encoding
                    .rid
                    .and_then(|rid| TrackEncoding::ALL.into_iter().find(|e| e.as_rid() == rid))
                    .and_then(|e| limits.get(e.rid()))
                    .copied()
                    .unwrap_or(BandwidthLimit(0));
                encoding.max_bitrate_bps = limit.as_bps();
            }
        }
    }
}

/// Distribute `limit` over `encodings` proportionally to their pixel area.
///
/// The weight of an encoding is `(s_min / s)^2`, `s_min` being the smallest
/// scale-down factor among the active encodings. A missing scale factor counts
/// as `1.0`, a limit of `0` removes all caps.
pub fn split_bitrate(encodings: &mut [RtpEncodingParameters], limit: BandwidthLimit) {
    if encodings.is_empty() {
        error!("Attempted to limit the bandwidth of a track without encodings");
        return;
    }

    if limit.is_unlimited() {
        for encoding in encodings.iter_mut() {
            encoding.max_bitrate_bps = None;
        }
        return;
    }

    let scale = |e: &RtpEncodingParameters| e.scale_resolution_down_by.unwrap_or(1.0);

    let s_min = encodings
        .iter()
        .filter(|e| e.active)
        .map(scale)
        .reduce(f64::min)
        .or_else(|| encodings.iter().map(scale).reduce(f64::min))
        .unwrap_or(1.0);

    let weight = |e: &RtpEncodingParameters| (s_min / scale(e)).powi(2);
    let parts: f64 = encodings.iter().map(weight).sum();
    if parts <= 0.0 {
        warn!("Encodings have no usable scale factors, bitrate left unchanged");
        return;
    }

    let x = limit.0 as f64 / parts;
    for encoding in encodings.iter_mut() {
        encoding.max_bitrate_bps = Some((x * weight(encoding) * 1024.0) as u32);
    }
}
