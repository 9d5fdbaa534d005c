//! Resolved per-run pipeline parameters.

use fmgo_protocol::{Band, Gain, StationConfig, TuningRequest};

use crate::settings::PipelineSettings;

/// AM-only signal chain parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AmFilters {
    /// Boost before normalizing.
    pub gain_db: f64,
    /// Headroom after the boost.
    pub normalize_db: f64,
}

/// Concrete parameters of one pipeline run. Immutable once launched.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub band: Band,
    /// Frequency the user asked for.
    pub frequency_hz: u32,
    /// Frequency handed to the demodulator (offset-corrected for AM).
    pub tuned_frequency_hz: u32,
    /// IQ sample rate requested from the device.
    pub device_sample_rate: u32,
    /// Raw PCM rate the demodulator emits.
    pub demod_rate: u32,
    /// PCM rate the encoder receives.
    pub output_sample_rate: u32,
    /// `Gain::Auto` runs the tuner with AGC.
    pub gain: Gain,
    pub bitrate_kbps: u32,
    /// Present only for AM.
    pub am: Option<AmFilters>,
}

impl PipelineConfig {
    /// Derive the run parameters from a request whose gain has already been
    /// resolved (epoch ceiling applied).
    pub fn derive(request: &TuningRequest, gain: Gain, station: &StationConfig, settings: &PipelineSettings) -> Self {
        match request.band {
            Band::Fm => Self {
                band: Band::Fm,
                frequency_hz: request.frequency_hz,
                tuned_frequency_hz: request.frequency_hz,
                device_sample_rate: station.sample_rate,
                demod_rate: settings.fm_sample_rate,
                output_sample_rate: settings.output_sample_rate,
                gain,
                bitrate_kbps: station.audio_bitrate,
                am: None,
            },
            Band::Am => {
                let tuned = (request.frequency_hz as i64 + settings.am_offset_hz).clamp(0, u32::MAX as i64) as u32;
                Self {
                    band: Band::Am,
                    frequency_hz: request.frequency_hz,
                    tuned_frequency_hz: tuned,
                    // rtl_fm picks the device rate for direct sampling itself.
                    device_sample_rate: settings.am_sample_rate,
                    demod_rate: settings.am_sample_rate,
                    output_sample_rate: settings.output_sample_rate,
                    gain,
                    bitrate_kbps: station.audio_bitrate,
                    am: Some(AmFilters {
                        gain_db: settings.am_gain_db,
                        normalize_db: settings.am_normalize_db,
                    }),
                }
            }
        }
    }

    /// Whether the middle stage has to resample.
    pub fn needs_resample(&self) -> bool {
        self.demod_rate != self.output_sample_rate
    }
}

/// Gain for the first launch of the process: anything unset, AGC or above
/// `ceiling` is forced to 0 so a high-gain antenna cannot overload the
/// front end. `None` means the requested gain is kept.
pub fn epoch_gain_override(requested: Option<Gain>, ceiling: f64) -> Option<Gain> {
    match requested {
        None | Some(Gain::Auto) => Some(Gain::Manual(0.0)),
        Some(Gain::Manual(db)) if db > ceiling => Some(Gain::Manual(0.0)),
        Some(Gain::Manual(_)) => None,
    }
}
