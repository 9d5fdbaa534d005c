//! Shared types for the fmgo RTL-SDR audio station.
//!
//! This crate defines the values exchanged between the fmgo server, its
//! persisted JSON documents and HTTP clients:
//!
//! - [`Band`] / [`TuningRequest`]: validated tuning input (AM or FM broadcast band)
//! - [`Gain`]: tuner gain, either `"auto"` (AGC) or a fixed value in dB
//! - [`StationConfig`] / [`StationConfigPatch`]: the persisted station settings
//! - [`PresetList`] / [`Preset`]: the persisted station presets
//! - [`StatusReport`]: the body of `GET /api/status`
//! - [`TuneError`] / [`LaunchError`]: the validation and launch failure taxonomy
//!
//! # Example
//!
//! ```rust
//! use fmgo_protocol::{Band, Gain, TuningRequest};
//!
//! let request = TuningRequest::new(99_500_000, Some(Gain::Manual(12.5))).unwrap();
//! assert_eq!(request.band, Band::Fm);
//!
//! // 40 MHz is in neither broadcast band
//! assert!(TuningRequest::new(40_000_000, None).is_err());
//! ```

pub mod error;
pub mod types;

pub use error::{LaunchError, TuneError};
pub use types::{
    validate_frequency, Band, ConfigChange, Gain, Preset, PresetList, PresetPatch, StationConfig,
    StationConfigPatch, StatusReport, TuningRequest, AM_MAX_HZ, AM_MIN_HZ, DEFAULT_FREQUENCY_HZ,
    FM_MAX_HZ, FM_MIN_HZ,
};
