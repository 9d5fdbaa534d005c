//! Tuning, station and API type definitions.

use serde::{Deserialize, Serialize};

use crate::error::TuneError;

/// Lowest AM broadcast frequency (Hz).
pub const AM_MIN_HZ: i64 = 530_000;
/// Highest AM broadcast frequency (Hz).
pub const AM_MAX_HZ: i64 = 1_700_000;
/// Lowest FM broadcast frequency (Hz).
pub const FM_MIN_HZ: i64 = 87_500_000;
/// Highest FM broadcast frequency (Hz).
pub const FM_MAX_HZ: i64 = 108_000_000;

/// Frequency used when nothing else is configured (101.5 MHz).
pub const DEFAULT_FREQUENCY_HZ: u32 = 101_500_000;

/// Broadcast band a frequency belongs to.
///
/// The band decides how the demodulator is driven: AM is received with
/// direct sampling and needs offset correction, DC blocking and a gain
/// boost; FM is demodulated as wideband FM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Band {
    /// AM broadcast, 530 kHz - 1700 kHz.
    Am,
    /// FM broadcast, 87.5 MHz - 108 MHz.
    Fm,
}

impl Band {
    /// Classify a frequency, both range ends inclusive.
    pub fn from_frequency(frequency_hz: i64) -> Option<Self> {
        match frequency_hz {
            AM_MIN_HZ..=AM_MAX_HZ => Some(Band::Am),
            FM_MIN_HZ..=FM_MAX_HZ => Some(Band::Fm),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Band::Am => "AM",
            Band::Fm => "FM",
        }
    }
}

/// Validate a frequency and narrow it to the tuner's integer range.
pub fn validate_frequency(frequency_hz: i64) -> Result<(u32, Band), TuneError> {
    let band = Band::from_frequency(frequency_hz).ok_or(TuneError::InvalidFrequency(frequency_hz))?;
    // Both bands lie far below u32::MAX.
    Ok((frequency_hz as u32, band))
}

/// Tuner gain.
///
/// Serialized as the string `"auto"` for AGC or as a plain number (dB, on
/// the demodulator's scale) for a fixed gain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawGain", into = "RawGain")]
pub enum Gain {
    /// Tuner-side automatic gain control.
    Auto,
    /// Fixed gain in dB.
    Manual(f64),
}

impl Gain {
    /// Fixed gain value, `None` for AGC.
    pub fn manual_db(&self) -> Option<f64> {
        match self {
            Gain::Auto => None,
            Gain::Manual(db) => Some(*db),
        }
    }
}

impl Default for Gain {
    fn default() -> Self {
        Gain::Auto
    }
}

impl std::fmt::Display for Gain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Gain::Auto => write!(f, "auto"),
            Gain::Manual(db) => write!(f, "{}", db),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawGain {
    Number(f64),
    Text(String),
}

impl TryFrom<RawGain> for Gain {
    type Error = String;

    fn try_from(raw: RawGain) -> Result<Self, Self::Error> {
        let db = match raw {
            RawGain::Text(text) if text.trim().eq_ignore_ascii_case("auto") => return Ok(Gain::Auto),
            RawGain::Text(text) => text
                .trim()
                .parse::<f64>()
                .map_err(|_| format!("gain must be \"auto\" or a number, got {:?}", text))?,
            RawGain::Number(db) => db,
        };
        if !db.is_finite() || db < 0.0 {
            return Err(format!("gain must be a non-negative number, got {}", db));
        }
        Ok(Gain::Manual(db))
    }
}

impl From<Gain> for RawGain {
    fn from(gain: Gain) -> Self {
        match gain {
            Gain::Auto => RawGain::Text("auto".to_string()),
            Gain::Manual(db) => RawGain::Number(db),
        }
    }
}

/// A validated request to tune the receiver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TuningRequest {
    pub frequency_hz: u32,
    /// `None` leaves the choice to the launcher (treated like AGC).
    pub gain: Option<Gain>,
    /// Derived from `frequency_hz`.
    pub band: Band,
}

impl TuningRequest {
    /// Build a request, rejecting frequencies outside both bands.
    pub fn new(frequency_hz: i64, gain: Option<Gain>) -> Result<Self, TuneError> {
        let (frequency_hz, band) = validate_frequency(frequency_hz)?;
        Ok(Self {
            frequency_hz,
            gain,
            band,
        })
    }
}

/// Persisted station settings (`config.json`).
///
/// Missing keys fall back to their defaults when loading; unknown keys are
/// ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StationConfig {
    /// HTTP port the server listens on.
    pub port: u16,
    /// Device IQ sample rate handed to the demodulator.
    pub sample_rate: u32,
    /// Last tuned frequency (Hz).
    pub frequency: u32,
    pub gain: Gain,
    /// Only `"mp3"` is produced by the encoder stage.
    pub audio_format: String,
    /// Encoder bitrate in kbit/s.
    pub audio_bitrate: u32,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            sample_rate: 240_000,
            frequency: DEFAULT_FREQUENCY_HZ,
            gain: Gain::Auto,
            audio_format: "mp3".to_string(),
            audio_bitrate: 128,
        }
    }
}

/// Partial update of [`StationConfig`]; absent keys are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StationConfigPatch {
    pub port: Option<u16>,
    pub sample_rate: Option<u32>,
    pub frequency: Option<i64>,
    pub gain: Option<Gain>,
    pub audio_format: Option<String>,
    pub audio_bitrate: Option<u32>,
}

/// Which tuning-relevant settings an applied patch changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigChange {
    pub frequency: bool,
    pub gain: bool,
}

impl ConfigChange {
    /// Whether a running stream has to be relaunched to pick up the change.
    pub fn requires_relaunch(&self) -> bool {
        self.frequency || self.gain
    }
}

impl StationConfig {
    /// Merge a patch. Every value is validated before anything is written,
    /// so a rejected patch leaves the config untouched.
    pub fn apply(&mut self, patch: StationConfigPatch) -> Result<ConfigChange, TuneError> {
        let frequency = patch
            .frequency
            .map(|f| validate_frequency(f).map(|(hz, _)| hz))
            .transpose()?;
        if patch.port == Some(0) {
            return Err(invalid("port", "must be between 1 and 65535"));
        }
        if patch.sample_rate == Some(0) {
            return Err(invalid("sample_rate", "must be positive"));
        }
        if patch.audio_bitrate == Some(0) {
            return Err(invalid("audio_bitrate", "must be positive"));
        }
        if let Some(format) = &patch.audio_format {
            if !format.eq_ignore_ascii_case("mp3") {
                return Err(invalid("audio_format", "only \"mp3\" is supported"));
            }
        }

        let mut change = ConfigChange::default();
        if let Some(frequency) = frequency {
            change.frequency = frequency != self.frequency;
            self.frequency = frequency;
        }
        if let Some(gain) = patch.gain {
            change.gain = gain != self.gain;
            self.gain = gain;
        }
        if let Some(port) = patch.port {
            self.port = port;
        }
        if let Some(sample_rate) = patch.sample_rate {
            self.sample_rate = sample_rate;
        }
        if let Some(format) = patch.audio_format {
            self.audio_format = format.to_ascii_lowercase();
        }
        if let Some(bitrate) = patch.audio_bitrate {
            self.audio_bitrate = bitrate;
        }
        Ok(change)
    }
}

fn invalid(field: &'static str, reason: &str) -> TuneError {
    TuneError::InvalidValue {
        field,
        reason: reason.to_string(),
    }
}

/// A saved station.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preset {
    pub id: u32,
    pub name: String,
    pub frequency: u32,
}

/// Body of preset create/update requests.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PresetPatch {
    pub name: Option<String>,
    pub frequency: Option<i64>,
}

/// Persisted preset document (`presets.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresetList {
    #[serde(default)]
    pub presets: Vec<Preset>,
}

impl Default for PresetList {
    fn default() -> Self {
        Self {
            presets: vec![Preset {
                id: 1,
                name: "Default Station".to_string(),
                frequency: DEFAULT_FREQUENCY_HZ,
            }],
        }
    }
}

impl PresetList {
    /// Id the next added preset receives: one past the highest id in use.
    pub fn next_id(&self) -> u32 {
        self.presets.iter().map(|p| p.id).max().unwrap_or(0) + 1
    }

    /// Add a preset; both name and frequency are required.
    pub fn add(&mut self, patch: PresetPatch) -> Result<Preset, TuneError> {
        let name = validate_name(patch.name.ok_or(TuneError::MissingField("name"))?)?;
        let frequency = patch.frequency.ok_or(TuneError::MissingField("frequency"))?;
        let (frequency, _) = validate_frequency(frequency)?;

        let preset = Preset {
            id: self.next_id(),
            name,
            frequency,
        };
        self.presets.push(preset.clone());
        Ok(preset)
    }

    /// Update the given fields of a preset. `Ok(None)` when the id is unknown.
    pub fn update(&mut self, id: u32, patch: PresetPatch) -> Result<Option<Preset>, TuneError> {
        let name = patch.name.map(validate_name).transpose()?;
        let frequency = patch
            .frequency
            .map(|f| validate_frequency(f).map(|(hz, _)| hz))
            .transpose()?;

        let Some(preset) = self.presets.iter_mut().find(|p| p.id == id) else {
            return Ok(None);
        };
        if let Some(name) = name {
            preset.name = name;
        }
        if let Some(frequency) = frequency {
            preset.frequency = frequency;
        }
        Ok(Some(preset.clone()))
    }

    /// Remove a preset. Returns whether one was removed.
    pub fn remove(&mut self, id: u32) -> bool {
        let before = self.presets.len();
        self.presets.retain(|p| p.id != id);
        self.presets.len() != before
    }
}

fn validate_name(name: String) -> Result<String, TuneError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(invalid("name", "must not be empty"));
    }
    Ok(trimmed.to_string())
}

/// Body of `GET /api/status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub rtl_sdr_detected: bool,
    pub is_playing: bool,
    pub current_frequency: Option<u32>,
    pub service_running: bool,
    /// SoC temperature in °C when the platform exposes it.
    pub cpu_temperature: Option<f64>,
    /// Reserved; RDS is not decoded.
    pub rds_ps: Option<String>,
    /// Reserved; RDS is not decoded.
    pub rds_radiotext: Option<String>,
}
