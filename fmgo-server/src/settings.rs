//! Operator settings for the device and the process pipeline.
//!
//! These come from the `[pipeline]` and `[device]` sections of the server
//! TOML file; every field has a default so the sections may be omitted.

use std::time::Duration;

use serde::Deserialize;

/// Tool paths, signal-chain constants and timings of the process pipeline.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Demodulator executable.
    pub rtl_fm: String,
    /// Resampler/normalizer executable.
    pub sox: String,
    /// Encoder executable.
    pub ffmpeg: String,

    /// Correction added to the requested AM frequency before tuning.
    /// Depends on the dongle and driver version.
    pub am_offset_hz: i64,
    /// Raw demodulator output rate for AM.
    pub am_sample_rate: u32,
    /// Raw demodulator output rate for FM.
    pub fm_sample_rate: u32,
    /// Rate the encoder receives.
    pub output_sample_rate: u32,
    /// Fixed boost applied to direct-sampled AM.
    pub am_gain_db: f64,
    /// Headroom AM is brought to after the boost.
    pub am_normalize_db: f64,

    /// Launch attempts before giving up on claiming the device.
    pub max_attempts: u32,
    /// Time the demodulator must survive after spawn.
    pub liveness_ms: u64,
    /// Pause after teardown so the OS releases the USB interface.
    pub settle_ms: u64,
    /// Graceful stop timeout when retuning a running stream.
    pub retune_stop_ms: u64,
    /// Graceful stop timeout otherwise.
    pub cold_stop_ms: u64,
    /// Backoff before the second attempt.
    pub first_backoff_ms: u64,
    /// Backoff before any later attempt.
    pub backoff_ms: u64,
    /// Delay before the startup capability probe.
    pub startup_delay_ms: u64,

    /// Bytes read from the encoder per cycle.
    pub chunk_size: usize,
    /// Highest gain allowed on the first launch of the process.
    pub epoch_gain_ceiling: f64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            rtl_fm: "rtl_fm".to_string(),
            sox: "sox".to_string(),
            ffmpeg: "ffmpeg".to_string(),
            am_offset_hz: 0,
            am_sample_rate: 24_000,
            fm_sample_rate: 48_000,
            output_sample_rate: 48_000,
            am_gain_db: 20.0,
            am_normalize_db: -1.0,
            max_attempts: 2,
            liveness_ms: 1_000,
            settle_ms: 400,
            retune_stop_ms: 2_000,
            cold_stop_ms: 5_000,
            first_backoff_ms: 1_500,
            backoff_ms: 750,
            startup_delay_ms: 2_000,
            chunk_size: 32 * 1024,
            epoch_gain_ceiling: 20.0,
        }
    }
}

impl PipelineSettings {
    pub fn liveness_window(&self) -> Duration {
        Duration::from_millis(self.liveness_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn retune_stop_timeout(&self) -> Duration {
        Duration::from_millis(self.retune_stop_ms)
    }

    pub fn cold_stop_timeout(&self) -> Duration {
        Duration::from_millis(self.cold_stop_ms)
    }

    /// Backoff after failed attempt number `attempt` (1-based).
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            Duration::from_millis(self.first_backoff_ms)
        } else {
            Duration::from_millis(self.backoff_ms)
        }
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay_ms)
    }
}

/// How the tuner is detected and probed.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    /// Diagnostic utility that opens the device.
    pub rtl_test: String,
    /// USB enumeration tool used when sysfs is unavailable.
    pub lsusb: String,
    /// `vvvv:pppp` ids recognized as RTL-SDR tuners.
    pub usb_ids: Vec<String>,
    pub presence_timeout_ms: u64,
    pub probe_timeout_ms: u64,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            rtl_test: "rtl_test".to_string(),
            lsusb: "lsusb".to_string(),
            usb_ids: vec!["0bda:2838".to_string(), "0bda:2832".to_string()],
            presence_timeout_ms: 1_000,
            probe_timeout_ms: 3_000,
        }
    }
}
