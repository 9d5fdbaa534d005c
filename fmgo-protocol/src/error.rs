//! Error types for tuning validation and pipeline launches.

use thiserror::Error;

/// Validation errors for user-supplied tuning and station values.
///
/// These never change any state; the HTTP layer reports them as 400.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TuneError {
    /// Frequency falls outside both broadcast bands.
    #[error("Frequency {0} Hz is outside the AM (530-1700 kHz) and FM (87.5-108 MHz) broadcast bands")]
    InvalidFrequency(i64),

    /// A required field was not supplied.
    #[error("Missing {0}")]
    MissingField(&'static str),

    /// A field was supplied with an unusable value.
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl TuneError {
    pub fn code(&self) -> &'static str {
        match self {
            TuneError::InvalidFrequency(_) => "invalid-frequency",
            TuneError::MissingField(_) => "missing-field",
            TuneError::InvalidValue { .. } => "invalid-value",
        }
    }
}

/// Reasons a stream launch can fail.
///
/// Every failure tears down any partially started process chain before it
/// is returned.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LaunchError {
    /// The request did not validate.
    #[error(transparent)]
    Invalid(#[from] TuneError),

    /// No tuner is enumerated on the USB bus.
    #[error("RTL-SDR device not detected")]
    DeviceNotPresent,

    /// The demodulator kept exiting right after start.
    #[error("Demodulator exited during startup on all {attempts} attempts (USB device could not be claimed)")]
    ClaimFailed { attempts: u32 },

    /// A process could not be created or wired.
    #[error("Failed to start pipeline: {0}")]
    Unexpected(String),
}

impl LaunchError {
    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            LaunchError::Invalid(e) => e.code(),
            LaunchError::DeviceNotPresent => "device-not-present",
            LaunchError::ClaimFailed { .. } => "claim-failed-after-retries",
            LaunchError::Unexpected(_) => "unexpected-launch-error",
        }
    }

    /// HTTP status the failure is reported with.
    pub fn http_status(&self) -> u16 {
        match self {
            LaunchError::Invalid(_) => 400,
            LaunchError::DeviceNotPresent => 503,
            LaunchError::ClaimFailed { .. } | LaunchError::Unexpected(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_error_mapping() {
        let invalid = LaunchError::from(TuneError::InvalidFrequency(40_000_000));
        assert_eq!(invalid.code(), "invalid-frequency");
        assert_eq!(invalid.http_status(), 400);

        assert_eq!(LaunchError::DeviceNotPresent.http_status(), 503);
        assert_eq!(
            LaunchError::ClaimFailed { attempts: 2 }.code(),
            "claim-failed-after-retries"
        );
        assert_eq!(LaunchError::Unexpected("spawn".into()).http_status(), 500);
    }

    #[test]
    fn test_invalid_frequency_message_is_transparent() {
        let err = LaunchError::from(TuneError::InvalidFrequency(5));
        assert_eq!(err.to_string(), TuneError::InvalidFrequency(5).to_string());
    }
}
