//! RTL-SDR device detection.
//!
//! Two checks with very different costs:
//! - [`presence`]: USB enumeration only, safe to run on every status poll
//! - [`probe`]: briefly opens the tuner with `rtl_test`, used only right
//!   before a launch
//!
//! Neither check ever returns an error; any failure reads as `false`.

pub mod presence;
pub mod probe;

use async_trait::async_trait;

use crate::settings::DeviceSettings;

/// Hardware checks consumed by the stream controller.
#[async_trait]
pub trait DeviceMonitor: Send + Sync {
    /// Whether a tuner is attached. Never opens the device.
    async fn present(&self) -> bool;

    /// Whether the tuner can actually be claimed. Opens the device.
    async fn probe(&self) -> bool;
}

/// The real RTL-SDR dongle, checked through sysfs/`lsusb` and `rtl_test`.
#[derive(Debug, Clone)]
pub struct RtlSdrDevice {
    settings: DeviceSettings,
}

impl RtlSdrDevice {
    pub fn new(settings: DeviceSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl DeviceMonitor for RtlSdrDevice {
    async fn present(&self) -> bool {
        presence::is_present(&self.settings).await
    }

    async fn probe(&self) -> bool {
        probe::can_claim(&self.settings).await
    }
}
