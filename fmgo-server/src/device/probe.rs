//! Invasive capability probe using `rtl_test`.
//!
//! Opening the dongle can wedge some tuner/antenna combinations, so this is
//! only run right before a launch and never on a polling cadence.

use std::process::Stdio;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::process::Command;

use crate::settings::DeviceSettings;

/// Open the device briefly and report whether it can be claimed.
pub async fn can_claim(settings: &DeviceSettings) -> bool {
    let timeout = Duration::from_millis(settings.probe_timeout_ms);
    let run = Command::new(&settings.rtl_test)
        .arg("-t")
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(timeout, run).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            warn!("Capability probe unavailable ({}): {}", settings.rtl_test, e);
            return false;
        }
        Err(_) => {
            warn!("Capability probe timed out after {:?}", timeout);
            return false;
        }
    };

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    let usable = probe_reports_usable(&text);
    if usable {
        info!("Capability probe: tuner can be claimed");
    } else {
        debug!("Capability probe output:\n{}", text);
        warn!("Capability probe: tuner could not be claimed");
    }
    usable
}

/// Interpret `rtl_test -t` output.
///
/// A found device counts as usable even when its tuner chip is not
/// recognized; a claim/open failure does not.
pub fn probe_reports_usable(output: &str) -> bool {
    if output.contains("No supported devices found") {
        return false;
    }
    if output.contains("usb_claim_interface error") || output.contains("Failed to open rtlsdr device") {
        return false;
    }
    output.lines().any(|line| {
        let line = line.trim();
        line.strip_prefix("Found ")
            .and_then(|rest| rest.split_whitespace().next())
            .and_then(|count| count.parse::<u32>().ok())
            .map(|count| count > 0 && line.contains("device"))
            .unwrap_or(false)
    })
}
