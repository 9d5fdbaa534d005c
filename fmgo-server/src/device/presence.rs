//! Non-invasive presence check by USB enumeration.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use log::debug;
use tokio::process::Command;

use crate::settings::DeviceSettings;

const SYSFS_USB_DEVICES: &str = "/sys/bus/usb/devices";

/// Whether any recognized tuner is enumerated on the USB bus.
///
/// Reads sysfs when available and falls back to `lsusb`. Missing tools,
/// unreadable directories and timeouts all count as "not present".
pub async fn is_present(settings: &DeviceSettings) -> bool {
    let timeout = Duration::from_millis(settings.presence_timeout_ms);
    match tokio::time::timeout(timeout, enumerate(settings)).await {
        Ok(found) => found,
        Err(_) => {
            debug!("USB enumeration timed out after {:?}", timeout);
            false
        }
    }
}

async fn enumerate(settings: &DeviceSettings) -> bool {
    if let Some(found) = scan_sysfs(Path::new(SYSFS_USB_DEVICES), &settings.usb_ids).await {
        return found;
    }

    let output = Command::new(&settings.lsusb)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await;
    match output {
        Ok(output) => lsusb_lists_tuner(&String::from_utf8_lossy(&output.stdout), &settings.usb_ids),
        Err(e) => {
            debug!("{} unavailable: {}", settings.lsusb, e);
            false
        }
    }
}

/// Scan a sysfs USB device directory. `None` when the directory cannot be read.
async fn scan_sysfs(root: &Path, usb_ids: &[String]) -> Option<bool> {
    let mut entries = tokio::fs::read_dir(root).await.ok()?;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let dir = entry.path();
        // Interfaces (e.g. "1-1:1.0") have no id files; skip quietly.
        let Ok(vendor) = tokio::fs::read_to_string(dir.join("idVendor")).await else {
            continue;
        };
        let Ok(product) = tokio::fs::read_to_string(dir.join("idProduct")).await else {
            continue;
        };
        let id = format!("{}:{}", vendor.trim(), product.trim());
        if matches_id(&id, usb_ids) {
            debug!("Tuner {} found at {:?}", id, dir);
            return Some(true);
        }
    }
    Some(false)
}

/// Whether `lsusb` output lists one of the given ids.
///
/// Lines look like `Bus 001 Device 004: ID 0bda:2838 Realtek Semiconductor Corp. RTL2838 DVB-T`.
pub fn lsusb_lists_tuner(output: &str, usb_ids: &[String]) -> bool {
    output.lines().any(|line| {
        line.split_whitespace()
            .skip_while(|word| *word != "ID")
            .nth(1)
            .map(|id| matches_id(id, usb_ids))
            .unwrap_or(false)
    })
}

fn matches_id(id: &str, usb_ids: &[String]) -> bool {
    usb_ids.iter().any(|known| known.eq_ignore_ascii_case(id))
}
