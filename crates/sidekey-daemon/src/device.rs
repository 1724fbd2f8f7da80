//! Physical device discovery
//!
//! Finds the `/dev/input/event*` node for a device by USB vendor/model id.
//! Lookup goes through udev properties first (`ID_USB_VENDOR_ID` /
//! `ID_MODEL_ID` on the `input` subsystem), with a direct evdev scan as a
//! fallback for setups where udev properties are not populated. Both paths
//! can be called repeatedly: `reopen()` relies on getting the *currently*
//! valid node even after device enumeration order changes.

use std::path::PathBuf;

use sidekey_config::DeviceMatch;

/// Find the event device node for `target`, if it is currently present.
pub fn find_device(target: DeviceMatch) -> Option<PathBuf> {
    match find_by_udev(target) {
        Ok(Some(path)) => return Some(path),
        Ok(None) => {}
        Err(e) => {
            tracing::debug!("udev enumeration failed, falling back to evdev scan: {}", e);
        }
    }
    find_by_input_id(target)
}

fn find_by_udev(target: DeviceMatch) -> std::io::Result<Option<PathBuf>> {
    let mut enumerator = udev::Enumerator::new()?;
    enumerator.match_subsystem("input")?;
    enumerator.match_sysname("event*")?;
    enumerator.match_property("ID_USB_VENDOR_ID", format!("{:04x}", target.vendor))?;
    enumerator.match_property("ID_MODEL_ID", format!("{:04x}", target.product))?;

    Ok(enumerator
        .scan_devices()?
        .filter_map(|device| device.devnode().map(|p| p.to_path_buf()))
        .next())
}

fn find_by_input_id(target: DeviceMatch) -> Option<PathBuf> {
    let entries = std::fs::read_dir("/dev/input").ok()?;

    for entry in entries.flatten() {
        let path = entry.path();

        if !path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with("event"))
            .unwrap_or(false)
        {
            continue;
        }

        match evdev::Device::open(&path) {
            Ok(device) => {
                let id = device.input_id();
                if id.vendor() == target.vendor && id.product() == target.product {
                    return Some(path);
                }
            }
            Err(e) => {
                tracing::debug!("Could not open {}: {}", path.display(), e);
            }
        }
    }

    None
}
