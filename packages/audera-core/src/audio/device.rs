//! cpal host/device resolution (spec §3 "AudioDevice", §4.2 "Audio I/O endpoints (C2)").
//!
//! Defaults resolve to the OS-reported default device for the requested
//! role, matching the original implementation's `pyaudio.get_default_*_device_info`
//! fallback. Named devices are matched by index first, then by name.

use cpal::traits::{DeviceTrait, HostTrait};

use crate::error::AuderaError;
use crate::model::audio::{AudioDevice, DeviceRole};

/// Resolves an [`AudioDevice`] record to an actual `cpal::Device`.
///
/// Index 0 with an empty name is treated as "use the OS default" (spec §3:
/// "Defaults resolve to the OS-reported default device for that role").
pub fn resolve(device: &AudioDevice) -> Result<cpal::Device, AuderaError> {
    let host = cpal::default_host();

    if device.name.is_empty() {
        return default_for_role(&host, device.role);
    }

    let mut devices = match device.role {
        DeviceRole::Input => host.input_devices(),
        DeviceRole::Output => host.output_devices(),
    }
    .map_err(|e| audio_device_err(device.role, e))?;

    devices
        .find(|d| d.name().map(|n| n == device.name).unwrap_or(false))
        .ok_or_else(|| AuderaError::AudioDevice {
            role: role_label(device.role),
            source: format!("no such device: {}", device.name).into(),
        })
}

/// Enumerates every available device for `role` as [`AudioDevice`] records,
/// indexed in enumeration order.
pub fn enumerate(role: DeviceRole) -> Result<Vec<AudioDevice>, AuderaError> {
    let host = cpal::default_host();
    let devices = match role {
        DeviceRole::Input => host.input_devices(),
        DeviceRole::Output => host.output_devices(),
    }
    .map_err(|e| audio_device_err(role, e))?;

    Ok(devices
        .enumerate()
        .filter_map(|(index, d)| d.name().ok().map(|name| AudioDevice::new(name, index as u32, role)))
        .collect())
}

/// Returns the OS-reported default device's [`AudioDevice`] record for `role`.
pub fn default_device_record(role: DeviceRole) -> Result<AudioDevice, AuderaError> {
    let host = cpal::default_host();
    let device = default_for_role(&host, role)?;
    let name = device.name().map_err(|e| audio_device_err(role, e))?;
    Ok(AudioDevice::new(name, 0, role))
}

fn default_for_role(host: &cpal::Host, role: DeviceRole) -> Result<cpal::Device, AuderaError> {
    let device = match role {
        DeviceRole::Input => host.default_input_device(),
        DeviceRole::Output => host.default_output_device(),
    };
    device.ok_or_else(|| AuderaError::AudioDevice {
        role: role_label(role),
        source: "no default device available".into(),
    })
}

fn role_label(role: DeviceRole) -> &'static str {
    match role {
        DeviceRole::Input => "input",
        DeviceRole::Output => "output",
    }
}

fn audio_device_err(role: DeviceRole, source: impl std::error::Error + Send + Sync + 'static) -> AuderaError {
    AuderaError::AudioDevice {
        role: role_label(role),
        source: Box::new(source),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_label_matches_variant() {
        assert_eq!(role_label(DeviceRole::Input), "input");
        assert_eq!(role_label(DeviceRole::Output), "output");
    }
}
