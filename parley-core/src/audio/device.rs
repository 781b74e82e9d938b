//! Audio device enumeration and selection.

use serde::{Deserialize, Serialize};

/// Metadata about an audio device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Human-readable device name reported by the OS.
    pub name: String,
    /// Whether this is the system default device for its direction.
    pub is_default: bool,
    /// Heuristic flag for inputs that capture system output instead of a mic.
    pub is_loopback_like: bool,
}

const LOOPBACK_KEYWORDS: &[&str] = &[
    "stereo mix",
    "wave out",
    "what u hear",
    "what you hear",
    "loopback",
    "monitor of",
    "virtual output",
];

/// Best-effort check for loopback/system-output capture devices. Picking one
/// as the microphone would feed the assistant's own voice back to it.
pub fn is_loopback_like_name(name: &str) -> bool {
    let lowered = name.trim().to_ascii_lowercase();
    LOOPBACK_KEYWORDS.iter().any(|k| lowered.contains(k))
}

#[cfg(feature = "audio-cpal")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    Input,
    Output,
}

/// List all input devices, default first.
#[cfg(feature = "audio-cpal")]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    list(Direction::Input)
}

/// List all output devices, default first.
#[cfg(feature = "audio-cpal")]
pub fn list_output_devices() -> Vec<DeviceInfo> {
    list(Direction::Output)
}

#[cfg(feature = "audio-cpal")]
fn list(direction: Direction) -> Vec<DeviceInfo> {
    use cpal::traits::DeviceTrait;

    let host = cpal::default_host();
    let default_name = default_device(&host, direction).and_then(|d| d.name().ok());

    let devices = match enumerate(&host, direction) {
        Ok(devices) => devices,
        Err(e) => {
            tracing::warn!(?direction, "failed to enumerate devices: {e}");
            return default_name
                .map(|name| {
                    vec![DeviceInfo {
                        is_loopback_like: is_loopback_like_name(&name),
                        name,
                        is_default: true,
                    }]
                })
                .unwrap_or_default();
        }
    };

    let mut list: Vec<DeviceInfo> = devices
        .enumerate()
        .map(|(idx, device)| {
            let name = device
                .name()
                .unwrap_or_else(|_| format!("Device {}", idx + 1));
            DeviceInfo {
                is_default: default_name.as_deref() == Some(name.as_str()),
                is_loopback_like: direction == Direction::Input && is_loopback_like_name(&name),
                name,
            }
        })
        .collect();
    list.sort_by_key(|d| (!d.is_default, d.is_loopback_like, d.name.to_ascii_lowercase()));
    list
}

/// Resolve a device by exact name, else the host default, else the first one.
#[cfg(feature = "audio-cpal")]
pub(crate) fn select_device(direction: Direction, preferred: Option<&str>) -> Option<cpal::Device> {
    use cpal::traits::DeviceTrait;

    let host = cpal::default_host();
    if let Some(wanted) = preferred {
        match enumerate(&host, direction) {
            Ok(mut all) => {
                if let Some(found) = all.find(|d| d.name().map(|n| n == wanted).unwrap_or(false)) {
                    return Some(found);
                }
                tracing::warn!(?direction, "preferred device '{wanted}' not found, falling back");
            }
            Err(e) => tracing::warn!(?direction, "failed to list devices: {e}"),
        }
    }

    default_device(&host, direction).or_else(|| {
        tracing::warn!(?direction, "no default device, falling back to first available");
        enumerate(&host, direction).ok().and_then(|mut all| all.next())
    })
}

#[cfg(feature = "audio-cpal")]
fn default_device(host: &cpal::Host, direction: Direction) -> Option<cpal::Device> {
    use cpal::traits::HostTrait;

    match direction {
        Direction::Input => host.default_input_device(),
        Direction::Output => host.default_output_device(),
    }
}

#[cfg(feature = "audio-cpal")]
fn enumerate(
    host: &cpal::Host,
    direction: Direction,
) -> Result<Box<dyn Iterator<Item = cpal::Device>>, cpal::DevicesError> {
    use cpal::traits::HostTrait;

    let devices: Box<dyn Iterator<Item = cpal::Device>> = match direction {
        Direction::Input => Box::new(host.input_devices()?),
        Direction::Output => Box::new(host.output_devices()?),
    };
    Ok(devices)
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    vec![]
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_output_devices() -> Vec<DeviceInfo> {
    vec![]
}

#[cfg(test)]
mod tests {
    use super::is_loopback_like_name;

    #[test]
    fn detects_common_loopback_names() {
        assert!(is_loopback_like_name("Stereo Mix (Realtek Audio)"));
        assert!(is_loopback_like_name("Monitor of Built-in Audio Analog Stereo"));
        assert!(is_loopback_like_name("  WHAT U HEAR (Sound Blaster)"));
    }

    #[test]
    fn microphones_are_not_loopback() {
        assert!(!is_loopback_like_name("Microphone Array (USB PnP Audio Device)"));
        assert!(!is_loopback_like_name("MacBook Pro Microphone"));
    }
}
