//! Audio device enumeration and lookup

use cpal::traits::{DeviceTrait, HostTrait};
use serde::Serialize;

use crate::error::AudioError;

/// Sample rates checked when listing device capabilities
const CANDIDATE_RATES: [u32; 4] = [44100, 48000, 88200, 96000];

/// Serializable description of a device, as listed to the control side
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    /// `input:<name>` or `output:<name>`
    pub id: String,
    pub name: String,
    pub is_input: bool,
    pub is_default: bool,
    pub sample_rates: Vec<u32>,
    pub channels: Vec<u16>,
}

/// A resolved cpal device
pub struct AudioDevice {
    inner: cpal::Device,
    pub name: String,
}

impl AudioDevice {
    fn from_cpal(device: cpal::Device) -> Self {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        Self { inner: device, name }
    }

    pub fn inner(&self) -> &cpal::Device {
        &self.inner
    }

    pub fn into_inner(self) -> cpal::Device {
        self.inner
    }
}

/// Direction half of a device id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Input,
    Output,
}

impl Direction {
    fn prefix(self) -> &'static str {
        match self {
            Direction::Input => "input:",
            Direction::Output => "output:",
        }
    }
}

/// Split `input:<name>` / `output:<name>`; a bare name is treated as `default`
fn parse_id(id: &str, default: Direction) -> (Direction, &str) {
    if let Some(name) = id.strip_prefix(Direction::Input.prefix()) {
        (Direction::Input, name)
    } else if let Some(name) = id.strip_prefix(Direction::Output.prefix()) {
        (Direction::Output, name)
    } else {
        (default, id)
    }
}

/// List every input and output device of the default host
pub fn list_devices() -> Vec<DeviceInfo> {
    let host = cpal::default_host();
    let mut devices = Vec::new();

    for direction in [Direction::Input, Direction::Output] {
        let (default_name, listed) = match direction {
            Direction::Input => (
                host.default_input_device().and_then(|d| d.name().ok()),
                host.input_devices().map(|d| d.collect::<Vec<_>>()),
            ),
            Direction::Output => (
                host.default_output_device().and_then(|d| d.name().ok()),
                host.output_devices().map(|d| d.collect::<Vec<_>>()),
            ),
        };
        let Ok(listed) = listed else {
            tracing::warn!("Could not enumerate {:?} devices", direction);
            continue;
        };

        for device in listed {
            let Ok(name) = device.name() else {
                continue;
            };
            let (sample_rates, channels) = capabilities(&device, direction);
            devices.push(DeviceInfo {
                id: format!("{}{}", direction.prefix(), name),
                is_default: default_name.as_deref() == Some(name.as_str()),
                name,
                is_input: direction == Direction::Input,
                sample_rates,
                channels,
            });
        }
    }

    devices
}

fn capabilities(device: &cpal::Device, direction: Direction) -> (Vec<u32>, Vec<u16>) {
    let configs: Vec<cpal::SupportedStreamConfigRange> = match direction {
        Direction::Input => device.supported_input_configs().map(|c| c.collect()),
        Direction::Output => device.supported_output_configs().map(|c| c.collect()),
    }
    .unwrap_or_default();

    let mut rates: Vec<u32> = CANDIDATE_RATES
        .into_iter()
        .filter(|&rate| {
            let rate = cpal::SampleRate(rate);
            configs
                .iter()
                .any(|c| c.min_sample_rate() <= rate && rate <= c.max_sample_rate())
        })
        .collect();
    let mut channels: Vec<u16> = configs.iter().map(|c| c.channels()).collect();

    rates.sort_unstable();
    channels.sort_unstable();
    channels.dedup();
    (rates, channels)
}

/// Look a device up by id
pub fn get_device_by_id(id: &str) -> Result<AudioDevice, AudioError> {
    let host = cpal::default_host();
    let (direction, name) = parse_id(id, Direction::Input);

    let devices: Vec<cpal::Device> = match direction {
        Direction::Input => host.input_devices().map(|d| d.collect()),
        Direction::Output => host.output_devices().map(|d| d.collect()),
    }
    .map_err(|e| AudioError::CpalError(e.to_string()))?;

    devices
        .into_iter()
        .find(|device| device.name().map(|n| n == name).unwrap_or(false))
        .map(AudioDevice::from_cpal)
        .ok_or_else(|| AudioError::DeviceNotFound(id.to_string()))
}

/// The configured input device, or the host default
pub fn resolve_input(id: Option<&str>) -> Result<AudioDevice, AudioError> {
    match id {
        Some(id) => get_device_by_id(id),
        None => cpal::default_host()
            .default_input_device()
            .map(AudioDevice::from_cpal)
            .ok_or_else(|| AudioError::DeviceNotFound("No default input device".to_string())),
    }
}

/// The configured output device, or the host default
pub fn resolve_output(id: Option<&str>) -> Result<AudioDevice, AudioError> {
    match id {
        Some(id) => {
            let (_, name) = parse_id(id, Direction::Output);
            get_device_by_id(&format!("{}{}", Direction::Output.prefix(), name))
        }
        None => cpal::default_host()
            .default_output_device()
            .map(AudioDevice::from_cpal)
            .ok_or_else(|| AudioError::DeviceNotFound("No default output device".to_string())),
    }
}
