//! Device enumeration and capability probing (component C2).

use crate::error::{Error, ErrorKind};
use crate::format::SampleFormatFlags;

/// The fixed list of rates probed during device capability discovery
/// (`spec.md` §4.2, step 5).
pub const PROBE_RATES: [u32; 14] = [
    4000, 5512, 8000, 9600, 11025, 16000, 22050, 32000, 44100, 48000, 88200, 96000, 176400,
    192000,
];

/// The set of sample rates a device supports.
#[derive(Clone, Debug, PartialEq)]
pub enum SampleRates {
    /// A set of individually supported discrete rates.
    Discrete(Vec<u32>),
    /// A continuous range `[min, max]`.
    Range(u32, u32),
}

impl SampleRates {
    /// Whether `rate` is usable, either because it is one of the discrete rates or
    /// falls within the continuous range.
    pub fn supports(&self, rate: u32) -> bool {
        match self {
            SampleRates::Discrete(rates) => rates.contains(&rate),
            SampleRates::Range(min, max) => rate >= *min && rate <= *max,
        }
    }

    /// The preferred rate: the largest rate `<= 48000`, falling back to the largest
    /// rate overall if none is `<= 48000` (`spec.md` §4.2 step 5).
    pub fn preferred(&self) -> u32 {
        match self {
            SampleRates::Discrete(rates) => {
                let mut sorted = rates.clone();
                sorted.sort_unstable();
                sorted
                    .iter()
                    .rev()
                    .find(|&&r| r <= 48_000)
                    .copied()
                    .or_else(|| sorted.last().copied())
                    .unwrap_or(48_000)
            }
            SampleRates::Range(min, max) => {
                if *max <= 48_000 {
                    *max
                } else if *min > 48_000 {
                    *min
                } else {
                    48_000
                }
            }
        }
    }
}

/// Capability and identity information about a single device, as captured during one
/// enumeration pass (`spec.md` §3, "Device descriptor").
///
/// Descriptors are immutable once constructed and are invalidated by the next
/// enumeration: indices are only stable within a single enumeration pass.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceInfo {
    /// Stable, human-readable name.
    pub name: String,
    /// `true` only if capability probing succeeded for this device.
    pub probed: bool,
    /// Maximum channels usable for output.
    pub max_output_channels: u16,
    /// Maximum channels usable for input.
    pub max_input_channels: u16,
    /// Maximum channels usable for a duplex stream: `min(output, input)`.
    pub max_duplex_channels: u16,
    /// Supported sample rates.
    pub sample_rates: SampleRates,
    /// Bit mask of natively supported sample formats.
    pub native_formats: SampleFormatFlags,
    /// The preferred sample rate (largest probed rate `<= 48000`, else the largest
    /// probed rate).
    pub preferred_sample_rate: u32,
    /// Whether the backend declares this its default input device.
    pub is_default_input: bool,
    /// Whether the backend declares this its default output device.
    pub is_default_output: bool,
}

impl DeviceInfo {
    /// Builds an "unprobed" descriptor: the name is known, but a probing failure means
    /// no capability fields can be trusted. Per `spec.md` §7, this is never an `Err` —
    /// device probing failures are always a [`crate::error::ErrorKind::Warning`].
    pub fn unprobed(name: impl Into<String>) -> Self {
        DeviceInfo {
            name: name.into(),
            probed: false,
            max_output_channels: 0,
            max_input_channels: 0,
            max_duplex_channels: 0,
            sample_rates: SampleRates::Discrete(Vec::new()),
            native_formats: SampleFormatFlags::empty(),
            preferred_sample_rate: 0,
            is_default_input: false,
            is_default_output: false,
        }
    }
}

/// A snapshot of the devices visible for one backend, produced by a single enumeration
/// pass. The registry is read-only after enumeration; re-enumerating atomically
/// replaces the whole snapshot rather than mutating it in place (`spec.md` §5,
/// "Shared-resource policy").
#[derive(Clone, Debug, Default)]
pub struct DeviceRegistry {
    devices: Vec<DeviceInfo>,
    /// Descriptors captured at the moment a device was opened by some other stream in
    /// this process; probing a busy device is not permitted, so `info` returns this
    /// cached snapshot instead (`spec.md` §4.2).
    busy_cache: std::collections::HashMap<usize, DeviceInfo>,
}

impl DeviceRegistry {
    /// An empty registry (no devices enumerated yet).
    pub fn new() -> Self {
        DeviceRegistry::default()
    }

    /// Replaces the registry's contents with a freshly enumerated device list.
    /// Existing indices become invalid; callers must not retain them across a call to
    /// this method.
    pub fn replace(&mut self, devices: Vec<DeviceInfo>) {
        self.devices = devices;
        self.busy_cache.clear();
    }

    /// Marks device `index` busy, caching its current descriptor so future `info`
    /// calls return the cached snapshot rather than attempting to re-probe a device
    /// that is exclusively open.
    pub fn mark_busy(&mut self, index: usize) {
        if let Some(info) = self.devices.get(index) {
            self.busy_cache.insert(index, info.clone());
        }
    }

    /// Clears a device's busy marker, restoring normal probing for it.
    pub fn mark_free(&mut self, index: usize) {
        self.busy_cache.remove(&index);
    }

    /// Number of currently visible devices.
    pub fn count(&self) -> usize {
        self.devices.len()
    }

    /// The descriptor for `index`: the cached snapshot if the device is busy, otherwise
    /// the live descriptor from the last enumeration pass.
    pub fn info(&self, index: usize) -> Result<DeviceInfo, Error> {
        if let Some(cached) = self.busy_cache.get(&index) {
            return Ok(cached.clone());
        }
        self.devices
            .get(index)
            .cloned()
            .ok_or_else(|| Error::new(ErrorKind::InvalidDevice, format!("no device at index {index}")))
    }

    /// All currently visible descriptors paired with their index.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &DeviceInfo)> {
        self.devices.iter().enumerate()
    }

    /// Index of the backend-declared default input device, falling back to the first
    /// probed device with non-zero input channels.
    pub fn default_input(&self) -> Result<usize, Error> {
        self.devices
            .iter()
            .position(|d| d.is_default_input)
            .or_else(|| {
                self.devices
                    .iter()
                    .position(|d| d.probed && d.max_input_channels > 0)
            })
            .ok_or_else(|| Error::new(ErrorKind::NoDevicesFound, "no input device available"))
    }

    /// Index of the backend-declared default output device, falling back to the first
    /// probed device with non-zero output channels.
    pub fn default_output(&self) -> Result<usize, Error> {
        self.devices
            .iter()
            .position(|d| d.is_default_output)
            .or_else(|| {
                self.devices
                    .iter()
                    .position(|d| d.probed && d.max_output_channels > 0)
            })
            .ok_or_else(|| Error::new(ErrorKind::NoDevicesFound, "no output device available"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dev(name: &str, out: u16, input: u16, rates: &[u32], default_in: bool, default_out: bool) -> DeviceInfo {
        DeviceInfo {
            name: name.to_string(),
            probed: true,
            max_output_channels: out,
            max_input_channels: input,
            max_duplex_channels: out.min(input),
            sample_rates: SampleRates::Discrete(rates.to_vec()),
            native_formats: SampleFormatFlags::I16 | SampleFormatFlags::F32,
            preferred_sample_rate: SampleRates::Discrete(rates.to_vec()).preferred(),
            is_default_input: default_in,
            is_default_output: default_out,
        }
    }

    #[test]
    fn e1_enumerate_only_scenario() {
        let mut registry = DeviceRegistry::new();
        registry.replace(vec![
            dev("dev-A", 2, 0, &[44100, 48000], false, true),
            dev("dev-B", 0, 1, &[16000, 44100], true, false),
        ]);

        assert_eq!(registry.count(), 2);
        assert_eq!(registry.info(0).unwrap().preferred_sample_rate, 48_000);
        assert_eq!(registry.info(1).unwrap().preferred_sample_rate, 44_100);
        assert_eq!(registry.default_output().unwrap(), 0);
        assert_eq!(registry.default_input().unwrap(), 1);
    }

    #[test]
    fn preferred_rate_falls_back_to_largest_when_all_above_48k() {
        let rates = SampleRates::Discrete(vec![88_200, 96_000]);
        assert_eq!(rates.preferred(), 96_000);
    }

    #[test]
    fn busy_device_returns_cached_descriptor() {
        let mut registry = DeviceRegistry::new();
        registry.replace(vec![dev("dev-A", 2, 0, &[44100], false, true)]);
        registry.mark_busy(0);
        let cached = registry.info(0).unwrap();
        assert_eq!(cached.name, "dev-A");
    }

    #[test]
    fn unknown_index_is_invalid_device() {
        let registry = DeviceRegistry::new();
        let err = registry.info(3).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidDevice);
    }
}
