//! The `dummy` backend: a fully in-memory [`Backend`]/[`BackendStream`] implementation.
//!
//! `dummy` exists so the core engine (C1–C7) can be exercised end-to-end without any
//! real audio hardware — exactly the role the teacher's own test suite would need a
//! real PortAudio device for. Capture produces a deterministic per-channel ramp (so
//! tests can distinguish channels and frames); playback records every written block so
//! tests can assert on exactly what the conversion pipeline produced.

use std::sync::{Arc, Mutex};

use super::{Backend, BackendStream, CallbackStatus, DirectionRequest, NegotiatedDirection, OpenSpec, Opened};
use crate::device::{DeviceInfo, DeviceRegistry, SampleRates};
use crate::error::{Error, ErrorKind};
use crate::format::{SampleFormat, SampleFormatFlags};
use crate::options::BackendTag;

/// Static description of one simulated device.
#[derive(Clone, Debug)]
pub struct DummyDeviceSpec {
    pub name: String,
    pub max_output_channels: u16,
    pub max_input_channels: u16,
    pub rates: Vec<u32>,
    pub formats: SampleFormatFlags,
    pub is_default_input: bool,
    pub is_default_output: bool,
}

impl DummyDeviceSpec {
    fn into_info(self) -> DeviceInfo {
        let rates = SampleRates::Discrete(self.rates);
        DeviceInfo {
            name: self.name,
            probed: true,
            max_output_channels: self.max_output_channels,
            max_input_channels: self.max_input_channels,
            max_duplex_channels: self.max_output_channels.min(self.max_input_channels),
            preferred_sample_rate: rates.preferred(),
            sample_rates: rates,
            native_formats: self.formats,
            is_default_input: self.is_default_input,
            is_default_output: self.is_default_output,
        }
    }
}

/// The `dummy` backend factory.
pub struct DummyBackend {
    devices: Vec<DummyDeviceSpec>,
}

impl Default for DummyBackend {
    /// The two devices used throughout `spec.md` §8's end-to-end scenarios: `dev-A`
    /// (2-out, rates `{44100, 48000}`, formats `{s16, f32}`, default output) and
    /// `dev-B` (1-in, rates `{16000, 44100}`, formats `{s16}`, default input).
    fn default() -> Self {
        DummyBackend {
            devices: vec![
                DummyDeviceSpec {
                    name: "dev-A".to_string(),
                    max_output_channels: 2,
                    max_input_channels: 0,
                    rates: vec![44_100, 48_000],
                    formats: SampleFormatFlags::I16 | SampleFormatFlags::F32,
                    is_default_input: false,
                    is_default_output: true,
                },
                DummyDeviceSpec {
                    name: "dev-B".to_string(),
                    max_output_channels: 0,
                    max_input_channels: 1,
                    rates: vec![16_000, 44_100],
                    formats: SampleFormatFlags::I16,
                    is_default_input: true,
                    is_default_output: false,
                },
            ],
        }
    }
}

impl DummyBackend {
    /// A backend with a custom device list, for tests that need different topologies.
    pub fn with_devices(devices: Vec<DummyDeviceSpec>) -> Self {
        DummyBackend { devices }
    }

    fn device(&self, index: usize) -> Result<&DummyDeviceSpec, Error> {
        self.devices
            .get(index)
            .ok_or_else(|| Error::new(ErrorKind::InvalidDevice, format!("no dummy device at {index}")))
    }

    fn negotiate_direction(
        &self,
        req: &DirectionRequest,
        user_format: SampleFormat,
        rate: u32,
        is_output: bool,
    ) -> Result<NegotiatedDirection, Error> {
        let device = self.device(req.device_index)?;
        if !device.rates.contains(&rate) {
            return Err(Error::new(
                ErrorKind::InvalidParameter,
                format!("{} does not support rate {rate}", device.name),
            ));
        }
        let device_format = if device.formats.contains(user_format.flag()) {
            user_format
        } else {
            SampleFormat::NEGOTIATION_ORDER
                .into_iter()
                .find(|f| device.formats.contains(f.flag()))
                .ok_or_else(|| {
                    Error::new(
                        ErrorKind::InvalidParameter,
                        format!("{} supports no compatible sample format", device.name),
                    )
                })?
        };
        let available = if is_output {
            device.max_output_channels
        } else {
            device.max_input_channels
        };
        let needed = req.user_channels + req.first_channel;
        if available < needed {
            return Err(Error::new(
                ErrorKind::InvalidParameter,
                format!("{} cannot provide {needed} channels", device.name),
            ));
        }
        Ok(NegotiatedDirection {
            device_format,
            device_channels: needed.max(req.user_channels),
            device_interleaved: true,
            foreign_endian: false,
        })
    }

    /// Concrete (non-trait-object) open, used directly by tests that need to introspect
    /// recorded output via [`DummyStream::written`].
    pub fn open_dummy(&self, spec: &OpenSpec) -> Result<(Opened, Arc<Mutex<Vec<u8>>>), Error> {
        let input = spec
            .input
            .as_ref()
            .map(|r| self.negotiate_direction(r, spec.user_format, spec.sample_rate, false))
            .transpose()?;
        let output = spec
            .output
            .as_ref()
            .map(|r| self.negotiate_direction(r, spec.user_format, spec.sample_rate, true))
            .transpose()?;

        let block_frames = if spec.block_frames == 0 { 256 } else { spec.block_frames };

        let written = Arc::new(Mutex::new(Vec::new()));
        let stream = DummyStream {
            input,
            output,
            block_frames,
            capture_frame: 0,
            running: false,
            written: written.clone(),
        };
        Ok((
            Opened {
                block_frames,
                input,
                output,
                stream: Box::new(stream),
            },
            written,
        ))
    }
}

impl Backend for DummyBackend {
    fn tag(&self) -> BackendTag {
        BackendTag::Dummy
    }

    fn enumerate(&self) -> Result<DeviceRegistry, Error> {
        let mut registry = DeviceRegistry::new();
        registry.replace(self.devices.iter().cloned().map(DummyDeviceSpec::into_info).collect());
        Ok(registry)
    }

    fn open(&self, spec: &OpenSpec) -> Result<Opened, Error> {
        self.open_dummy(spec).map(|(opened, _written)| opened)
    }
}

/// The opened, in-memory native stream.
pub struct DummyStream {
    input: Option<NegotiatedDirection>,
    output: Option<NegotiatedDirection>,
    block_frames: u32,
    capture_frame: u64,
    running: bool,
    written: Arc<Mutex<Vec<u8>>>,
}

impl DummyStream {
    /// Every byte ever written via [`BackendStream::write`], in order. Used by tests to
    /// assert on the conversion pipeline's output.
    pub fn written(&self) -> Vec<u8> {
        self.written.lock().unwrap().clone()
    }
}

impl BackendStream for DummyStream {
    fn start(&mut self) -> Result<(), Error> {
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), Error> {
        self.running = false;
        Ok(())
    }

    fn abort(&mut self) -> Result<(), Error> {
        self.running = false;
        Ok(())
    }

    fn close(&mut self) -> Result<(), Error> {
        self.running = false;
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> Result<CallbackStatus, Error> {
        self.written.lock().unwrap().extend_from_slice(buf);
        Ok(CallbackStatus::empty())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<CallbackStatus, Error> {
        let Some(dir) = self.input else {
            return Err(Error::new(ErrorKind::InvalidUse, "dummy stream has no input direction"));
        };
        let width = dir.device_format.bytes_per_sample();
        let channels = dir.device_channels as usize;
        let frame_count = buf.len() / (width * channels);
        for f in 0..frame_count {
            let frame_index = self.capture_frame + f as u64;
            for c in 0..channels {
                let value = ramp_sample(frame_index, c);
                let off = (f * channels + c) * width;
                encode_sample(&mut buf[off..off + width], dir.device_format, value);
            }
        }
        self.capture_frame += frame_count as u64;
        Ok(CallbackStatus::empty())
    }

    fn ready(&self) -> u32 {
        if self.running {
            self.block_frames
        } else {
            0
        }
    }
}

/// A deterministic per-channel ramp value in `[-1.0, 1.0]`.
fn ramp_sample(frame_index: u64, channel: usize) -> f64 {
    ((frame_index as f64 * (0.01 + channel as f64 * 0.001)) % 1.0) * 2.0 - 1.0
}

/// Encodes a logical `[-1.0, 1.0]` sample value into `format`'s on-the-wire byte layout.
fn encode_sample(buf: &mut [u8], format: SampleFormat, value: f64) {
    match format {
        SampleFormat::I8 => buf[0] = (value * 127.0).trunc() as i8 as u8,
        SampleFormat::I16 => buf[..2].copy_from_slice(&((value * 32_767.0).trunc() as i16).to_ne_bytes()),
        SampleFormat::I24 => {
            let raw = (value * 2_147_483_648.0).trunc() as i32 & 0xFFFF_FF00u32 as i32;
            buf[..4].copy_from_slice(&raw.to_ne_bytes());
        }
        SampleFormat::I32 => {
            buf[..4].copy_from_slice(&((value * 2_147_483_648.0).trunc() as i32).to_ne_bytes())
        }
        SampleFormat::F32 => buf[..4].copy_from_slice(&(value as f32).to_ne_bytes()),
        SampleFormat::F64 => buf[..8].copy_from_slice(&value.to_ne_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DirectionRequest;
    use crate::options::StreamOptions;

    #[test]
    fn enumerate_matches_e1_scenario() {
        let backend = DummyBackend::default();
        let registry = backend.enumerate().unwrap();
        assert_eq!(registry.count(), 2);
        assert_eq!(registry.info(0).unwrap().preferred_sample_rate, 48_000);
        assert_eq!(registry.info(1).unwrap().preferred_sample_rate, 44_100);
        assert_eq!(registry.default_output().unwrap(), 0);
        assert_eq!(registry.default_input().unwrap(), 1);
    }

    #[test]
    fn open_output_only_negotiates_requested_format() {
        let backend = DummyBackend::default();
        let spec = OpenSpec {
            input: None,
            output: Some(DirectionRequest {
                device_index: 0,
                user_channels: 2,
                first_channel: 0,
            }),
            sample_rate: 44_100,
            user_format: SampleFormat::F32,
            block_frames: 256,
            options: StreamOptions::default(),
        };
        let (opened, _written) = backend.open_dummy(&spec).unwrap();
        assert_eq!(opened.block_frames, 256);
        assert_eq!(opened.output.unwrap().device_format, SampleFormat::F32);
    }

    #[test]
    fn write_records_bytes_in_order() {
        let backend = DummyBackend::default();
        let spec = OpenSpec {
            input: None,
            output: Some(DirectionRequest {
                device_index: 0,
                user_channels: 2,
                first_channel: 0,
            }),
            sample_rate: 44_100,
            user_format: SampleFormat::F32,
            block_frames: 4,
            options: StreamOptions::default(),
        };
        let (mut opened, written) = backend.open_dummy(&spec).unwrap();
        opened.stream.start().unwrap();
        opened.stream.write(&[1, 2, 3, 4]).unwrap();
        opened.stream.write(&[5, 6]).unwrap();
        assert_eq!(written.lock().unwrap().clone(), vec![1, 2, 3, 4, 5, 6]);
    }
}
