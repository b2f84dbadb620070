//! ALSA backend adapter (`Bx`, Linux).
//!
//! Enumeration lists PCM device names via [`alsa::device_name::HintIter`]; each opened
//! direction gets its own [`alsa::pcm::PCM`] handle opened in blocking mode, matching
//! the synchronous `read`/`write` contract of [`BackendStream`]. Capability probing
//! opens each device read-only against [`alsa::pcm::HwParams::any`] to read its
//! channel and rate ranges without touching the driver's current configuration.

use std::ffi::CString;

use alsa::pcm::{Access, Format as AlsaFormat, HwParams, PCM};
use alsa::Direction as AlsaDirection;

use super::{Backend, BackendStream, CallbackStatus, DirectionRequest, NegotiatedDirection, OpenSpec, Opened};
use crate::device::{DeviceInfo, DeviceRegistry, SampleRates, PROBE_RATES};
use crate::error::{Error, ErrorKind};
use crate::format::{SampleFormat, SampleFormatFlags};
use crate::options::BackendTag;

fn map_err(err: alsa::Error) -> Error {
    Error::new(ErrorKind::DriverError, err.to_string())
}

fn to_alsa_format(format: SampleFormat) -> AlsaFormat {
    match format {
        SampleFormat::I8 => AlsaFormat::S8,
        SampleFormat::I16 => AlsaFormat::s16(),
        SampleFormat::I24 => AlsaFormat::s24(),
        SampleFormat::I32 => AlsaFormat::s32(),
        SampleFormat::F32 => AlsaFormat::float(),
        SampleFormat::F64 => AlsaFormat::float64(),
    }
}

fn probe_formats(hwp: &HwParams) -> SampleFormatFlags {
    let mut flags = SampleFormatFlags::empty();
    for (format, flag) in [
        (AlsaFormat::S8, SampleFormatFlags::I8),
        (AlsaFormat::s16(), SampleFormatFlags::I16),
        (AlsaFormat::s24(), SampleFormatFlags::I24),
        (AlsaFormat::s32(), SampleFormatFlags::I32),
        (AlsaFormat::float(), SampleFormatFlags::F32),
        (AlsaFormat::float64(), SampleFormatFlags::F64),
    ] {
        if hwp.test_format(format).is_ok() {
            flags |= flag;
        }
    }
    flags
}

fn probe_rates(hwp: &HwParams) -> Vec<u32> {
    PROBE_RATES.iter().copied().filter(|r| hwp.test_rate(*r).is_ok()).collect()
}

/// The ALSA backend factory.
pub struct AlsaBackend {
    device_names: Vec<String>,
}

impl AlsaBackend {
    /// Lists PCM device hints (`aplay -L`'s underlying API), falling back to `"default"`
    /// if the hint iterator itself is unavailable.
    pub fn new() -> Result<Self, Error> {
        let mut names = Vec::new();
        let pcm = CString::new("pcm").unwrap();
        match alsa::device_name::HintIter::new(None, &pcm) {
            Ok(hints) => {
                for hint in hints {
                    if let Some(name) = hint.name {
                        if name != "null" {
                            names.push(name);
                        }
                    }
                }
            }
            Err(err) => return Err(map_err(err)),
        }
        if names.is_empty() {
            names.push("default".to_string());
        }
        Ok(AlsaBackend { device_names: names })
    }

    fn direction_caps(name: &str, dir: AlsaDirection) -> (u16, Vec<u32>, SampleFormatFlags) {
        match PCM::new(name, dir, false) {
            Ok(pcm) => match HwParams::any(&pcm) {
                Ok(hwp) => {
                    let channels = hwp.get_channels_max().unwrap_or(0) as u16;
                    (channels, probe_rates(&hwp), probe_formats(&hwp))
                }
                Err(_) => (0, Vec::new(), SampleFormatFlags::empty()),
            },
            Err(_) => (0, Vec::new(), SampleFormatFlags::empty()),
        }
    }

    fn probe(&self, name: &str, is_default: bool) -> DeviceInfo {
        let (max_output, out_rates, out_formats) = Self::direction_caps(name, AlsaDirection::Playback);
        let (max_input, in_rates, in_formats) = Self::direction_caps(name, AlsaDirection::Capture);
        if max_output == 0 && max_input == 0 {
            return DeviceInfo::unprobed(name);
        }
        let mut rates = out_rates;
        rates.extend(in_rates);
        rates.sort_unstable();
        rates.dedup();
        if rates.is_empty() {
            rates = vec![44_100];
        }
        let sample_rates = SampleRates::Discrete(rates);
        DeviceInfo {
            name: name.to_string(),
            probed: true,
            max_output_channels: max_output,
            max_input_channels: max_input,
            max_duplex_channels: max_output.min(max_input),
            preferred_sample_rate: sample_rates.preferred(),
            sample_rates,
            native_formats: out_formats | in_formats,
            is_default_input: is_default && max_input > 0,
            is_default_output: is_default && max_output > 0,
        }
    }

    fn open_direction(&self, name: &str, dir: AlsaDirection, req: &DirectionRequest, rate: u32, user_format: SampleFormat, block_frames: u32) -> Result<(PCM, NegotiatedDirection, u32), Error> {
        let pcm = PCM::new(name, dir, false).map_err(map_err)?;
        let device_format;
        {
            let hwp = HwParams::any(&pcm).map_err(map_err)?;
            device_format = if hwp.test_format(to_alsa_format(user_format)).is_ok() {
                user_format
            } else {
                SampleFormat::NEGOTIATION_ORDER
                    .into_iter()
                    .find(|f| hwp.test_format(to_alsa_format(*f)).is_ok())
                    .ok_or_else(|| Error::new(ErrorKind::InvalidParameter, format!("{name} supports no usable sample format")))?
            };
            hwp.set_access(Access::RWInterleaved).map_err(map_err)?;
            hwp.set_format(to_alsa_format(device_format)).map_err(map_err)?;
            hwp.set_rate(rate, alsa::ValueOr::Nearest).map_err(map_err)?;
            let channels = req.user_channels + req.first_channel;
            hwp.set_channels(channels as u32).map_err(map_err)?;
            if block_frames > 0 {
                hwp.set_period_size_near(block_frames as i64, alsa::ValueOr::Nearest).map_err(map_err)?;
            }
            pcm.hw_params(&hwp).map_err(map_err)?;
        }
        let negotiated_frames = pcm
            .hw_params_current()
            .and_then(|hwp| hwp.get_period_size())
            .unwrap_or(block_frames as i64) as u32;
        let negotiated = NegotiatedDirection {
            device_format,
            device_channels: req.user_channels + req.first_channel,
            device_interleaved: true,
            foreign_endian: false,
        };
        Ok((pcm, negotiated, negotiated_frames))
    }
}

impl Backend for AlsaBackend {
    fn tag(&self) -> BackendTag {
        BackendTag::Alsa
    }

    fn enumerate(&self) -> Result<DeviceRegistry, Error> {
        let mut registry = DeviceRegistry::new();
        let devices: Vec<DeviceInfo> = self
            .device_names
            .iter()
            .map(|name| self.probe(name, name == "default"))
            .collect();
        registry.replace(devices);
        Ok(registry)
    }

    fn open(&self, spec: &OpenSpec) -> Result<Opened, Error> {
        let name = self.device_names.first().map(String::as_str).unwrap_or("default");
        let mut block_frames = spec.block_frames;

        let output = spec
            .output
            .as_ref()
            .map(|req| self.open_direction(name, AlsaDirection::Playback, req, spec.sample_rate, spec.user_format, block_frames))
            .transpose()?;
        let input = spec
            .input
            .as_ref()
            .map(|req| self.open_direction(name, AlsaDirection::Capture, req, spec.sample_rate, spec.user_format, block_frames))
            .transpose()?;

        if let Some((_, _, frames)) = output.as_ref() {
            block_frames = *frames;
        } else if let Some((_, _, frames)) = input.as_ref() {
            block_frames = *frames;
        }

        Ok(Opened {
            block_frames,
            input: input.as_ref().map(|(_, neg, _)| *neg),
            output: output.as_ref().map(|(_, neg, _)| *neg),
            stream: Box::new(AlsaStream {
                playback: output.map(|(pcm, _, _)| pcm),
                capture: input.map(|(pcm, _, _)| pcm),
            }),
        })
    }
}

struct AlsaStream {
    playback: Option<PCM>,
    capture: Option<PCM>,
}

impl BackendStream for AlsaStream {
    fn start(&mut self) -> Result<(), Error> {
        if let Some(pcm) = &self.capture {
            pcm.start().map_err(map_err)?;
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), Error> {
        if let Some(pcm) = &self.playback {
            pcm.drain().map_err(map_err)?;
        }
        if let Some(pcm) = &self.capture {
            pcm.drop().map_err(map_err)?;
        }
        Ok(())
    }

    fn abort(&mut self) -> Result<(), Error> {
        if let Some(pcm) = &self.playback {
            pcm.drop().map_err(map_err)?;
        }
        if let Some(pcm) = &self.capture {
            pcm.drop().map_err(map_err)?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), Error> {
        self.playback = None;
        self.capture = None;
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> Result<CallbackStatus, Error> {
        let pcm = self.playback.as_ref().ok_or_else(|| Error::new(ErrorKind::InvalidUse, "no playback direction"))?;
        let io = pcm.io_bytes();
        match io.writei(buf) {
            Ok(_) => Ok(CallbackStatus::empty()),
            Err(err) => {
                // `writei` failing (typically `EPIPE`) means the device ran dry since
                // the previous write; `try_recover` re-prepares the PCM so the next
                // write succeeds.
                pcm.try_recover(err, false).map_err(map_err)?;
                Ok(CallbackStatus::OUTPUT_UNDERFLOW)
            }
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<CallbackStatus, Error> {
        let pcm = self.capture.as_ref().ok_or_else(|| Error::new(ErrorKind::InvalidUse, "no capture direction"))?;
        let io = pcm.io_bytes();
        match io.readi(buf) {
            Ok(_) => Ok(CallbackStatus::empty()),
            Err(err) => {
                pcm.try_recover(err, false).map_err(map_err)?;
                Ok(CallbackStatus::INPUT_OVERFLOW)
            }
        }
    }

    fn ready(&self) -> u32 {
        self.playback
            .as_ref()
            .and_then(|pcm| pcm.avail_update().ok())
            .unwrap_or(0) as u32
    }
}
