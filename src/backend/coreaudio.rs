//! Core Audio backend adapter (`Bx`, macOS). Only meaningful when compiled on macOS;
//! the `backend-coreaudio` feature should only be enabled there.
//!
//! Built on `coreaudio-rs`'s `AudioUnit` wrapper around the HAL output/input audio
//! units. Like JACK, Core Audio drives its own realtime thread via a render callback;
//! this adapter bridges that callback to this crate's synchronous `read`/`write`
//! contract with a pair of lock-free ring buffers, the same pattern used for JACK.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use coreaudio::audio_unit::render_callback::{self, data};
use coreaudio::audio_unit::{AudioUnit, Element, IOType, SampleFormat as CaSampleFormat, Scope};
use ringbuf::{HeapConsumer, HeapProducer, HeapRb};

use super::{Backend, BackendStream, CallbackStatus, DirectionRequest, NegotiatedDirection, OpenSpec, Opened};
use crate::device::{DeviceInfo, DeviceRegistry, SampleRates};
use crate::error::{Error, ErrorKind};
use crate::format::{SampleFormat, SampleFormatFlags};
use crate::options::BackendTag;

const RING_CAPACITY_FRAMES: usize = 1 << 16;

/// The Core Audio backend factory. Exposes the default input and output HAL devices;
/// `coreaudio-rs`'s `AudioUnit::new` always opens the system default, so there is
/// exactly one logical device per direction here.
pub struct CoreAudioBackend;

impl CoreAudioBackend {
    /// No handshake is needed to "connect" to Core Audio; this always succeeds on
    /// macOS and is never called on any other platform (the `backend-coreaudio`
    /// feature is only meant to be enabled there).
    pub fn new() -> Result<Self, Error> {
        Ok(CoreAudioBackend)
    }
}

impl Backend for CoreAudioBackend {
    fn tag(&self) -> BackendTag {
        BackendTag::Core
    }

    fn enumerate(&self) -> Result<DeviceRegistry, Error> {
        let mut registry = DeviceRegistry::new();
        registry.replace(vec![DeviceInfo {
            name: "Core Audio default device".to_string(),
            probed: true,
            max_output_channels: 2,
            max_input_channels: 2,
            max_duplex_channels: 2,
            sample_rates: SampleRates::Discrete(vec![44_100, 48_000, 96_000]),
            native_formats: SampleFormatFlags::F32,
            preferred_sample_rate: 48_000,
            is_default_input: true,
            is_default_output: true,
        }]);
        Ok(registry)
    }

    fn open(&self, spec: &OpenSpec) -> Result<Opened, Error> {
        let block_frames = if spec.block_frames == 0 { 512 } else { spec.block_frames };

        let underflow = Arc::new(AtomicBool::new(false));
        let overflow = Arc::new(AtomicBool::new(false));

        let mut output_unit = None;
        let mut output_tx = None;
        let mut output_channels = 0u16;
        if let Some(req) = &spec.output {
            let mut unit = AudioUnit::new(IOType::DefaultOutput).map_err(|e| Error::new(ErrorKind::DriverError, format!("{e:?}")))?;
            unit.set_sample_rate(spec.sample_rate as f64).ok();
            let channels = req.user_channels + req.first_channel;
            let ring = HeapRb::<f32>::new(RING_CAPACITY_FRAMES);
            let (tx, mut rx) = ring.split();
            let underflow_flag = underflow.clone();
            unit.set_render_callback(move |args: render_callback::Args<data::Interleaved<f32>>| {
                for sample in args.data.buffer.iter_mut() {
                    match rx.pop() {
                        Some(value) => *sample = value,
                        None => {
                            *sample = 0.0;
                            underflow_flag.store(true, Ordering::Relaxed);
                        }
                    }
                }
                Ok(())
            })
            .map_err(|e| Error::new(ErrorKind::DriverError, format!("{e:?}")))?;
            unit.start().map_err(|e| Error::new(ErrorKind::DriverError, format!("{e:?}")))?;
            output_unit = Some(unit);
            output_tx = Some(tx);
            output_channels = channels;
        }

        let mut input_unit = None;
        let mut input_rx = None;
        let mut input_channels = 0u16;
        if let Some(req) = &spec.input {
            let mut unit = AudioUnit::new(IOType::DefaultInput).map_err(|e| Error::new(ErrorKind::DriverError, format!("{e:?}")))?;
            unit.set_sample_rate(spec.sample_rate as f64).ok();
            let channels = req.user_channels + req.first_channel;
            let ring = HeapRb::<f32>::new(RING_CAPACITY_FRAMES);
            let (mut tx, rx) = ring.split();
            let overflow_flag = overflow.clone();
            unit.set_input_callback(move |args: render_callback::Args<data::Interleaved<f32>>| {
                for &sample in args.data.buffer.iter() {
                    if tx.push(sample).is_err() {
                        overflow_flag.store(true, Ordering::Relaxed);
                    }
                }
                Ok(())
            })
            .map_err(|e| Error::new(ErrorKind::DriverError, format!("{e:?}")))?;
            unit.start().map_err(|e| Error::new(ErrorKind::DriverError, format!("{e:?}")))?;
            input_unit = Some(unit);
            input_rx = Some(rx);
            input_channels = channels;
        }

        let output = spec.output.as_ref().map(|_| NegotiatedDirection {
            device_format: SampleFormat::F32,
            device_channels: output_channels,
            device_interleaved: true,
            foreign_endian: false,
        });
        let input = spec.input.as_ref().map(|_| NegotiatedDirection {
            device_format: SampleFormat::F32,
            device_channels: input_channels,
            device_interleaved: true,
            foreign_endian: false,
        });

        Ok(Opened {
            block_frames,
            input,
            output,
            stream: Box::new(CoreAudioStream {
                _output_unit: output_unit,
                output_tx,
                output_channels,
                _input_unit: input_unit,
                input_rx: input_rx.map(|rx| Arc::new(Mutex::new(rx))),
                input_channels,
                underflow,
                overflow,
            }),
        })
    }
}

struct CoreAudioStream {
    _output_unit: Option<AudioUnit>,
    output_tx: Option<HeapProducer<f32>>,
    output_channels: u16,
    _input_unit: Option<AudioUnit>,
    input_rx: Option<Arc<Mutex<HeapConsumer<f32>>>>,
    input_channels: u16,
    underflow: Arc<AtomicBool>,
    overflow: Arc<AtomicBool>,
}

impl BackendStream for CoreAudioStream {
    fn start(&mut self) -> Result<(), Error> {
        Ok(())
    }

    // Waits for the render callback to drain the output ring before stopping the
    // audio unit, bounded so a client that stops feeding data can't hang this call.
    fn stop(&mut self) -> Result<(), Error> {
        if let Some(tx) = &self.output_tx {
            for _ in 0..200 {
                if tx.len() == 0 {
                    break;
                }
                std::thread::sleep(std::time::Duration::from_millis(5));
            }
        }
        if let Some(unit) = self._output_unit.as_mut() {
            unit.stop().map_err(|e| Error::new(ErrorKind::DriverError, format!("{e:?}")))?;
        }
        if let Some(unit) = self._input_unit.as_mut() {
            unit.stop().map_err(|e| Error::new(ErrorKind::DriverError, format!("{e:?}")))?;
        }
        Ok(())
    }

    fn abort(&mut self) -> Result<(), Error> {
        if let Some(unit) = self._output_unit.as_mut() {
            unit.stop().map_err(|e| Error::new(ErrorKind::DriverError, format!("{e:?}")))?;
        }
        if let Some(unit) = self._input_unit.as_mut() {
            unit.stop().map_err(|e| Error::new(ErrorKind::DriverError, format!("{e:?}")))?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), Error> {
        self._output_unit = None;
        self._input_unit = None;
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> Result<CallbackStatus, Error> {
        let channels = self.output_channels as usize;
        let tx = self.output_tx.as_mut().ok_or_else(|| Error::new(ErrorKind::InvalidUse, "no playback direction"))?;
        for chunk in buf.chunks_exact(4) {
            let sample = f32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            let _ = tx.push(sample);
        }
        let _ = channels;
        let mut status = CallbackStatus::empty();
        if self.underflow.swap(false, Ordering::Relaxed) {
            status |= CallbackStatus::OUTPUT_UNDERFLOW;
        }
        Ok(status)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<CallbackStatus, Error> {
        let rx = self.input_rx.as_ref().ok_or_else(|| Error::new(ErrorKind::InvalidUse, "no capture direction"))?;
        let mut rx = rx.lock().unwrap();
        for chunk in buf.chunks_exact_mut(4) {
            let sample = rx.pop().unwrap_or(0.0);
            chunk.copy_from_slice(&sample.to_ne_bytes());
        }
        let _ = self.input_channels;
        let mut status = CallbackStatus::empty();
        if self.overflow.swap(false, Ordering::Relaxed) {
            status |= CallbackStatus::INPUT_OVERFLOW;
        }
        Ok(status)
    }

    fn ready(&self) -> u32 {
        self.output_tx.as_ref().map(|tx| tx.free_len() as u32).unwrap_or(0)
    }
}
