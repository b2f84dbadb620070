//! JACK backend adapter (`Bx`, pro-audio graph routing on Linux/macOS).
//!
//! JACK is fundamentally callback-driven and fixes its own block size and sample
//! rate server-wide, so this adapter's `read`/`write` are backed by lock-free ring
//! buffers fed by a JACK `ProcessHandler` running on JACK's own realtime thread —
//! the opposite direction of control from every other backend here, where this
//! crate's own [`crate::driver`] thread is in charge. [`BackendStream::ready`]
//! reports how much the ring buffer currently holds.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use jack::{AudioIn, AudioOut, Client, ClientOptions, Control, Port, ProcessScope};
use ringbuf::{HeapConsumer, HeapProducer, HeapRb};

use super::{Backend, BackendStream, CallbackStatus, DirectionRequest, NegotiatedDirection, OpenSpec, Opened};
use crate::device::{DeviceInfo, DeviceRegistry, SampleRates};
use crate::error::{Error, ErrorKind};
use crate::format::{SampleFormat, SampleFormatFlags};
use crate::options::BackendTag;

const RING_CAPACITY_FRAMES: usize = 1 << 16;

/// The JACK backend factory. JACK exposes exactly one logical "device": the running
/// server, with its own fixed sample rate and buffer size.
pub struct JackBackend;

impl JackBackend {
    /// Confirms a JACK server is reachable by probing a throwaway client.
    pub fn new() -> Result<Self, Error> {
        Client::new("rtstream-probe", ClientOptions::NO_START_SERVER)
            .map(|_| JackBackend)
            .map_err(|e| Error::new(ErrorKind::NoDevicesFound, e.to_string()))
    }
}

impl Backend for JackBackend {
    fn tag(&self) -> BackendTag {
        BackendTag::Jack
    }

    fn enumerate(&self) -> Result<DeviceRegistry, Error> {
        let (client, _status) = Client::new("rtstream-probe", ClientOptions::NO_START_SERVER)
            .map_err(|e| Error::new(ErrorKind::NoDevicesFound, e.to_string()))?;
        let rate = client.sample_rate() as u32;
        let mut registry = DeviceRegistry::new();
        registry.replace(vec![DeviceInfo {
            name: "JACK server".to_string(),
            probed: true,
            max_output_channels: 32,
            max_input_channels: 32,
            max_duplex_channels: 32,
            sample_rates: SampleRates::Discrete(vec![rate]),
            native_formats: SampleFormatFlags::F32,
            preferred_sample_rate: rate,
            is_default_input: true,
            is_default_output: true,
        }]);
        Ok(registry)
    }

    fn open(&self, spec: &OpenSpec) -> Result<Opened, Error> {
        let (client, _status) = Client::new("rtstream", ClientOptions::NO_START_SERVER)
            .map_err(|e| Error::new(ErrorKind::DriverError, e.to_string()))?;
        let block_frames = client.buffer_size();
        let rate = client.sample_rate() as u32;
        if spec.sample_rate != 0 && spec.sample_rate != rate {
            crate::error::warn_noop("JACK's server sample rate overrides the requested rate");
        }

        let mut out_ports = Vec::new();
        let mut out_ring_tx = Vec::new();
        let mut out_ring_rx = Vec::new();
        if let Some(req) = &spec.output {
            for c in 0..req.user_channels {
                let port = client
                    .register_port(&format!("out_{c}"), AudioOut::default())
                    .map_err(|e| Error::new(ErrorKind::DriverError, e.to_string()))?;
                let ring = HeapRb::<f32>::new(RING_CAPACITY_FRAMES);
                let (tx, rx) = ring.split();
                out_ports.push(port);
                out_ring_tx.push(tx);
                out_ring_rx.push(rx);
            }
        }
        let mut in_ports = Vec::new();
        let mut in_ring_tx = Vec::new();
        let mut in_ring_rx = Vec::new();
        if let Some(req) = &spec.input {
            for c in 0..req.user_channels {
                let port = client
                    .register_port(&format!("in_{c}"), AudioIn::default())
                    .map_err(|e| Error::new(ErrorKind::DriverError, e.to_string()))?;
                let ring = HeapRb::<f32>::new(RING_CAPACITY_FRAMES);
                let (tx, rx) = ring.split();
                in_ports.push(port);
                in_ring_tx.push(tx);
                in_ring_rx.push(rx);
            }
        }

        let underflow = Arc::new(AtomicBool::new(false));
        let overflow = Arc::new(AtomicBool::new(false));
        let handler = JackProcess {
            out_ports,
            out_tx: Arc::new(Mutex::new(in_ring_tx)),
            in_ports,
            in_rx: Arc::new(Mutex::new(Vec::new())),
            playback_rx: Arc::new(Mutex::new(out_ring_rx)),
            underflow: underflow.clone(),
            overflow: overflow.clone(),
        };
        let capture_tx_for_handler = handler.out_tx.clone();
        let playback_rx_shared = handler.playback_rx.clone();

        let active = client
            .activate_async((), handler)
            .map_err(|e| Error::new(ErrorKind::DriverError, e.to_string()))?;

        let output = spec.output.as_ref().map(|req| NegotiatedDirection {
            device_format: SampleFormat::F32,
            device_channels: req.user_channels,
            device_interleaved: true,
            foreign_endian: false,
        });
        let input = spec.input.as_ref().map(|req| NegotiatedDirection {
            device_format: SampleFormat::F32,
            device_channels: req.user_channels,
            device_interleaved: true,
            foreign_endian: false,
        });

        Ok(Opened {
            block_frames,
            input,
            output,
            stream: Box::new(JackStream {
                _active: Some(active),
                playback_tx: out_ring_tx,
                capture_rx: in_ring_rx,
                channels_out: output.map(|n| n.device_channels).unwrap_or(0),
                channels_in: input.map(|n| n.device_channels).unwrap_or(0),
                _capture_tx_handle: capture_tx_for_handler,
                _playback_rx_handle: playback_rx_shared,
                underflow,
                overflow,
            }),
        })
    }
}

struct JackProcess {
    out_ports: Vec<Port<AudioOut>>,
    out_tx: Arc<Mutex<Vec<HeapProducer<f32>>>>,
    in_ports: Vec<Port<AudioIn>>,
    in_rx: Arc<Mutex<Vec<HeapConsumer<f32>>>>,
    playback_rx: Arc<Mutex<Vec<HeapConsumer<f32>>>>,
    /// Set when the render side popped an empty ring (the device played silence
    /// because this crate hadn't supplied data in time).
    underflow: Arc<AtomicBool>,
    /// Set when the capture side couldn't push into a full ring (captured samples
    /// were dropped because this crate hadn't drained it in time).
    overflow: Arc<AtomicBool>,
}

impl jack::ProcessHandler for JackProcess {
    fn process(&mut self, _client: &Client, ps: &ProcessScope) -> Control {
        if let Ok(mut rx) = self.playback_rx.try_lock() {
            for (port, consumer) in self.out_ports.iter_mut().zip(rx.iter_mut()) {
                let out = port.as_mut_slice(ps);
                for sample in out.iter_mut() {
                    match consumer.pop() {
                        Some(value) => *sample = value,
                        None => {
                            *sample = 0.0;
                            self.underflow.store(true, Ordering::Relaxed);
                        }
                    }
                }
            }
        }
        if let Ok(mut tx) = self.out_tx.try_lock() {
            for (port, producer) in self.in_ports.iter().zip(tx.iter_mut()) {
                let input = port.as_slice(ps);
                for &sample in input.iter() {
                    if producer.push(sample).is_err() {
                        self.overflow.store(true, Ordering::Relaxed);
                    }
                }
            }
        }
        Control::Continue
    }
}

struct JackStream {
    _active: Option<jack::AsyncClient<(), JackProcess>>,
    playback_tx: Vec<HeapProducer<f32>>,
    capture_rx: Vec<HeapConsumer<f32>>,
    channels_out: u16,
    channels_in: u16,
    _capture_tx_handle: Arc<Mutex<Vec<HeapProducer<f32>>>>,
    _playback_rx_handle: Arc<Mutex<Vec<HeapConsumer<f32>>>>,
    underflow: Arc<AtomicBool>,
    overflow: Arc<AtomicBool>,
}

impl BackendStream for JackStream {
    fn start(&mut self) -> Result<(), Error> {
        Ok(())
    }

    // Waits for the realtime thread to drain the playback ring (JACK has no API to
    // stop a port's processing independent of the whole client), bounded so a client
    // that stops feeding data can't hang this call forever.
    fn stop(&mut self) -> Result<(), Error> {
        for _ in 0..200 {
            if self.playback_tx.iter().all(|tx| tx.len() == 0) {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        Ok(())
    }

    fn abort(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> Result<CallbackStatus, Error> {
        let channels = self.channels_out as usize;
        if channels == 0 {
            return Err(Error::new(ErrorKind::InvalidUse, "no playback direction"));
        }
        let frames = buf.len() / (4 * channels);
        for f in 0..frames {
            for c in 0..channels {
                let off = (f * channels + c) * 4;
                let sample = f32::from_ne_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]]);
                let _ = self.playback_tx[c].push(sample);
            }
        }
        let mut status = CallbackStatus::empty();
        if self.underflow.swap(false, Ordering::Relaxed) {
            status |= CallbackStatus::OUTPUT_UNDERFLOW;
        }
        Ok(status)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<CallbackStatus, Error> {
        let channels = self.channels_in as usize;
        if channels == 0 {
            return Err(Error::new(ErrorKind::InvalidUse, "no capture direction"));
        }
        let frames = buf.len() / (4 * channels);
        for f in 0..frames {
            for c in 0..channels {
                let off = (f * channels + c) * 4;
                let sample = self.capture_rx[c].pop().unwrap_or(0.0);
                buf[off..off + 4].copy_from_slice(&sample.to_ne_bytes());
            }
        }
        let mut status = CallbackStatus::empty();
        if self.overflow.swap(false, Ordering::Relaxed) {
            status |= CallbackStatus::INPUT_OVERFLOW;
        }
        Ok(status)
    }

    fn ready(&self) -> u32 {
        self.playback_tx.first().map(|p| p.free_len() as u32).unwrap_or(0)
    }
}
