//! Stream state, buffer planning, and the public per-stream facade (components C3 and
//! the stream half of C7).
//!
//! A [`Stream`] owns a single opened [`BackendStream`] plus, per active direction, the
//! precomputed [`ConvertPlan`] and the user- and device-facing scratch buffers. All of
//! that lives behind one mutex (`StreamInner`, "the stream mutex" referenced throughout
//! this module and [`crate::driver`]) so that state transitions, buffer access, and
//! native transport calls are always consistent with each other.
//!
//! Streams opened with a callback run their ticks on a dedicated OS thread managed by
//! [`crate::driver`]; streams opened without one are driven synchronously by the
//! caller via [`Stream::write`] and [`Stream::read`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crate::backend::{Backend, BackendStream, CallbackStatus, DirectionRequest, NegotiatedDirection, OpenSpec};
use crate::convert::{byte_swap, ConvertPlan};
use crate::driver;
use crate::error::{Error, ErrorKind};
use crate::format::SampleFormat;
use crate::options::StreamOptions;

/// A stream's lifecycle state (`spec.md` §3, "Stream state machine").
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StreamState {
    /// Native handles released; the stream cannot be restarted.
    Closed,
    /// Prepared (or drained) but not moving audio.
    Stopped,
    /// Actively moving audio.
    Running,
    /// Draining queued output before transitioning to `Stopped`.
    Stopping,
}

/// The outcome a client callback returns at the end of each tick (`spec.md` §4.5).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CallbackAction {
    /// Keep the stream running.
    Continue = 0,
    /// Drain queued output, then stop.
    Complete = 1,
    /// Halt immediately, discarding queued output.
    Abort = 2,
}

/// The buffers and status handed to a client callback for one tick.
pub struct CallbackArgs<'a> {
    /// The output user buffer to fill, if this stream carries an output direction.
    pub output: Option<&'a mut [u8]>,
    /// The captured input user buffer, if this stream carries an input direction.
    pub input: Option<&'a [u8]>,
    /// Number of frames in `output`/`input`.
    pub frames: u32,
    /// Stream time, in seconds, at the start of this block.
    pub stream_time: f64,
    /// xrun flags observed since the previous tick.
    pub status: CallbackStatus,
}

/// A boxed client callback. Invoked from the driver thread; never invoked while the
/// stream mutex is held.
pub type CallbackFn = dyn FnMut(CallbackArgs) -> CallbackAction + Send;

/// One direction's request parameters, paired with the shared stream-level sample rate
/// and user format to open a [`Stream`].
#[derive(Default)]
pub struct StreamRequest {
    /// Input direction, if any.
    pub input: Option<DirectionRequest>,
    /// Output direction, if any.
    pub output: Option<DirectionRequest>,
    /// Sample rate shared by every active direction.
    pub sample_rate: u32,
    /// Sample format used by every user-facing buffer (`spec.md` §3: "a single value,
    /// shared across directions").
    pub user_format: SampleFormat,
    /// Requested block size; `0` lets the backend pick.
    pub block_frames: u32,
    /// Stream options (interleave mode, latency hints, realtime scheduling, ...).
    pub options: StreamOptions,
    /// If present, the stream is opened in callback (non-blocking) mode and a driver
    /// thread is spawned immediately. If absent, the stream is opened in blocking mode
    /// and the caller drives it via [`Stream::write`]/[`Stream::read`].
    pub callback: Option<Box<CallbackFn>>,
}

/// Precomputed conversion plan and scratch buffers for one active direction.
struct DirectionPlan {
    negotiated: NegotiatedDirection,
    device_buffer: Vec<u8>,
    user_buffer: Vec<u8>,
    /// Set for an output direction: converts the user buffer into the device buffer.
    user_to_device: Option<ConvertPlan>,
    /// Set for an input direction: converts the device buffer into the user buffer.
    device_to_user: Option<ConvertPlan>,
}

impl DirectionPlan {
    fn new_output(user_format: SampleFormat, user_channels: u16, interleaved: bool, negotiated: NegotiatedDirection, frames: u32) -> Self {
        let plan = ConvertPlan::new(
            user_format,
            user_channels,
            interleaved,
            negotiated.device_format,
            negotiated.device_channels,
            negotiated.device_interleaved,
        );
        DirectionPlan {
            device_buffer: vec![0u8; negotiated.device_format.bytes_per_frame(negotiated.device_channels) * frames as usize],
            user_buffer: vec![0u8; user_format.bytes_per_frame(user_channels) * frames as usize],
            user_to_device: Some(plan),
            device_to_user: None,
            negotiated,
        }
    }

    fn new_input(user_format: SampleFormat, user_channels: u16, interleaved: bool, negotiated: NegotiatedDirection, frames: u32) -> Self {
        let plan = ConvertPlan::new(
            negotiated.device_format,
            negotiated.device_channels,
            negotiated.device_interleaved,
            user_format,
            user_channels,
            interleaved,
        );
        DirectionPlan {
            device_buffer: vec![0u8; negotiated.device_format.bytes_per_frame(negotiated.device_channels) * frames as usize],
            user_buffer: vec![0u8; user_format.bytes_per_frame(user_channels) * frames as usize],
            user_to_device: None,
            device_to_user: Some(plan),
            negotiated,
        }
    }
}

struct StreamInner {
    state: StreamState,
    backend_stream: Box<dyn BackendStream>,
    input: Option<DirectionPlan>,
    output: Option<DirectionPlan>,
    stream_time: f64,
    last_status: CallbackStatus,
}

/// The shared, `Arc`-owned core of a stream. The public [`Stream`] wraps one of these;
/// the driver thread (callback mode only) holds its own clone so it can keep ticking
/// independent of the `Stream` value's lifetime, and is joined explicitly by
/// [`Stream::close`]/`Drop`.
pub(crate) struct StreamCore {
    inner: Mutex<StreamInner>,
    condvar: Condvar,
    callback: Mutex<Option<Box<CallbackFn>>>,
    driver_handle: Mutex<Option<JoinHandle<()>>>,
    block_frames: u32,
    sample_rate: u32,
    options: StreamOptions,
    engine_slot: Arc<AtomicBool>,
}

/// An opened audio stream (component C3's state machine plus the stream half of the
/// public facade, C7).
pub struct Stream {
    pub(crate) core: Arc<StreamCore>,
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream").finish_non_exhaustive()
    }
}

impl Stream {
    pub(crate) fn open(backend: Arc<dyn Backend>, request: StreamRequest, engine_slot: Arc<AtomicBool>) -> Result<Stream, Error> {
        if request.input.is_none() && request.output.is_none() {
            return Err(Error::new(ErrorKind::InvalidParameter, "a stream needs at least one direction"));
        }
        let spec = OpenSpec {
            input: request.input.clone(),
            output: request.output.clone(),
            sample_rate: request.sample_rate,
            user_format: request.user_format,
            block_frames: request.block_frames,
            options: request.options.clone(),
        };
        let opened = backend.open(&spec)?;
        let frames = opened.block_frames;
        let interleaved = request.options.interleaved();

        let input = match (request.input.as_ref(), opened.input) {
            (Some(req), Some(neg)) => Some(DirectionPlan::new_input(request.user_format, req.user_channels, interleaved, neg, frames)),
            _ => None,
        };
        let output = match (request.output.as_ref(), opened.output) {
            (Some(req), Some(neg)) => Some(DirectionPlan::new_output(request.user_format, req.user_channels, interleaved, neg, frames)),
            _ => None,
        };

        let inner = StreamInner {
            state: StreamState::Stopped,
            backend_stream: opened.stream,
            input,
            output,
            stream_time: 0.0,
            last_status: CallbackStatus::empty(),
        };

        let core = Arc::new(StreamCore {
            inner: Mutex::new(inner),
            condvar: Condvar::new(),
            callback: Mutex::new(request.callback),
            driver_handle: Mutex::new(None),
            block_frames: frames,
            sample_rate: request.sample_rate,
            options: request.options.clone(),
            engine_slot,
        });

        let is_callback_mode = core.callback.lock().unwrap().is_some();
        if is_callback_mode {
            let handle = driver::spawn(core.clone(), request.options.priority, request.options.flags);
            *core.driver_handle.lock().unwrap() = Some(handle);
        }

        Ok(Stream { core })
    }

    /// Whether this stream was opened with a callback (and therefore has a driver
    /// thread) rather than in blocking mode.
    pub fn is_callback_mode(&self) -> bool {
        self.core.driver_handle.lock().unwrap().is_some()
    }

    /// The current lifecycle state.
    pub fn state(&self) -> StreamState {
        self.core.inner.lock().unwrap().state
    }

    /// Stream time, in seconds, elapsed since the stream was started (accumulated
    /// across stop/start cycles, reset only by `close`).
    pub fn stream_time(&self) -> f64 {
        self.core.inner.lock().unwrap().stream_time
    }

    /// Output latency in seconds for the negotiated block size, or `0.0` if this stream
    /// has no output direction.
    pub fn output_latency(&self) -> f64 {
        self.core.block_frames as f64 / self.core.sample_rate.max(1) as f64
    }

    /// Installs (or replaces) the client callback. A no-op warning if this stream has
    /// no driver thread to invoke it.
    pub fn set_callback(&self, callback: Box<CallbackFn>) {
        if !self.is_callback_mode() {
            crate::error::warn_noop("set_callback on a blocking stream has no effect");
        }
        *self.core.callback.lock().unwrap() = Some(callback);
    }

    /// Removes the installed callback, if any.
    pub fn clear_callback(&self) {
        *self.core.callback.lock().unwrap() = None;
    }

    /// Starts (or resumes) the stream. A no-op warning if already `Running`.
    pub fn start(&self) -> Result<(), Error> {
        let mut guard = self.core.inner.lock().unwrap();
        match guard.state {
            StreamState::Closed => Err(Error::new(ErrorKind::InvalidStream, "start on a closed stream")),
            StreamState::Running => {
                crate::error::warn_noop("start on an already-running stream");
                Ok(())
            }
            StreamState::Stopped | StreamState::Stopping => {
                guard.backend_stream.start()?;
                guard.state = StreamState::Running;
                self.core.condvar.notify_all();
                Ok(())
            }
        }
    }

    /// Drains queued output, then halts. In callback mode this hands the drain off to
    /// the driver thread and returns immediately once draining has begun; in blocking
    /// mode it drains synchronously before returning.
    pub fn stop(&self) -> Result<(), Error> {
        let mut guard = self.core.inner.lock().unwrap();
        match guard.state {
            StreamState::Closed => Err(Error::new(ErrorKind::InvalidStream, "stop on a closed stream")),
            StreamState::Stopped => {
                crate::error::warn_noop("stop on an already-stopped stream");
                Ok(())
            }
            StreamState::Stopping => Ok(()),
            StreamState::Running => {
                if self.is_callback_mode() {
                    guard.state = StreamState::Stopping;
                    self.core.condvar.notify_all();
                    Ok(())
                } else {
                    guard.backend_stream.stop()?;
                    guard.state = StreamState::Stopped;
                    Ok(())
                }
            }
        }
    }

    /// Halts immediately, discarding any queued output. A no-op warning if already
    /// `Stopped`.
    pub fn abort(&self) -> Result<(), Error> {
        let mut guard = self.core.inner.lock().unwrap();
        match guard.state {
            StreamState::Closed => Err(Error::new(ErrorKind::InvalidStream, "abort on a closed stream")),
            StreamState::Stopped => {
                crate::error::warn_noop("abort on an already-stopped stream");
                Ok(())
            }
            StreamState::Running | StreamState::Stopping => {
                guard.backend_stream.abort()?;
                guard.state = StreamState::Stopped;
                self.core.condvar.notify_all();
                Ok(())
            }
        }
    }

    /// Releases native handles. Idempotent; joins the driver thread if one was spawned.
    pub fn close(&self) -> Result<(), Error> {
        {
            let mut guard = self.core.inner.lock().unwrap();
            if guard.state == StreamState::Closed {
                return Ok(());
            }
            if guard.state == StreamState::Running || guard.state == StreamState::Stopping {
                guard.backend_stream.abort().ok();
            }
            guard.backend_stream.close()?;
            guard.state = StreamState::Closed;
        }
        self.core.condvar.notify_all();
        if let Some(handle) = self.core.driver_handle.lock().unwrap().take() {
            handle.join().ok();
        }
        self.core.engine_slot.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Writes one block of user-format, user-channel-count, interleaved-per-options
    /// bytes to the output direction. Blocking-mode streams only.
    pub fn write(&self, user_buf: &[u8]) -> Result<(), Error> {
        let mut guard = self.core.inner.lock().unwrap();
        if guard.state != StreamState::Running {
            return Err(Error::new(ErrorKind::InvalidUse, "write requires a running stream"));
        }
        let frames = self.core.block_frames as usize;
        let StreamInner { backend_stream, output, last_status, .. } = &mut *guard;
        let plan = output
            .as_mut()
            .ok_or_else(|| Error::new(ErrorKind::InvalidUse, "stream has no output direction"))?;
        if user_buf.len() != plan.user_buffer.len() {
            return Err(Error::new(ErrorKind::InvalidParameter, "write buffer size does not match the negotiated block"));
        }
        match plan.user_to_device.as_ref() {
            Some(conv) => conv.convert(user_buf, &mut plan.device_buffer, frames),
            None => plan.device_buffer.copy_from_slice(user_buf),
        }
        if plan.negotiated.foreign_endian {
            let n = frames * plan.negotiated.device_channels as usize;
            byte_swap(&mut plan.device_buffer, n, plan.negotiated.device_format);
        }
        let status = backend_stream.write(&plan.device_buffer)?;
        *last_status |= status;
        if status.contains(CallbackStatus::OUTPUT_UNDERFLOW) {
            crate::error::warn_noop("output underflow");
        }
        Ok(())
    }

    /// Reads one block of user-format, user-channel-count, interleaved-per-options
    /// bytes from the input direction. Blocking-mode streams only.
    pub fn read(&self, user_buf: &mut [u8]) -> Result<(), Error> {
        let mut guard = self.core.inner.lock().unwrap();
        if guard.state != StreamState::Running {
            return Err(Error::new(ErrorKind::InvalidUse, "read requires a running stream"));
        }
        let frames = self.core.block_frames as usize;
        let StreamInner { backend_stream, input, last_status, .. } = &mut *guard;
        let plan = input
            .as_mut()
            .ok_or_else(|| Error::new(ErrorKind::InvalidUse, "stream has no input direction"))?;
        if user_buf.len() != plan.user_buffer.len() {
            return Err(Error::new(ErrorKind::InvalidParameter, "read buffer size does not match the negotiated block"));
        }
        let status = backend_stream.read(&mut plan.device_buffer)?;
        *last_status |= status;
        if status.contains(CallbackStatus::INPUT_OVERFLOW) {
            crate::error::warn_noop("input overflow");
        }
        if plan.negotiated.foreign_endian {
            let n = frames * plan.negotiated.device_channels as usize;
            byte_swap(&mut plan.device_buffer, n, plan.negotiated.device_format);
        }
        match plan.device_to_user.as_ref() {
            Some(conv) => conv.convert(&plan.device_buffer, user_buf, frames),
            None => user_buf.copy_from_slice(&plan.device_buffer),
        }
        Ok(())
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        self.close().ok();
    }
}

/// Driver-thread-facing operations, not part of the public API.
impl StreamCore {
    /// Blocks until the stream is `Running` or `Closed`. Returns `false` once `Closed`.
    pub(crate) fn wait_until_active(&self) -> bool {
        let mut guard = self.inner.lock().unwrap();
        while guard.state == StreamState::Stopped {
            guard = self.condvar.wait(guard).unwrap();
        }
        guard.state != StreamState::Closed
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().state == StreamState::Closed
    }

    pub(crate) fn is_stopping(&self) -> bool {
        self.inner.lock().unwrap().state == StreamState::Stopping
    }

    /// Lets the backend drain its own queued output (letting it play out) and
    /// transitions the stream to `Stopped`. Runs once per `Stopping` entry; the
    /// backend call itself blocks for as long as real draining takes.
    pub(crate) fn drive_drain_step(&self) -> Result<(), Error> {
        let mut guard = self.inner.lock().unwrap();
        let result = guard.backend_stream.stop();
        guard.state = StreamState::Stopped;
        self.condvar.notify_all();
        result
    }

    pub(crate) fn begin_drain(&self) {
        let mut guard = self.inner.lock().unwrap();
        if guard.state == StreamState::Running {
            guard.state = StreamState::Stopping;
        }
    }

    pub(crate) fn abort_now(&self) {
        let mut guard = self.inner.lock().unwrap();
        guard.backend_stream.abort().ok();
        guard.state = StreamState::Stopped;
        self.condvar.notify_all();
    }

    /// Runs one normal (non-draining) tick: capture, invoke the callback without
    /// holding the stream mutex, convert, play back, advance `stream_time`.
    pub(crate) fn drive_tick(&self) -> Result<CallbackAction, Error> {
        let frames = self.block_frames as usize;

        let (input_user, mut output_user, stream_time, status) = {
            let mut guard = self.inner.lock().unwrap();
            let StreamInner { backend_stream, input, output, stream_time, last_status, .. } = &mut *guard;

            let input_user = if let Some(plan) = input.as_mut() {
                let read_status = backend_stream.read(&mut plan.device_buffer)?;
                *last_status |= read_status;
                if plan.negotiated.foreign_endian {
                    let n = frames * plan.negotiated.device_channels as usize;
                    byte_swap(&mut plan.device_buffer, n, plan.negotiated.device_format);
                }
                match plan.device_to_user.as_ref() {
                    Some(conv) => conv.convert(&plan.device_buffer, &mut plan.user_buffer, frames),
                    None => plan.user_buffer.copy_from_slice(&plan.device_buffer),
                }
                Some(plan.user_buffer.clone())
            } else {
                None
            };

            let output_user = output.as_ref().map(|plan| vec![0u8; plan.user_buffer.len()]);
            // Status observed since the previous tick (including this tick's capture)
            // is handed to the callback now and consumed; this tick's playback status
            // is folded in below, to be delivered at the *next* tick, since a device
            // only reports an output underrun after the fact.
            let status = *last_status;
            *last_status = CallbackStatus::empty();
            (input_user, output_user, *stream_time, status)
        };

        let action = {
            let mut cb_guard = self.callback.lock().unwrap();
            match cb_guard.as_mut() {
                Some(cb) => cb(CallbackArgs {
                    output: output_user.as_mut().map(|v| v.as_mut_slice()),
                    input: input_user.as_deref(),
                    frames: frames as u32,
                    stream_time,
                    status,
                }),
                None => CallbackAction::Continue,
            }
        };

        {
            let mut guard = self.inner.lock().unwrap();
            let StreamInner { backend_stream, output, stream_time, last_status, .. } = &mut *guard;
            if let (Some(plan), Some(out_buf)) = (output.as_mut(), output_user.as_ref()) {
                match plan.user_to_device.as_ref() {
                    Some(conv) => conv.convert(out_buf, &mut plan.device_buffer, frames),
                    None => plan.device_buffer.copy_from_slice(out_buf),
                }
                if plan.negotiated.foreign_endian {
                    let n = frames * plan.negotiated.device_channels as usize;
                    byte_swap(&mut plan.device_buffer, n, plan.negotiated.device_format);
                }
                let write_status = backend_stream.write(&plan.device_buffer)?;
                *last_status |= write_status;
            }
            *stream_time += frames as f64 / self.sample_rate.max(1) as f64;
        }

        Ok(action)
    }
}
