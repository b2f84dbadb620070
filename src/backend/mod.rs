//! The Backend Adapter Contract (component C4): the abstract interface every host-OS
//! audio backend implements, plus the dummy in-memory adapter used by tests.
//!
//! Two traits split the contract's responsibilities:
//!
//! - [`Backend`] is a stateless-ish factory, one instance per compiled backend variant.
//!   It enumerates devices and negotiates + opens a native stream.
//! - [`BackendStream`] is the opened, possibly-duplex native stream returned by
//!   [`Backend::open`]. It exposes only the native transport primitives (`start`,
//!   `stop`, `abort`, `close`, raw `read`/`write`, `ready`); the generic tick algorithm
//!   in `spec.md` §4.4 — apply conversion, byte-swap, invoke the client callback, order
//!   capture before playback — is implemented once, in [`crate::stream`], shared by
//!   every backend rather than duplicated per adapter.

use crate::device::DeviceRegistry;
use crate::error::Error;
use crate::format::SampleFormat;
use crate::options::{BackendTag, StreamOptions};

pub mod dummy;

#[cfg(feature = "backend-alsa")]
pub mod alsa;
#[cfg(feature = "backend-coreaudio")]
pub mod coreaudio;
#[cfg(feature = "backend-directsound")]
pub mod directsound;
#[cfg(feature = "backend-jack")]
pub mod jack;
#[cfg(feature = "backend-oss")]
pub mod oss;
#[cfg(feature = "backend-pulse")]
pub mod pulse;
#[cfg(feature = "backend-wasapi")]
pub mod wasapi;

/// One direction's request parameters for [`Backend::open`].
#[derive(Clone, Debug)]
pub struct DirectionRequest {
    pub device_index: usize,
    pub user_channels: u16,
    pub first_channel: u16,
}

/// The full request passed to [`Backend::open`]. A stream with both `input` and
/// `output` set is a duplex stream; the backend must negotiate a single block size
/// shared by both directions (`spec.md` §4.3 step 3).
#[derive(Clone, Debug)]
pub struct OpenSpec {
    pub input: Option<DirectionRequest>,
    pub output: Option<DirectionRequest>,
    pub sample_rate: u32,
    pub user_format: SampleFormat,
    /// Requested block size; `0` means unspecified (backend picks).
    pub block_frames: u32,
    pub options: StreamOptions,
}

/// What the backend actually negotiated for one direction.
#[derive(Copy, Clone, Debug)]
pub struct NegotiatedDirection {
    pub device_format: SampleFormat,
    pub device_channels: u16,
    pub device_interleaved: bool,
    /// Whether the device's native byte order is the reverse of the host's, requiring
    /// the generic tick to insert a byte-swap stage (`spec.md` §4.1).
    pub foreign_endian: bool,
}

/// The outcome of a successful [`Backend::open`]: the negotiated parameters plus the
/// opened native stream.
pub struct Opened {
    pub block_frames: u32,
    pub input: Option<NegotiatedDirection>,
    pub output: Option<NegotiatedDirection>,
    pub stream: Box<dyn BackendStream>,
}

/// A factory for one host-OS audio backend variant.
pub trait Backend: Send + Sync {
    /// This backend's tag.
    fn tag(&self) -> BackendTag;

    /// Enumerates devices visible to this backend, running the capability probing
    /// protocol in `spec.md` §4.2 for each.
    fn enumerate(&self) -> Result<DeviceRegistry, Error>;

    /// Negotiates and opens a native stream per `spec.md` §4.3–§4.4.
    fn open(&self, spec: &OpenSpec) -> Result<Opened, Error>;
}

/// An opened native stream: one or two native device handles (input, output, or both
/// for duplex), exposing only the transport primitives the generic tick driver needs.
pub trait BackendStream: Send {
    /// Prepares and begins transport. If the device was already prepared (e.g. after a
    /// prior `stop` without `close`), preparation is skipped.
    fn start(&mut self) -> Result<(), Error>;

    /// Drains queued output (letting it play out) then halts transport.
    fn stop(&mut self) -> Result<(), Error>;

    /// Halts transport immediately, discarding queued frames.
    fn abort(&mut self) -> Result<(), Error>;

    /// Releases native handles and any per-backend state. Idempotent.
    fn close(&mut self) -> Result<(), Error>;

    /// Writes exactly one device-format, device-channel-count block to the output
    /// device. Blocks until the native API accepts the data (or the equivalent
    /// event/ready primitive has signaled readiness, for event-driven backends).
    /// The returned [`CallbackStatus`] reports any xrun the backend detected while
    /// servicing this call (e.g. `OUTPUT_UNDERFLOW` recovered from an ALSA `EPIPE`);
    /// backends with no reliable per-block signal return [`CallbackStatus::empty`].
    fn write(&mut self, buf: &[u8]) -> Result<CallbackStatus, Error>;

    /// Reads exactly one device-format, device-channel-count block from the input
    /// device into `buf`. Blocks until a full block is available. See [`write`]
    /// for the returned status's meaning.
    ///
    /// [`write`]: BackendStream::write
    fn read(&mut self, buf: &mut [u8]) -> Result<CallbackStatus, Error>;

    /// Non-blocking query: frames that can be moved immediately without blocking.
    fn ready(&self) -> u32;
}

bitflags::bitflags! {
    /// Status bits reported to the client callback, describing xruns observed since
    /// the previous tick (`spec.md` §6, "Callback ABI").
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct CallbackStatus: u32 {
        const OUTPUT_UNDERFLOW = 0b01;
        const INPUT_OVERFLOW = 0b10;
    }
}
