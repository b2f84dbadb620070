// The MIT License (MIT)
//
// Copyright (c) 2013 Jeremy Letang (letang.jeremy@gmail.com)
//
// Permission is hereby granted, free of charge, to any person obtaining a copy of
// this software and associated documentation files (the "Software"), to deal in
// the Software without restriction, including without limitation the rights to
// use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of
// the Software, and to permit persons to whom the Software is furnished to do so,
// subject to the following conditions:

// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.

// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS
// FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR
// COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER
// IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

//! # rtstream
//!
//! A cross-platform realtime audio I/O engine: device enumeration, a backend-agnostic
//! stream state machine, and a PCM format/channel/interleave conversion pipeline, with
//! one native adapter per supported host audio API.
//!
//! A single native backend is selected per [`AudioEngine`] instance, either
//! automatically (the first compiled backend in platform preference order) or by
//! explicit [`BackendTag`]. Each engine enumerates that backend's devices and opens at
//! most one [`stream::Stream`] at a time.

#![warn(missing_docs)]

pub mod backend;
pub mod convert;
pub mod device;
pub mod driver;
pub mod error;
pub mod format;
pub mod options;
pub mod stream;

pub use device::{DeviceInfo, DeviceRegistry, SampleRates};
pub use error::{Error, ErrorKind};
pub use format::{SampleFormat, SampleFormatFlags};
pub use options::{BackendTag, Direction, StreamOptionFlags, StreamOptions};
pub use stream::{CallbackAction, CallbackArgs, Stream, StreamRequest, StreamState};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use backend::Backend;

/// The public facade (component C7): owns one selected backend, its device registry,
/// and at most one live [`Stream`] at a time.
pub struct AudioEngine {
    backend: Arc<dyn Backend>,
    registry: DeviceRegistry,
    stream_slot: Arc<AtomicBool>,
}

impl AudioEngine {
    /// The backend variants compiled into this build, in no particular order. Always
    /// includes [`BackendTag::Dummy`].
    pub fn compiled_backends() -> Vec<BackendTag> {
        let mut tags = vec![BackendTag::Dummy];
        #[cfg(feature = "backend-alsa")]
        tags.push(BackendTag::Alsa);
        #[cfg(feature = "backend-oss")]
        tags.push(BackendTag::Oss);
        #[cfg(feature = "backend-pulse")]
        tags.push(BackendTag::Pulse);
        #[cfg(feature = "backend-jack")]
        tags.push(BackendTag::Jack);
        #[cfg(feature = "backend-coreaudio")]
        tags.push(BackendTag::Core);
        #[cfg(feature = "backend-directsound")]
        tags.push(BackendTag::Ds);
        #[cfg(feature = "backend-wasapi")]
        tags.push(BackendTag::Wasapi);
        tags
    }

    fn backend_for_tag(tag: BackendTag) -> Result<Arc<dyn Backend>, Error> {
        match tag {
            BackendTag::Dummy => Ok(Arc::new(backend::dummy::DummyBackend::default())),
            #[cfg(feature = "backend-alsa")]
            BackendTag::Alsa => Ok(Arc::new(backend::alsa::AlsaBackend::new()?)),
            #[cfg(feature = "backend-oss")]
            BackendTag::Oss => Ok(Arc::new(backend::oss::OssBackend::new()?)),
            #[cfg(feature = "backend-pulse")]
            BackendTag::Pulse => Ok(Arc::new(backend::pulse::PulseBackend::new()?)),
            #[cfg(feature = "backend-jack")]
            BackendTag::Jack => Ok(Arc::new(backend::jack::JackBackend::new()?)),
            #[cfg(feature = "backend-coreaudio")]
            BackendTag::Core => Ok(Arc::new(backend::coreaudio::CoreAudioBackend::new()?)),
            #[cfg(feature = "backend-directsound")]
            BackendTag::Ds => Ok(Arc::new(backend::directsound::DirectSoundBackend::new()?)),
            #[cfg(feature = "backend-wasapi")]
            BackendTag::Wasapi => Ok(Arc::new(backend::wasapi::WasapiBackend::new()?)),
            other => Err(Error::new(
                ErrorKind::InvalidParameter,
                format!("backend {} is not compiled into this build", other.display_name()),
            )),
        }
    }

    /// Opens the engine against an explicit backend tag.
    pub fn with_tag(tag: BackendTag) -> Result<Self, Error> {
        let backend = Self::backend_for_tag(tag)?;
        let registry = backend.enumerate()?;
        Ok(AudioEngine {
            backend,
            registry,
            stream_slot: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Opens the engine against the first compiled backend in platform preference
    /// order (`SPEC_FULL.md` §1), falling back to [`BackendTag::Dummy`] if none of the
    /// platform-preferred backends are compiled in.
    pub fn auto() -> Result<Self, Error> {
        for tag in BackendTag::preference_order() {
            if let Ok(engine) = Self::with_tag(*tag) {
                return Ok(engine);
            }
        }
        Self::with_tag(BackendTag::Dummy)
    }

    /// The backend this engine is bound to.
    pub fn backend_tag(&self) -> BackendTag {
        self.backend.tag()
    }

    /// Re-runs device enumeration, atomically replacing the registry snapshot.
    pub fn refresh(&mut self) -> Result<(), Error> {
        self.registry = self.backend.enumerate()?;
        Ok(())
    }

    /// The most recently enumerated device registry.
    pub fn devices(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Opens a stream. Only one stream may be live per engine at a time; opening a
    /// second one while the first is still open returns [`ErrorKind::InvalidUse`].
    pub fn open(&self, request: StreamRequest) -> Result<Stream, Error> {
        if self
            .stream_slot
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::new(
                ErrorKind::InvalidUse,
                "this engine already has a live stream open",
            ));
        }
        match Stream::open(self.backend.clone(), request, self.stream_slot.clone()) {
            Ok(stream) => Ok(stream),
            Err(err) => {
                self.stream_slot.store(false, Ordering::SeqCst);
                Err(err)
            }
        }
    }
}
