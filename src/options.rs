//! External interfaces shared by every backend: the backend-tag namespace and the
//! stream option set (`spec.md` §6).

use bitflags::bitflags;

/// The closed set of backend tags a caller may select by name.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BackendTag {
    Alsa,
    Oss,
    Pulse,
    Jack,
    Core,
    Ds,
    Wasapi,
    Dummy,
    /// Matched when the requested tag is unrecognized, or no tag was given.
    Unspecified,
}

impl BackendTag {
    /// Case-insensitive lookup of a backend tag by its string name. Unknown strings map
    /// to [`BackendTag::Unspecified`], per `spec.md` §6.
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "alsa" => BackendTag::Alsa,
            "oss" => BackendTag::Oss,
            "pulse" => BackendTag::Pulse,
            "jack" => BackendTag::Jack,
            "core" => BackendTag::Core,
            "ds" => BackendTag::Ds,
            "wasapi" => BackendTag::Wasapi,
            "dummy" => BackendTag::Dummy,
            _ => BackendTag::Unspecified,
        }
    }

    /// A human-readable display name for the backend.
    pub fn display_name(self) -> &'static str {
        match self {
            BackendTag::Alsa => "Advanced Linux Sound Architecture (ALSA)",
            BackendTag::Oss => "Open Sound System (OSS)",
            BackendTag::Pulse => "PulseAudio",
            BackendTag::Jack => "JACK Audio Connection Kit",
            BackendTag::Core => "Core Audio",
            BackendTag::Ds => "DirectSound",
            BackendTag::Wasapi => "Windows Audio Session API (WASAPI)",
            BackendTag::Dummy => "Dummy (in-memory, for testing)",
            BackendTag::Unspecified => "Unspecified",
        }
    }

    /// The fixed auto-selection preference order for the current platform
    /// (`SPEC_FULL.md` §1). `Dummy` is never auto-selected.
    pub fn preference_order() -> &'static [BackendTag] {
        if cfg!(target_os = "linux") {
            &[BackendTag::Jack, BackendTag::Alsa, BackendTag::Pulse, BackendTag::Oss]
        } else if cfg!(target_os = "macos") {
            &[BackendTag::Core]
        } else if cfg!(target_os = "windows") {
            &[BackendTag::Wasapi, BackendTag::Ds]
        } else {
            &[]
        }
    }
}

/// The direction(s) a stream carries.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
    Duplex,
}

impl Direction {
    pub fn has_input(self) -> bool {
        matches!(self, Direction::Input | Direction::Duplex)
    }

    pub fn has_output(self) -> bool {
        matches!(self, Direction::Output | Direction::Duplex)
    }
}

bitflags! {
    /// Stream options recognized by `open` (`spec.md` §6).
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct StreamOptionFlags: u32 {
        /// User buffers are planar rather than interleaved.
        const NONINTERLEAVED = 0b0000_0001;
        /// Prefer the smallest block count `>= 2` the backend supports.
        const MINIMIZE_LATENCY = 0b0000_0010;
        /// Request exclusive device access where the native API allows it.
        const HOG_DEVICE = 0b0000_0100;
        /// Run the driver thread under realtime scheduling at `priority`.
        const SCHEDULE_REALTIME = 0b0000_1000;
        /// Open ALSA's `"default"` PCM instead of a specific `hw:` device.
        const ALSA_USE_DEFAULT = 0b0001_0000;
    }
}

/// The full set of options accepted by `open`, combining the bit flags with the options
/// that carry an associated value.
#[derive(Clone, Debug, Default)]
pub struct StreamOptions {
    pub flags: StreamOptionFlags,
    /// Realtime scheduling priority, used only when [`StreamOptionFlags::SCHEDULE_REALTIME`]
    /// is set. Clamped to the OS's legal range by the driver when the thread is spawned.
    pub priority: Option<i32>,
    /// Display name handed to backends that support it (Pulse, JACK).
    pub stream_name: Option<String>,
    /// Desired block count; `1` means "backend minimum".
    pub number_of_buffers: u32,
}

impl StreamOptionFlags {
    const fn default_bits() -> Self {
        StreamOptionFlags::empty()
    }
}

impl Default for StreamOptionFlags {
    fn default() -> Self {
        Self::default_bits()
    }
}

impl StreamOptions {
    pub fn interleaved(&self) -> bool {
        !self.flags.contains(StreamOptionFlags::NONINTERLEAVED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_tag_parse_is_case_insensitive() {
        assert_eq!(BackendTag::parse("ALSA"), BackendTag::Alsa);
        assert_eq!(BackendTag::parse("Pulse"), BackendTag::Pulse);
        assert_eq!(BackendTag::parse("nonsense"), BackendTag::Unspecified);
    }

    #[test]
    fn default_stream_options_are_interleaved() {
        let opts = StreamOptions::default();
        assert!(opts.interleaved());
    }
}
