//! Sample format taxonomy (component C1 of the stream engine).
//!
//! The engine recognizes a closed set of six PCM sample formats. User-facing buffers
//! are always host-endian; device-facing buffers may be foreign-endian, in which case
//! the conversion pipeline in [`crate::convert`] inserts a byte-swap stage.

use bitflags::bitflags;

/// A PCM sample format supported by the engine.
///
/// `I24` is stored in the *upper* three bytes of a 32-bit container (i.e. as if it were
/// an `I32` with the low byte always zero). This is a deliberate fix the core makes:
/// some native APIs pack 24-bit samples into the low three bytes of a word instead, but
/// every buffer that crosses the conversion pipeline in this crate uses the upper-byte
/// layout so that byte-swap and widening arithmetic stay uniform across formats.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub enum SampleFormat {
    /// Signed 8-bit integer.
    I8,
    /// Signed 16-bit integer.
    #[default]
    I16,
    /// Signed 24-bit integer, stored in the upper three bytes of a 32-bit container.
    I24,
    /// Signed 32-bit integer.
    I32,
    /// 32-bit IEEE float, normalized to the range `[-1.0, 1.0]`.
    F32,
    /// 64-bit IEEE float, normalized to the range `[-1.0, 1.0]`.
    F64,
}

impl SampleFormat {
    /// All six formats, in the descending-preference order used by format negotiation
    /// (see `Stream::open`'s step 1 in `spec.md` §4.3).
    pub const NEGOTIATION_ORDER: [SampleFormat; 6] = [
        SampleFormat::F64,
        SampleFormat::F32,
        SampleFormat::I32,
        SampleFormat::I24,
        SampleFormat::I16,
        SampleFormat::I8,
    ];

    /// Number of bytes a single sample of this format occupies. `I24` is stored in a
    /// 32-bit container, so it reports 4 here, matching the byte-swap and conversion
    /// stride math which never special-cases 24-bit storage width.
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::I8 => 1,
            SampleFormat::I16 => 2,
            SampleFormat::I24 => 4,
            SampleFormat::I32 => 4,
            SampleFormat::F32 => 4,
            SampleFormat::F64 => 8,
        }
    }

    /// Number of bytes occupied by one frame (all channels) of this format.
    pub fn bytes_per_frame(self, channels: u16) -> usize {
        self.bytes_per_sample() * channels as usize
    }

    /// The corresponding single-bit flag in a [`SampleFormatFlags`] mask.
    pub fn flag(self) -> SampleFormatFlags {
        match self {
            SampleFormat::I8 => SampleFormatFlags::I8,
            SampleFormat::I16 => SampleFormatFlags::I16,
            SampleFormat::I24 => SampleFormatFlags::I24,
            SampleFormat::I32 => SampleFormatFlags::I32,
            SampleFormat::F32 => SampleFormatFlags::F32,
            SampleFormat::F64 => SampleFormatFlags::F64,
        }
    }

    /// Whether a sample of this format occupies more than one byte and is therefore
    /// subject to byte-swapping when the device's endianness differs from the host's.
    pub fn is_multi_byte(self) -> bool {
        self.bytes_per_sample() > 1
    }
}

bitflags! {
    /// A bit mask of natively supported sample formats, as reported by a probed
    /// [`crate::device::DeviceInfo`].
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct SampleFormatFlags: u8 {
        /// See [`SampleFormat::I8`].
        const I8  = 0b0000_0001;
        /// See [`SampleFormat::I16`].
        const I16 = 0b0000_0010;
        /// See [`SampleFormat::I24`].
        const I24 = 0b0000_0100;
        /// See [`SampleFormat::I32`].
        const I32 = 0b0000_1000;
        /// See [`SampleFormat::F32`].
        const F32 = 0b0001_0000;
        /// See [`SampleFormat::F64`].
        const F64 = 0b0010_0000;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_per_sample_matches_table() {
        assert_eq!(SampleFormat::I8.bytes_per_sample(), 1);
        assert_eq!(SampleFormat::I16.bytes_per_sample(), 2);
        assert_eq!(SampleFormat::I24.bytes_per_sample(), 4);
        assert_eq!(SampleFormat::I32.bytes_per_sample(), 4);
        assert_eq!(SampleFormat::F32.bytes_per_sample(), 4);
        assert_eq!(SampleFormat::F64.bytes_per_sample(), 8);
    }

    #[test]
    fn negotiation_order_is_descending_width_with_float_preference() {
        let order = SampleFormat::NEGOTIATION_ORDER;
        assert_eq!(order[0], SampleFormat::F64);
        assert_eq!(order[order.len() - 1], SampleFormat::I8);
    }

    #[test]
    fn is_multi_byte() {
        assert!(!SampleFormat::I8.is_multi_byte());
        assert!(SampleFormat::I16.is_multi_byte());
        assert!(SampleFormat::F64.is_multi_byte());
    }
}
