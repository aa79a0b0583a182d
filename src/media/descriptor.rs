//! Stream descriptors attached to dispatched payloads.

use crate::rational::Rational;

/// Broad codec class of a stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CodecType {
    /// Audio stream.
    Audio,
    /// Video stream.
    Video,
    /// Anything else (data, subtitles, attachments).
    #[default]
    Other,
}

/// Immutable metadata describing the source stream of a buffer.
///
/// A descriptor accompanies every dispatched payload and is read-only:
/// handlers use it to interpret the buffer's timestamps.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Descriptor {
    /// Time base the buffer's timestamps are counted in.
    pub time_base: Rational,
    /// Codec class of the originating stream.
    pub codec_type: CodecType,
    /// Sample rate in Hz; meaningful for audio streams only.
    pub sample_rate: i32,
}

impl Descriptor {
    /// Create a descriptor for a non-audio stream.
    pub fn new(time_base: Rational, codec_type: CodecType) -> Self {
        Self {
            time_base,
            codec_type,
            sample_rate: 0,
        }
    }

    /// Create a descriptor for an audio stream.
    pub fn audio(time_base: Rational, sample_rate: i32) -> Self {
        Self {
            time_base,
            codec_type: CodecType::Audio,
            sample_rate,
        }
    }
}
