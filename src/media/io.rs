//! The native media library boundary.
//!
//! The runtime never talks to the native demuxing/muxing library
//! directly; it consumes these traits. Bindings live outside this crate
//! and implement them over the real format contexts; tests implement
//! them over in-memory fixtures.

use crate::error::{Error, Result};
use crate::media::{CodecType, Descriptor, Packet};
use crate::rational::Rational;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Metadata of one stream in a container.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamInfo {
    /// Stream index within the container.
    pub index: i32,
    /// Time base for the stream's timestamps.
    pub time_base: Rational,
    /// Codec class.
    pub codec_type: CodecType,
    /// Sample rate in Hz; audio only.
    pub sample_rate: i32,
}

impl StreamInfo {
    /// The descriptor attached to payloads originating from this stream.
    pub fn descriptor(&self) -> Descriptor {
        Descriptor {
            time_base: self.time_base,
            codec_type: self.codec_type,
            sample_rate: self.sample_rate,
        }
    }
}

/// Direction of a seek relative to the requested timestamp.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeekDirection {
    /// Land on the nearest syncpoint at or before the timestamp.
    Backward,
    /// Land on the nearest syncpoint at or after the timestamp.
    Forward,
}

/// An open demuxable input.
///
/// Implementations wrap a native format context: they expose the
/// container's streams, fill packets from it, and honor seeks. A
/// blocking `read_packet` must observe the interrupt flag installed via
/// [`set_interrupt`](MediaInput::set_interrupt) and return
/// [`NativeError::EXIT`](crate::error::NativeError::EXIT) promptly once
/// it is set.
pub trait MediaInput: Send {
    /// The URL or path this input was opened from.
    fn url(&self) -> &str;

    /// The container's streams.
    fn streams(&self) -> Vec<StreamInfo>;

    /// Read the next packet into `pkt`.
    ///
    /// Returns [`Error::EndOfInput`] when the container is exhausted.
    fn read_packet(&mut self, pkt: &mut Packet) -> Result<()>;

    /// Seek the given stream to `ts` (in the stream's time base).
    fn seek(&mut self, stream_index: i32, ts: i64, direction: SeekDirection) -> Result<()>;

    /// Install the interrupt flag observed by blocking reads.
    fn set_interrupt(&mut self, flag: Arc<AtomicBool>) {
        let _ = flag;
    }
}

/// An open muxable output.
///
/// Implementations wrap a native output context with its configured
/// streams. The runtime guarantees `write_header` is called exactly once
/// before any `write_interleaved`, and `write_trailer` exactly once at
/// teardown.
pub trait MediaOutput: Send {
    /// The URL or path this output was opened for.
    fn url(&self) -> &str;

    /// The output's configured streams.
    fn streams(&self) -> Vec<StreamInfo>;

    /// Write the container header.
    fn write_header(&mut self) -> Result<()>;

    /// Write one packet, interleaving across streams as needed.
    fn write_interleaved(&mut self, pkt: &Packet) -> Result<()>;

    /// Write the container trailer.
    fn write_trailer(&mut self) -> Result<()>;
}

/// A parsed option dictionary.
///
/// Openers accept free-form `key=value` option strings
/// (`"rtsp_transport=tcp,timeout=5000000"`); malformed input is a
/// configuration error, fatal to construction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Dict {
    entries: HashMap<String, String>,
}

impl Dict {
    /// Parse a `key=value` list separated by commas.
    pub fn parse(s: &str) -> Result<Self> {
        let mut entries = HashMap::new();
        for pair in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| Error::Configuration(format!("bad dict entry: {pair:?}")))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(Error::Configuration(format!("bad dict entry: {pair:?}")));
            }
            entries.insert(key.to_string(), value.trim().to_string());
        }
        Ok(Self { entries })
    }

    /// Look up an entry.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether the dict has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
