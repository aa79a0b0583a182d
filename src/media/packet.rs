//! Reference-counted media packets.

use crate::error::Result;
use crate::pool::PoolBuffer;
use crate::rational::{rescale_q, Rational};
use bytes::Bytes;
use smallvec::SmallVec;

/// Sentinel for an unset timestamp.
pub const NO_PTS: i64 = i64::MIN;

/// Kinds of side data a packet can carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SideDataKind {
    /// Leading/trailing samples the decoder should discard.
    SkipSamples,
}

/// An opaque blob of side data attached to a packet.
#[derive(Clone, Debug)]
pub struct SideData {
    /// What the blob encodes.
    pub kind: SideDataKind,
    /// The raw payload; layout is kind-specific.
    pub data: Bytes,
}

/// Decoded skip-samples side data.
///
/// Stored in the packet as two little-endian `u32` values (samples to
/// skip from the start, samples to skip from the end).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SkipSamples {
    /// Samples to skip at the start of the packet.
    pub start: u32,
    /// Samples to skip at the end of the packet.
    pub end: u32,
}

impl SkipSamples {
    /// Encode as packet side data.
    pub fn to_side_data(self) -> SideData {
        let mut data = Vec::with_capacity(8);
        data.extend_from_slice(&self.start.to_le_bytes());
        data.extend_from_slice(&self.end.to_le_bytes());
        SideData {
            kind: SideDataKind::SkipSamples,
            data: Bytes::from(data),
        }
    }

    /// Decode from a side data blob; `None` if the blob is malformed.
    pub fn from_side_data(sd: &SideData) -> Option<Self> {
        if sd.kind != SideDataKind::SkipSamples || sd.data.len() < 8 {
            return None;
        }
        let start = u32::from_le_bytes(sd.data[0..4].try_into().ok()?);
        let end = u32::from_le_bytes(sd.data[4..8].try_into().ok()?);
        Some(Self { start, end })
    }
}

/// A reference-counted media packet.
///
/// The payload is shared: [`ref_from`](Packet::ref_from) creates a new
/// reference to the source packet's payload and copies its properties,
/// so every fan-out target owns an independent view of the same bytes.
/// [`unref`](Packet::unref) releases the reference and resets the
/// properties so the packet can be recycled through a pool.
#[derive(Debug)]
pub struct Packet {
    data: Option<Bytes>,
    stream_index: i32,
    pts: i64,
    dts: i64,
    duration: i64,
    key: bool,
    side_data: SmallVec<[SideData; 1]>,
}

impl Default for Packet {
    fn default() -> Self {
        Self {
            data: None,
            stream_index: -1,
            pts: NO_PTS,
            dts: NO_PTS,
            duration: 0,
            key: false,
            side_data: SmallVec::new(),
        }
    }
}

impl Packet {
    /// Allocate a fresh, unreferenced packet.
    pub fn alloc() -> Result<Self> {
        Ok(Self::default())
    }

    /// Stream index within the originating container.
    pub fn stream_index(&self) -> i32 {
        self.stream_index
    }

    /// Set the stream index.
    pub fn set_stream_index(&mut self, index: i32) {
        self.stream_index = index;
    }

    /// Presentation timestamp, in the stream time base.
    pub fn pts(&self) -> i64 {
        self.pts
    }

    /// Set the presentation timestamp.
    pub fn set_pts(&mut self, pts: i64) {
        self.pts = pts;
    }

    /// Decoding timestamp, in the stream time base.
    pub fn dts(&self) -> i64 {
        self.dts
    }

    /// Set the decoding timestamp.
    pub fn set_dts(&mut self, dts: i64) {
        self.dts = dts;
    }

    /// Duration, in the stream time base.
    pub fn duration(&self) -> i64 {
        self.duration
    }

    /// Set the duration.
    pub fn set_duration(&mut self, duration: i64) {
        self.duration = duration;
    }

    /// Whether this packet starts a keyframe.
    pub fn is_key(&self) -> bool {
        self.key
    }

    /// Mark this packet as a keyframe.
    pub fn set_key(&mut self, key: bool) {
        self.key = key;
    }

    /// The shared payload, if referenced.
    pub fn data(&self) -> Option<&Bytes> {
        self.data.as_ref()
    }

    /// Attach a payload.
    pub fn set_data(&mut self, data: Bytes) {
        self.data = Some(data);
    }

    /// Whether this packet currently references a payload.
    pub fn is_referenced(&self) -> bool {
        self.data.is_some()
    }

    /// Attach a side data blob, replacing any existing blob of the same kind.
    pub fn add_side_data(&mut self, sd: SideData) {
        self.side_data.retain(|existing| existing.kind != sd.kind);
        self.side_data.push(sd);
    }

    /// Look up a side data blob by kind.
    pub fn side_data(&self, kind: SideDataKind) -> Option<&SideData> {
        self.side_data.iter().find(|sd| sd.kind == kind)
    }

    /// Decode skip-samples side data, if present.
    pub fn skip_samples(&self) -> Option<SkipSamples> {
        self.side_data(SideDataKind::SkipSamples)
            .and_then(SkipSamples::from_side_data)
    }

    /// Rescale pts, dts and duration from `from` to `to`.
    ///
    /// Unset timestamps stay unset.
    pub fn rescale_ts(&mut self, from: Rational, to: Rational) {
        if self.pts != NO_PTS {
            self.pts = rescale_q(self.pts, from, to);
        }
        if self.dts != NO_PTS {
            self.dts = rescale_q(self.dts, from, to);
        }
        self.duration = rescale_q(self.duration, from, to);
    }
}

impl PoolBuffer for Packet {
    fn alloc() -> Result<Self> {
        Packet::alloc()
    }

    fn ref_from(&mut self, src: &Self) -> Result<()> {
        self.data = src.data.clone();
        self.stream_index = src.stream_index;
        self.pts = src.pts;
        self.dts = src.dts;
        self.duration = src.duration;
        self.key = src.key;
        self.side_data = src.side_data.clone();
        Ok(())
    }

    fn unref(&mut self) {
        *self = Packet::default();
    }
}
