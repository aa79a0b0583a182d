//! Pluggable timestamp rewriters.
//!
//! Restampers rewrite buffer timestamps at two well-defined points: at
//! the source when a demuxer loops (so concatenated traversals form one
//! monotonic timeline) and at the sink after rescaling (so an output
//! starts where the caller wants it).

use crate::media::{Frame, Packet, NO_PTS};
use std::collections::HashMap;

/// Rewrites packet timestamps in place.
pub trait PktRestamper: Send {
    /// Restamp one packet.
    fn restamp(&mut self, pkt: &mut Packet);
}

/// Rewrites frame timestamps in place.
pub trait FrameRestamper: Send {
    /// Restamp one frame.
    fn restamp(&mut self, frame: &mut Frame);
}

/// Restamps packets so each stream forms a continuous timeline.
///
/// Every packet's dts becomes the previous packet's dts plus its
/// duration; pts is shifted by the same delta. The first packet of each
/// stream passes through untouched. Installed by looping demuxers so the
/// second traversal continues where the first ended.
#[derive(Default)]
pub struct ContinuousTimeRestamper {
    last: HashMap<i32, (i64, i64)>,
}

impl ContinuousTimeRestamper {
    /// Create a restamper with no history.
    pub fn new() -> Self {
        Self::default()
    }
}

impl PktRestamper for ContinuousTimeRestamper {
    fn restamp(&mut self, pkt: &mut Packet) {
        if let Some(&(last_dts, last_duration)) = self.last.get(&pkt.stream_index()) {
            let dts = last_dts + last_duration;
            let delta = dts - pkt.dts();
            pkt.set_dts(dts);
            if pkt.pts() != NO_PTS {
                pkt.set_pts(pkt.pts() + delta);
            }
        }
        self.last
            .insert(pkt.stream_index(), (pkt.dts(), pkt.duration()));
    }
}

/// Shifts each stream so its first packet lands on timestamp zero.
#[derive(Default)]
pub struct StartFromZeroRestamper {
    offsets: HashMap<i32, i64>,
}

impl StartFromZeroRestamper {
    /// Create a restamper with no recorded offsets.
    pub fn new() -> Self {
        Self::default()
    }
}

impl PktRestamper for StartFromZeroRestamper {
    fn restamp(&mut self, pkt: &mut Packet) {
        let offset = *self
            .offsets
            .entry(pkt.stream_index())
            .or_insert_with(|| -pkt.dts());
        pkt.set_dts(pkt.dts() + offset);
        if pkt.pts() != NO_PTS {
            pkt.set_pts(pkt.pts() + offset);
        }
    }
}

/// Restamps frames so they form a continuous timeline.
///
/// Each frame's pts becomes the previous frame's pts plus its duration;
/// the first frame passes through untouched.
#[derive(Default)]
pub struct ContinuousFrameRestamper {
    last: Option<(i64, i64)>,
}

impl ContinuousFrameRestamper {
    /// Create a restamper with no history.
    pub fn new() -> Self {
        Self::default()
    }
}

impl FrameRestamper for ContinuousFrameRestamper {
    fn restamp(&mut self, frame: &mut Frame) {
        if let Some((last_pts, last_duration)) = self.last {
            frame.set_pts(last_pts + last_duration);
        }
        self.last = Some((frame.pts(), frame.duration()));
    }
}
