//! Reference-counted media frames.

use crate::error::Result;
use crate::pool::PoolBuffer;
use bytes::Bytes;

/// A reference-counted decoded media frame.
///
/// Like [`Packet`](crate::media::Packet), the payload is shared between
/// references while the properties are per-reference, so a restamped
/// fan-out copy never disturbs its siblings.
#[derive(Debug)]
pub struct Frame {
    data: Option<Bytes>,
    pts: i64,
    duration: i64,
    sample_count: i32,
    key_frame: bool,
}

impl Default for Frame {
    fn default() -> Self {
        Self {
            data: None,
            pts: super::NO_PTS,
            duration: 0,
            sample_count: 0,
            key_frame: false,
        }
    }
}

impl Frame {
    /// Allocate a fresh, unreferenced frame.
    pub fn alloc() -> Result<Self> {
        Ok(Self::default())
    }

    /// Presentation timestamp, in the stream time base.
    pub fn pts(&self) -> i64 {
        self.pts
    }

    /// Set the presentation timestamp.
    pub fn set_pts(&mut self, pts: i64) {
        self.pts = pts;
    }

    /// Duration, in the stream time base.
    pub fn duration(&self) -> i64 {
        self.duration
    }

    /// Set the duration.
    pub fn set_duration(&mut self, duration: i64) {
        self.duration = duration;
    }

    /// Number of audio samples in the frame; zero for video.
    pub fn sample_count(&self) -> i32 {
        self.sample_count
    }

    /// Set the audio sample count.
    pub fn set_sample_count(&mut self, samples: i32) {
        self.sample_count = samples;
    }

    /// Whether this is a keyframe.
    pub fn is_key_frame(&self) -> bool {
        self.key_frame
    }

    /// Mark this frame as a keyframe.
    pub fn set_key_frame(&mut self, key: bool) {
        self.key_frame = key;
    }

    /// The shared payload, if referenced.
    pub fn data(&self) -> Option<&Bytes> {
        self.data.as_ref()
    }

    /// Attach a payload.
    pub fn set_data(&mut self, data: Bytes) {
        self.data = Some(data);
    }

    /// Whether this frame currently references a payload.
    pub fn is_referenced(&self) -> bool {
        self.data.is_some()
    }
}

impl PoolBuffer for Frame {
    fn alloc() -> Result<Self> {
        Frame::alloc()
    }

    fn ref_from(&mut self, src: &Self) -> Result<()> {
        self.data = src.data.clone();
        self.pts = src.pts;
        self.duration = src.duration;
        self.sample_count = src.sample_count;
        self.key_frame = src.key_frame;
        Ok(())
    }

    fn unref(&mut self) {
        *self = Frame::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_ref_and_unref() {
        let mut src = Frame::alloc().unwrap();
        src.set_data(Bytes::from_static(b"pcm"));
        src.set_pts(42);
        src.set_sample_count(1024);

        let mut view = Frame::alloc().unwrap();
        view.ref_from(&src).unwrap();
        assert_eq!(view.pts(), 42);
        assert_eq!(view.sample_count(), 1024);
        assert!(view.is_referenced());

        view.unref();
        assert!(!view.is_referenced());
        assert_eq!(view.pts(), crate::media::NO_PTS);
        assert!(src.is_referenced());
    }
}
