//! Media buffer types and the native library boundary.
//!
//! [`Packet`] and [`Frame`] are the opaque, reference-counted buffers the
//! runtime moves between nodes; [`MediaInput`] and [`MediaOutput`] are the
//! interfaces the runtime consumes from the native media library.

mod descriptor;
mod frame;
mod io;
mod packet;

pub use descriptor::{CodecType, Descriptor};
pub use frame::Frame;
pub use io::{Dict, MediaInput, MediaOutput, SeekDirection, StreamInfo};
pub use packet::{Packet, SideData, SideDataKind, SkipSamples, NO_PTS};
