//! # avflow
//!
//! A media workflow runtime: graphs of concurrently executing nodes that
//! exchange reference-counted packets and frames.
//!
//! avflow owns the hard parts of running an encoder/decoder/mux/demux
//! topology on top of a native media library: node lifecycle and
//! pause/stop supervision, bounded ingress queues with backpressure,
//! ordered fan-out of shared buffers to parallel consumers, and object
//! pools that recycle heavyweight media buffers. The native library
//! itself stays outside the crate, consumed through the
//! [`MediaInput`](media::MediaInput) / [`MediaOutput`](media::MediaOutput)
//! boundary traits.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use avflow::prelude::*;
//!
//! let workflow = Workflow::new("transcode");
//!
//! let demuxer = Demuxer::new(
//!     DemuxerOptions { emulate_rate: true, ..Default::default() },
//!     input, // Box<dyn MediaInput> from your bindings
//!     workflow.events().clone(),
//!     workflow.closer(),
//! )?;
//! let muxer = Muxer::new(
//!     MuxerOptions::default(),
//!     output, // Box<dyn MediaOutput> from your bindings
//!     workflow.events().clone(),
//!     workflow.closer().clone(),
//! )?;
//!
//! demuxer.connect_for_stream(muxer.new_pkt_handler(out_stream), 0);
//! workflow.add_node(demuxer);
//! workflow.add_node(muxer);
//!
//! workflow.start();
//! workflow.stop_and_wait().await;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod closer;
pub mod demux;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod forward;
pub mod media;
pub mod mux;
pub mod node;
pub mod pool;
pub mod queue;
pub mod rational;
pub mod registry;
pub mod restamp;
pub mod stats;
pub mod workflow;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::closer::Closer;
    pub use crate::demux::{Demuxer, DemuxerOptions};
    pub use crate::dispatch::{
        FrameHandlerConnector, FramePayload, Handler, Payload, PktHandlerConnector, PktPayload,
    };
    pub use crate::error::{Error, Result};
    pub use crate::event::{Event, EventBus};
    pub use crate::forward::{Forwarder, ForwarderOptions};
    pub use crate::media::{
        CodecType, Descriptor, Frame, MediaInput, MediaOutput, Packet, StreamInfo,
    };
    pub use crate::mux::{Muxer, MuxerOptions};
    pub use crate::node::{Node, NodeMeta, NodeState};
    pub use crate::pool::{BufferPool, PoolBuffer, Pooled};
    pub use crate::rational::Rational;
    pub use crate::registry::WorkflowPool;
    pub use crate::workflow::Workflow;
}

pub use error::{Error, Result};
