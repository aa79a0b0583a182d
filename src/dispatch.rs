//! Fan-out dispatch of produced buffers to downstream handlers.
//!
//! A producer node owns one [`Dispatcher`] per output kind. Each
//! dispatched buffer is copied (reference-counted, via the node's
//! [`BufferPool`]) once per registered handler, and every handler runs in
//! its own task so heterogeneous downstreams process the same buffer in
//! parallel.
//!
//! Buffers themselves are strictly ordered: a dispatch does not begin its
//! fan-out until every handler has finished with the previous buffer.
//! Dropping that barrier would need per-handler sequencing to keep each
//! downstream seeing buffers in producer order.

use crate::event::EventBus;
use crate::media::{Descriptor, Frame, Packet};
use crate::node::{BaseNode, Node};
use crate::pool::{BufferPool, PoolBuffer, Pooled};
use crate::stats::DurationRatioStat;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

/// The envelope delivered to a handler.
///
/// The buffer is owned by the handler for the duration of the call and
/// returns to its pool when the payload drops; handlers must not retain
/// it past return.
pub struct Payload<B: PoolBuffer> {
    /// The reference-counted buffer, on loan from the producer's pool.
    pub buffer: Pooled<B>,
    /// Read-only metadata of the originating stream.
    pub descriptor: Descriptor,
    /// Identity of the producing node.
    pub source: crate::node::NodeMeta,
}

/// Payload carrying a packet.
pub type PktPayload = Payload<Packet>;
/// Payload carrying a frame.
pub type FramePayload = Payload<Frame>;

/// A node that consumes dispatched buffers of type `B`.
#[async_trait]
pub trait Handler<B: PoolBuffer>: Node {
    /// Process one payload. The buffer must not outlive the call.
    async fn handle(&self, payload: Payload<B>);
}

/// A node that packet handlers can be connected to.
pub trait PktHandlerConnector {
    /// Register `h` downstream and record the graph edge.
    fn connect(&self, h: Arc<dyn Handler<Packet>>);
    /// Unregister `h` and remove the graph edge.
    fn disconnect(&self, h: &dyn Handler<Packet>);
}

/// A node that frame handlers can be connected to.
pub trait FrameHandlerConnector {
    /// Register `h` downstream and record the graph edge.
    fn connect(&self, h: Arc<dyn Handler<Frame>>);
    /// Unregister `h` and remove the graph edge.
    fn disconnect(&self, h: &dyn Handler<Frame>);
}

/// Per-producer fan-out coordinator.
pub struct Dispatcher<B: PoolBuffer> {
    source: crate::node::NodeMeta,
    events: EventBus,
    pool: BufferPool<B>,
    handlers: Mutex<HashMap<String, Arc<dyn Handler<B>>>>,
    inflight: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
    stat_wait: Arc<DurationRatioStat>,
}

impl<B: PoolBuffer> Dispatcher<B> {
    /// Create a dispatcher for the given producer.
    pub fn new(source: crate::node::NodeMeta, events: EventBus, pool: BufferPool<B>) -> Self {
        Self {
            source,
            events,
            pool,
            handlers: Mutex::new(HashMap::new()),
            inflight: tokio::sync::Mutex::new(Vec::new()),
            stat_wait: Arc::new(DurationRatioStat::new()),
        }
    }

    /// Register a handler, keyed by its node name.
    ///
    /// Re-adding a handler with the same name replaces the prior
    /// registration. Safe under concurrent dispatch: in-flight dispatches
    /// keep working from their snapshot.
    pub fn add_handler(&self, h: Arc<dyn Handler<B>>) {
        let name = h.base().name().to_string();
        self.handlers.lock().unwrap().insert(name, h);
    }

    /// Unregister the handler with the given node name.
    ///
    /// Not synchronous with in-flight dispatches: a handler removed
    /// during a dispatch still receives the current buffer.
    pub fn del_handler(&self, name: &str) {
        self.handlers.lock().unwrap().remove(name);
    }

    /// Number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.handlers.lock().unwrap().len()
    }

    /// Deliver one buffer to every registered handler.
    ///
    /// Returns once the fan-out tasks for this buffer are spawned; the
    /// next `dispatch` call waits for all of them before fanning out
    /// again, which is what keeps each downstream in producer order.
    pub async fn dispatch(&self, buf: &B, descriptor: Descriptor) {
        let handlers: Vec<Arc<dyn Handler<B>>> = {
            let table = self.handlers.lock().unwrap();
            table.values().cloned().collect()
        };
        if handlers.is_empty() {
            return;
        }

        let mut inflight = self.inflight.lock().await;
        {
            let _wait = self.stat_wait.timer();
            for handle in inflight.drain(..) {
                let _ = handle.await;
            }
        }

        for h in handlers {
            let mut copy = match self.pool.get() {
                Ok(copy) => copy,
                Err(err) => {
                    self.events.send_node_error(self.source.name.as_str(), &err);
                    continue;
                }
            };
            if let Err(err) = copy.ref_from(buf) {
                self.events.send_node_error(self.source.name.as_str(), &err);
                continue;
            }
            let payload = Payload {
                buffer: copy,
                descriptor,
                source: self.source.clone(),
            };
            inflight.push(tokio::spawn(async move {
                h.handle(payload).await;
            }));
        }
    }

    /// Wait for every in-flight handler task of the last dispatch.
    ///
    /// Producers call this on shutdown before releasing the resources
    /// their buffers point into.
    pub async fn wait(&self) {
        let mut inflight = self.inflight.lock().await;
        for handle in inflight.drain(..) {
            let _ = handle.await;
        }
    }

    /// The dispatch-wait ratio stat, for registration with the producer.
    pub fn wait_stat(&self) -> Arc<DurationRatioStat> {
        Arc::clone(&self.stat_wait)
    }

    /// The pool fan-out copies are drawn from.
    pub fn pool(&self) -> &BufferPool<B> {
        &self.pool
    }
}

/// Wraps a packet handler, forwarding only packets of one stream.
///
/// Keyed by the inner handler's name, so connecting and disconnecting a
/// handler for a stream go through the same registry entry.
pub struct StreamFilter {
    inner: Arc<dyn Handler<Packet>>,
    stream_index: i32,
}

impl StreamFilter {
    /// Wrap `inner`, passing through only packets of `stream_index`.
    pub fn new(inner: Arc<dyn Handler<Packet>>, stream_index: i32) -> Self {
        Self {
            inner,
            stream_index,
        }
    }
}

impl Node for StreamFilter {
    fn base(&self) -> &BaseNode {
        self.inner.base()
    }

    fn start(
        self: Arc<Self>,
        parent: &tokio_util::sync::CancellationToken,
        tasks: &crate::node::TaskSet,
    ) {
        self.inner.clone().start(parent, tasks)
    }
}

#[async_trait]
impl Handler<Packet> for StreamFilter {
    async fn handle(&self, payload: PktPayload) {
        if payload.buffer.stream_index() == self.stream_index {
            self.inner.handle(payload).await;
        }
        // Otherwise the payload drops here and the buffer returns to its pool.
    }
}
