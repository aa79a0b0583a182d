//! Forwarder node: the minimal frame-transforming node.
//!
//! Inbound frames are copied (reference-counted) into the forwarder's
//! own pool, queued, optionally restamped on the consumer task, and
//! re-dispatched downstream. Useful as a fan-out point or a restamping
//! stage between a decoder and several consumers.

use crate::closer::Closer;
use crate::dispatch::{Dispatcher, FrameHandlerConnector, FramePayload, Handler};
use crate::event::EventBus;
use crate::media::{Descriptor, Frame};
use crate::node::{connect_nodes, disconnect_nodes, BaseNode, Node, NodeMeta, TaskSet};
use crate::pool::{BufferPool, PoolBuffer, PoolStats, Pooled};
use crate::queue::{IngressConsumer, IngressQueue};
use crate::restamp::FrameRestamper;
use crate::stats::{CounterRateStat, StatMetadata};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

static COUNT: AtomicU64 = AtomicU64::new(0);

const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Forwarder options.
pub struct ForwarderOptions {
    /// Node identity; empty fields get generated defaults.
    pub metadata: NodeMeta,
    /// Restamper applied on the consumer task before re-dispatch.
    pub restamper: Option<Box<dyn FrameRestamper>>,
    /// Ingress queue capacity.
    pub queue_capacity: usize,
}

impl Default for ForwarderOptions {
    fn default() -> Self {
        Self {
            metadata: NodeMeta::default(),
            restamper: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

type FrameJob = (Pooled<Frame>, Descriptor);

/// A node that forwards frames to downstream handlers.
pub struct Forwarder {
    base: Arc<BaseNode>,
    dispatcher: Arc<Dispatcher<Frame>>,
    pool: BufferPool<Frame>,
    queue: IngressQueue<FrameJob>,
    consumer: Mutex<Option<IngressConsumer<FrameJob>>>,
    restamper: Mutex<Option<Box<dyn FrameRestamper>>>,
    stat_incoming: Arc<CounterRateStat>,
    stat_processed: Arc<CounterRateStat>,
}

impl Forwarder {
    /// Create a forwarder.
    pub fn new(options: ForwarderOptions, events: EventBus, closer: &Closer) -> Arc<Self> {
        let count = COUNT.fetch_add(1, Ordering::Relaxed) + 1;
        let meta = options.metadata.extend(
            &format!("forwarder_{count}"),
            &format!("Forwarder #{count}"),
            "Forwards frames",
        );
        let base = BaseNode::new(meta, events.clone());

        let pool = BufferPool::new(closer);
        let dispatcher = Arc::new(Dispatcher::new(
            base.meta().clone(),
            events,
            BufferPool::new(closer),
        ));
        let (queue, consumer) = IngressQueue::new(options.queue_capacity, base.token());

        let stat_incoming = Arc::new(CounterRateStat::new());
        let stat_processed = Arc::new(CounterRateStat::new());
        base.add_stat(
            StatMetadata {
                name: "incoming_rate",
                label: "Incoming rate",
                description: "Number of frames coming in per second",
                unit: "fps",
            },
            stat_incoming.clone(),
        );
        base.add_stat(
            StatMetadata {
                name: "processed_rate",
                label: "Processed rate",
                description: "Number of frames processed per second",
                unit: "fps",
            },
            stat_processed.clone(),
        );
        base.add_stat(
            StatMetadata {
                name: "dispatch_ratio",
                label: "Dispatch ratio",
                description: "Percentage of time spent waiting for handlers to finish the previous buffer",
                unit: "%",
            },
            dispatcher.wait_stat(),
        );

        Arc::new(Self {
            base,
            dispatcher,
            pool,
            queue,
            consumer: Mutex::new(Some(consumer)),
            restamper: Mutex::new(options.restamper),
            stat_incoming,
            stat_processed,
        })
    }

    /// Accounting of the pool holding this forwarder's inbound copies.
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }
}

impl Node for Forwarder {
    fn base(&self) -> &BaseNode {
        &self.base
    }

    fn start(self: Arc<Self>, parent: &CancellationToken, tasks: &TaskSet) {
        let this = Arc::clone(&self);
        self.base.start(parent, tasks, async move {
            let mut consumer = match this.consumer.lock().unwrap().take() {
                Some(consumer) => consumer,
                None => return,
            };
            while let Some((mut frame, descriptor)) = consumer.recv().await {
                this.stat_processed.add(1);
                if let Some(restamper) = this.restamper.lock().unwrap().as_mut() {
                    restamper.restamp(&mut frame);
                }
                this.dispatcher.dispatch(&frame, descriptor).await;
                this.base.handle_pause().await;
            }
            this.dispatcher.wait().await;
        });
    }
}

#[async_trait]
impl Handler<Frame> for Forwarder {
    async fn handle(&self, payload: FramePayload) {
        self.stat_incoming.add(1);

        let mut copy = match self.pool.get() {
            Ok(copy) => copy,
            Err(err) => {
                self.base.events().send_node_error(self.base.name(), &err);
                return;
            }
        };
        if let Err(err) = copy.ref_from(&payload.buffer) {
            self.base.events().send_node_error(self.base.name(), &err);
            return;
        }

        // A refused send only happens on shutdown; the copy returns to
        // the pool when the job drops.
        let _ = self.queue.send((copy, payload.descriptor)).await;
    }
}

impl FrameHandlerConnector for Forwarder {
    fn connect(&self, h: Arc<dyn Handler<Frame>>) {
        connect_nodes(&self.base, h.base());
        self.dispatcher.add_handler(h);
    }

    fn disconnect(&self, h: &dyn Handler<Frame>) {
        self.dispatcher.del_handler(h.base().name());
        disconnect_nodes(&self.base, h.base());
    }
}
