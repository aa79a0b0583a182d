//! Muxer node: writes restamped packets into an output container.
//!
//! The container header goes out exactly once, before the first packet;
//! the trailer is written exactly once at workflow teardown through a
//! close hook. Incoming payloads are queued as thunks so timestamp
//! rescaling happens on the muxer's task at dequeue time, not on the
//! producer's.

use crate::closer::Closer;
use crate::dispatch::{Handler, PktPayload};
use crate::error::Result;
use crate::event::EventBus;
use crate::media::{MediaOutput, StreamInfo};
use crate::node::{BaseNode, Node, NodeMeta, TaskSet};
use crate::queue::{IngressConsumer, IngressQueue};
use crate::restamp::PktRestamper;
use crate::stats::{CounterRateStat, DurationRatioStat, StatMetadata};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

static COUNT: AtomicU64 = AtomicU64::new(0);

const DEFAULT_QUEUE_CAPACITY: usize = 256;

type PktThunk = Box<dyn FnOnce() -> PktPayload + Send>;

/// Muxer options.
pub struct MuxerOptions {
    /// Node identity; empty fields get generated defaults.
    pub metadata: NodeMeta,
    /// Restamper applied after rescaling, before each write.
    pub restamper: Option<Box<dyn PktRestamper>>,
    /// Ingress queue capacity.
    pub queue_capacity: usize,
}

impl Default for MuxerOptions {
    fn default() -> Self {
        Self {
            metadata: NodeMeta::default(),
            restamper: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// A node that muxes packets into an output.
pub struct Muxer {
    base: Arc<BaseNode>,
    queue: IngressQueue<PktThunk>,
    consumer: Mutex<Option<IngressConsumer<PktThunk>>>,
    output: Arc<Mutex<Box<dyn MediaOutput>>>,
    closer: Arc<Closer>,
    header_written: AtomicBool,
    restamper: Mutex<Option<Box<dyn PktRestamper>>>,
    stat_incoming: Arc<CounterRateStat>,
    work_ratio: Arc<DurationRatioStat>,
}

impl Muxer {
    /// Create a muxer over an opened output.
    pub fn new(
        options: MuxerOptions,
        output: Box<dyn MediaOutput>,
        events: EventBus,
        closer: Arc<Closer>,
    ) -> Result<Arc<Self>> {
        let count = COUNT.fetch_add(1, Ordering::Relaxed) + 1;
        let meta = options.metadata.extend(
            &format!("muxer_{count}"),
            &format!("Muxer #{count}"),
            &format!("Muxes to {}", output.url()),
        );
        let base = BaseNode::new(meta, events);

        let (queue, consumer) = IngressQueue::new(options.queue_capacity, base.token());

        let stat_incoming = Arc::new(CounterRateStat::new());
        let work_ratio = Arc::new(DurationRatioStat::new());
        base.add_stat(
            StatMetadata {
                name: "incoming_rate",
                label: "Incoming rate",
                description: "Number of packets coming in per second",
                unit: "pps",
            },
            stat_incoming.clone(),
        );
        base.add_stat(
            StatMetadata {
                name: "work_ratio",
                label: "Work ratio",
                description: "Percentage of time spent doing some actual work",
                unit: "%",
            },
            work_ratio.clone(),
        );
        base.add_stat(
            StatMetadata {
                name: "processed_rate",
                label: "Processed rate",
                description: "Number of packets written per second",
                unit: "pps",
            },
            queue.rate_stat(),
        );

        Ok(Arc::new(Self {
            base,
            queue,
            consumer: Mutex::new(Some(consumer)),
            output: Arc::new(Mutex::new(output)),
            closer,
            header_written: AtomicBool::new(false),
            restamper: Mutex::new(options.restamper),
            stat_incoming,
            work_ratio,
        }))
    }

    /// Create the per-stream handler that feeds this muxer.
    ///
    /// The handler converts each payload into a queue thunk; the thunk
    /// rescales the packet from the source time base to `stream`'s and
    /// assigns the stream index when the muxer dequeues it.
    pub fn new_pkt_handler(self: &Arc<Self>, stream: StreamInfo) -> Arc<MuxerPktHandler> {
        Arc::new(MuxerPktHandler {
            muxer: Arc::clone(self),
            stream,
        })
    }

    /// Depth of the ingress queue.
    pub fn queue_depth(&self) -> usize {
        self.queue.depth()
    }

    /// Total packets written so far.
    pub fn processed(&self) -> u64 {
        self.queue.processed()
    }
}

impl Node for Muxer {
    fn base(&self) -> &BaseNode {
        &self.base
    }

    fn start(self: Arc<Self>, parent: &CancellationToken, tasks: &TaskSet) {
        let this = Arc::clone(&self);
        self.base.start(parent, tasks, async move {
            // The header goes out exactly once, even across redundant
            // start attempts; failing to write it stops the node.
            if !this.header_written.swap(true, Ordering::SeqCst) {
                let written = this.output.lock().unwrap().write_header();
                if let Err(err) = written {
                    this.base.events().send_node_error(this.base.name(), &err);
                    return;
                }
                let output = Arc::clone(&this.output);
                this.closer.add(move || output.lock().unwrap().write_trailer());
            }

            let mut consumer = match this.consumer.lock().unwrap().take() {
                Some(consumer) => consumer,
                None => return,
            };
            while let Some(thunk) = consumer.recv().await {
                let mut payload = thunk();
                this.stat_incoming.add(1);
                if let Some(restamper) = this.restamper.lock().unwrap().as_mut() {
                    restamper.restamp(&mut payload.buffer);
                }
                let written = {
                    let _work = this.work_ratio.timer();
                    this.output.lock().unwrap().write_interleaved(&payload.buffer)
                };
                if let Err(err) = written {
                    // A failed write loses one packet, not the node.
                    this.base.events().send_node_error(this.base.name(), &err);
                }
                this.base.handle_pause().await;
            }
        });
    }
}

/// Per-stream adapter feeding payloads into a [`Muxer`]'s queue.
pub struct MuxerPktHandler {
    muxer: Arc<Muxer>,
    stream: StreamInfo,
}

impl MuxerPktHandler {
    /// The output stream this handler targets.
    pub fn stream(&self) -> &StreamInfo {
        &self.stream
    }
}

impl Node for MuxerPktHandler {
    fn base(&self) -> &BaseNode {
        &self.muxer.base
    }

    fn start(self: Arc<Self>, parent: &CancellationToken, tasks: &TaskSet) {
        self.muxer.clone().start(parent, tasks)
    }
}

#[async_trait]
impl Handler<crate::media::Packet> for MuxerPktHandler {
    async fn handle(&self, payload: PktPayload) {
        let stream = self.stream.clone();
        let thunk: PktThunk = Box::new(move || {
            let mut payload = payload;
            let from = payload.descriptor.time_base;
            payload.buffer.rescale_ts(from, stream.time_base);
            payload.buffer.set_stream_index(stream.index);
            payload
        });
        // A refused send only happens on shutdown; the buffer inside the
        // thunk returns to its pool when the thunk drops.
        let _ = self.muxer.queue.send(thunk).await;
    }
}
