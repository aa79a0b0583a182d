//! Demuxer node: reads packets from an input and dispatches them per
//! stream.
//!
//! The read loop supports wall-clock rate emulation (pacing packets to
//! their presentation rate), seamless looping over finite inputs (with a
//! continuous-timeline restamper so traversals concatenate), and
//! interrupt-driven cancellation of blocking native reads.

use crate::closer::Closer;
use crate::dispatch::{Dispatcher, Handler, PktHandlerConnector, StreamFilter};
use crate::error::{Error, Result};
use crate::event::EventBus;
use crate::media::{CodecType, Descriptor, MediaInput, Packet, SeekDirection};
use crate::node::{connect_nodes, disconnect_nodes, BaseNode, Node, NodeMeta, TaskSet};
use crate::pool::{BufferPool, PoolStats};
use crate::rational::{duration_to_nanos, rescale_q, Rational};
use crate::restamp::{ContinuousTimeRestamper, PktRestamper};
use crate::stats::{DurationRatioStat, StatMetadata};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

static COUNT: AtomicU64 = AtomicU64::new(0);

/// Demuxer options.
#[derive(Default)]
pub struct DemuxerOptions {
    /// Pace packet dispatch to the stream's presentation rate.
    pub emulate_rate: bool,
    /// Seek back to the first packet on end-of-input and keep reading.
    pub loop_input: bool,
    /// Node identity; empty fields get generated defaults.
    pub metadata: NodeMeta,
}

/// First-packet record used to rewind a looping input.
#[derive(Clone, Copy, Debug)]
struct LoopFirstPkt {
    stream_index: i32,
    dts: i64,
}

struct RunStream {
    descriptor: Descriptor,
    emulate_next_at: Option<Instant>,
}

/// State owned by the read loop for the lifetime of one run.
struct DemuxRun {
    input: Box<dyn MediaInput>,
    streams: HashMap<i32, RunStream>,
    restamper: Option<Box<dyn PktRestamper>>,
    loop_first: Option<LoopFirstPkt>,
}

/// A node that demuxes packets out of an input.
pub struct Demuxer {
    base: Arc<BaseNode>,
    dispatcher: Arc<Dispatcher<Packet>>,
    run: Mutex<Option<DemuxRun>>,
    emulate_rate: bool,
    loop_input: bool,
    work_ratio: Arc<DurationRatioStat>,
}

impl Demuxer {
    /// Create a demuxer over an opened input.
    pub fn new(
        options: DemuxerOptions,
        input: Box<dyn MediaInput>,
        events: EventBus,
        closer: &Closer,
    ) -> Result<Arc<Self>> {
        let count = COUNT.fetch_add(1, Ordering::Relaxed) + 1;
        let meta = options.metadata.extend(
            &format!("demuxer_{count}"),
            &format!("Demuxer #{count}"),
            &format!("Demuxes {}", input.url()),
        );
        let base = BaseNode::new(meta, events.clone());

        let streams: HashMap<i32, RunStream> = input
            .streams()
            .into_iter()
            .map(|info| {
                (
                    info.index,
                    RunStream {
                        descriptor: info.descriptor(),
                        emulate_next_at: None,
                    },
                )
            })
            .collect();

        // Looping concatenates traversals, so install the restamper that
        // keeps the timeline continuous across the seam.
        let restamper: Option<Box<dyn PktRestamper>> = if options.loop_input {
            Some(Box::new(ContinuousTimeRestamper::new()))
        } else {
            None
        };

        let pool = BufferPool::new(closer);
        let dispatcher = Arc::new(Dispatcher::new(
            base.meta().clone(),
            events,
            pool,
        ));

        let work_ratio = Arc::new(DurationRatioStat::new());
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
                name: "dispatch_ratio",
                label: "Dispatch ratio",
                description: "Percentage of time spent waiting for handlers to finish the previous buffer",
                unit: "%",
            },
            dispatcher.wait_stat(),
        );

        Ok(Arc::new(Self {
            base,
            dispatcher,
            run: Mutex::new(Some(DemuxRun {
                input,
                streams,
                restamper,
                loop_first: None,
            })),
            emulate_rate: options.emulate_rate,
            loop_input: options.loop_input,
            work_ratio,
        }))
    }

    /// Register `h` for a single stream; packets of other streams are
    /// discarded before reaching it.
    ///
    /// The registration is keyed by `h`'s name, so a later
    /// [`disconnect`](PktHandlerConnector::disconnect) removes it.
    pub fn connect_for_stream(&self, h: Arc<dyn Handler<Packet>>, stream_index: i32) {
        connect_nodes(&self.base, h.base());
        self.dispatcher
            .add_handler(Arc::new(StreamFilter::new(h, stream_index)));
    }

    /// Accounting of the packet pool backing this demuxer's dispatches.
    pub fn pool_stats(&self) -> PoolStats {
        self.dispatcher.pool().stats()
    }

    async fn read_frame(&self, run: &mut DemuxRun) -> bool {
        let mut pkt = match self.dispatcher.pool().get() {
            Ok(pkt) => pkt,
            Err(err) => {
                self.base.events().send_node_error(self.base.name(), &err);
                return true;
            }
        };

        let read = {
            let _work = self.work_ratio.timer();
            run.input.read_packet(&mut pkt)
        };
        if let Err(err) = read {
            // An interrupted read after cancellation is a normal shutdown.
            if self.base.token().is_cancelled() {
                return true;
            }
            return match err {
                Error::EndOfInput if self.loop_input => match run.loop_first {
                    Some(first) => {
                        if let Err(err) = run.input.seek(
                            first.stream_index,
                            first.dts,
                            SeekDirection::Backward,
                        ) {
                            self.base.events().send_node_error(self.base.name(), &err);
                            return true;
                        }
                        false
                    }
                    // Looping over an input that never produced a packet.
                    None => true,
                },
                Error::EndOfInput => true,
                err => {
                    self.base.events().send_node_error(self.base.name(), &err);
                    true
                }
            };
        }

        // Packets of streams we did not index are discarded.
        let Some(stream) = run.streams.get_mut(&pkt.stream_index()) else {
            return false;
        };

        if let Some(restamper) = run.restamper.as_mut() {
            restamper.restamp(&mut pkt);
        }

        if self.loop_input && run.loop_first.is_none() {
            run.loop_first = Some(LoopFirstPkt {
                stream_index: pkt.stream_index(),
                dts: pkt.dts(),
            });
        }

        if self.emulate_rate {
            match stream.emulate_next_at {
                Some(next_at) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(next_at) => {}
                        _ = self.base.cancelled() => return true,
                    }
                }
                None => stream.emulate_next_at = Some(Instant::now()),
            }
            let duration = emulate_rate_pkt_duration(&pkt, &stream.descriptor);
            let nanos = duration_to_nanos(duration, stream.descriptor.time_base);
            stream.emulate_next_at =
                Some(stream.emulate_next_at.unwrap() + Duration::from_nanos(nanos));
        }

        let descriptor = stream.descriptor;
        self.dispatcher.dispatch(&pkt, descriptor).await;
        false
    }
}

/// Presentation duration of a packet for rate emulation.
///
/// For audio, skip-samples side data shortens the presentation time:
/// emulation must match what the listener hears, not what the decoder
/// consumes.
fn emulate_rate_pkt_duration(pkt: &Packet, descriptor: &Descriptor) -> i64 {
    if descriptor.codec_type != CodecType::Audio {
        return pkt.duration();
    }
    let Some(skip) = pkt.skip_samples() else {
        return pkt.duration();
    };
    if descriptor.sample_rate <= 0 {
        return pkt.duration();
    }
    let skipped_nanos =
        ((skip.start + skip.end) as f64 / descriptor.sample_rate as f64 * 1e9) as i64;
    pkt.duration() - rescale_q(skipped_nanos, Rational::NANOSECONDS, descriptor.time_base)
}

impl Node for Demuxer {
    fn base(&self) -> &BaseNode {
        &self.base
    }

    fn start(self: Arc<Self>, parent: &CancellationToken, tasks: &TaskSet) {
        let this = Arc::clone(&self);
        self.base.start(parent, tasks, async move {
            let mut run = match this.run.lock().unwrap().take() {
                Some(run) => run,
                None => return,
            };

            // Blocking native reads observe this flag; set it the moment
            // the node context is cancelled.
            let interrupt = Arc::new(AtomicBool::new(false));
            run.input.set_interrupt(interrupt.clone());
            {
                let token = this.base.token().clone();
                let interrupt = interrupt.clone();
                tokio::spawn(async move {
                    token.cancelled().await;
                    interrupt.store(true, Ordering::SeqCst);
                });
            }

            loop {
                if this.read_frame(&mut run).await {
                    break;
                }
                this.base.handle_pause().await;
                if this.base.token().is_cancelled() {
                    break;
                }
            }

            // Let every in-flight handler finish with its buffer before
            // the input (and whatever its packets point into) goes away.
            this.dispatcher.wait().await;
            drop(run);
        });
    }
}

impl PktHandlerConnector for Demuxer {
    fn connect(&self, h: Arc<dyn Handler<Packet>>) {
        connect_nodes(&self.base, h.base());
        self.dispatcher.add_handler(h);
    }

    fn disconnect(&self, h: &dyn Handler<Packet>) {
        self.dispatcher.del_handler(h.base().name());
        disconnect_nodes(&self.base, h.base());
    }
}
