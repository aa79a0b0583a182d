//! Shared fixtures: in-memory media I/O and recording handlers.
#![allow(dead_code)]

use async_trait::async_trait;
use avflow::closer::Closer;
use avflow::dispatch::{FramePayload, Handler, Payload, PktPayload};
use avflow::error::{Error, NativeError, Result};
use avflow::event::EventBus;
use avflow::media::{
    CodecType, Descriptor, Frame, MediaInput, MediaOutput, Packet, SeekDirection, SkipSamples,
    StreamInfo,
};
use avflow::node::{BaseNode, Node, NodeMeta, TaskSet};
use avflow::pool::BufferPool;
use avflow::rational::Rational;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Install a log subscriber once, so `RUST_LOG` surfaces runtime traces
/// from failing tests.
pub fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

/// One fixture packet served by [`MockInput`].
#[derive(Clone)]
pub struct FixturePkt {
    pub stream_index: i32,
    pub dts: i64,
    pub duration: i64,
    pub skip: Option<SkipSamples>,
}

impl FixturePkt {
    pub fn new(stream_index: i32, dts: i64, duration: i64) -> Self {
        Self {
            stream_index,
            dts,
            duration,
            skip: None,
        }
    }
}

/// An in-memory input serving a fixed packet list, with seek support.
pub struct MockInput {
    url: String,
    streams: Vec<StreamInfo>,
    packets: Vec<FixturePkt>,
    pos: usize,
    interrupt: Option<Arc<AtomicBool>>,
}

impl MockInput {
    pub fn new(streams: Vec<StreamInfo>, packets: Vec<FixturePkt>) -> Box<Self> {
        Box::new(Self {
            url: "mock://input".to_string(),
            streams,
            packets,
            pos: 0,
            interrupt: None,
        })
    }

    /// A single video stream at the given time base, packets dts `0..count`
    /// with the given duration.
    pub fn video_sequence(time_base: Rational, count: i64, duration: i64) -> Box<Self> {
        let streams = vec![StreamInfo {
            index: 0,
            time_base,
            codec_type: CodecType::Video,
            sample_rate: 0,
        }];
        let packets = (0..count)
            .map(|i| FixturePkt::new(0, i * duration, duration))
            .collect();
        Self::new(streams, packets)
    }
}

impl MediaInput for MockInput {
    fn url(&self) -> &str {
        &self.url
    }

    fn streams(&self) -> Vec<StreamInfo> {
        self.streams.clone()
    }

    fn read_packet(&mut self, pkt: &mut Packet) -> Result<()> {
        if let Some(flag) = &self.interrupt {
            if flag.load(Ordering::SeqCst) {
                return Err(NativeError::EXIT.into());
            }
        }
        let Some(fixture) = self.packets.get(self.pos) else {
            return Err(Error::EndOfInput);
        };
        self.pos += 1;
        pkt.set_data(Bytes::from_static(b"fixture"));
        pkt.set_stream_index(fixture.stream_index);
        pkt.set_dts(fixture.dts);
        pkt.set_pts(fixture.dts);
        pkt.set_duration(fixture.duration);
        if let Some(skip) = fixture.skip {
            pkt.add_side_data(skip.to_side_data());
        }
        Ok(())
    }

    fn seek(&mut self, stream_index: i32, ts: i64, _direction: SeekDirection) -> Result<()> {
        let target = self
            .packets
            .iter()
            .enumerate()
            .filter(|(_, p)| p.stream_index == stream_index && p.dts <= ts)
            .map(|(i, _)| i)
            .next_back();
        match target {
            Some(i) => {
                self.pos = i;
                Ok(())
            }
            None => Err(NativeError::INVALID.into()),
        }
    }

    fn set_interrupt(&mut self, flag: Arc<AtomicBool>) {
        self.interrupt = Some(flag);
    }
}

/// Observable side of a [`MockOutput`] after it moved into a muxer.
#[derive(Clone, Default)]
pub struct OutputProbe {
    pub header_writes: Arc<AtomicUsize>,
    pub trailer_writes: Arc<AtomicUsize>,
    /// `(stream_index, pts, dts)` per written packet, in write order.
    pub written: Arc<Mutex<Vec<(i32, i64, i64)>>>,
}

impl OutputProbe {
    pub fn written_count(&self) -> usize {
        self.written.lock().unwrap().len()
    }
}

/// An in-memory output recording every header/trailer/packet write.
pub struct MockOutput {
    url: String,
    streams: Vec<StreamInfo>,
    probe: OutputProbe,
    pub fail_header: bool,
    /// Fail the nth write (0-based) with a broken pipe.
    pub fail_write_at: Option<usize>,
    writes: usize,
    /// Blocking delay per write, to simulate a slow sink.
    pub write_delay: Option<std::time::Duration>,
}

impl MockOutput {
    pub fn new(streams: Vec<StreamInfo>) -> (Box<Self>, OutputProbe) {
        let probe = OutputProbe::default();
        (
            Box::new(Self {
                url: "mock://output".to_string(),
                streams,
                probe: probe.clone(),
                fail_header: false,
                fail_write_at: None,
                writes: 0,
                write_delay: None,
            }),
            probe,
        )
    }
}

impl MediaOutput for MockOutput {
    fn url(&self) -> &str {
        &self.url
    }

    fn streams(&self) -> Vec<StreamInfo> {
        self.streams.clone()
    }

    fn write_header(&mut self) -> Result<()> {
        if self.fail_header {
            return Err(NativeError::IO.into());
        }
        self.probe.header_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn write_interleaved(&mut self, pkt: &Packet) -> Result<()> {
        let n = self.writes;
        self.writes += 1;
        if let Some(delay) = self.write_delay {
            std::thread::sleep(delay);
        }
        if self.fail_write_at == Some(n) {
            return Err(NativeError::PIPE.into());
        }
        self.probe
            .written
            .lock()
            .unwrap()
            .push((pkt.stream_index(), pkt.pts(), pkt.dts()));
        Ok(())
    }

    fn write_trailer(&mut self) -> Result<()> {
        self.probe.trailer_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A record of one handled payload.
#[derive(Clone, Debug)]
pub struct Handled {
    pub dts: i64,
    pub started: Instant,
    pub finished: Instant,
}

/// A packet handler that records what it sees, optionally sleeping per
/// packet and cancelling a token after a target count.
pub struct CollectingPktHandler {
    base: Arc<BaseNode>,
    pub handled: Arc<Mutex<Vec<Handled>>>,
    pub delay: Duration,
    pub stop_after: Option<(usize, CancellationToken)>,
}

impl CollectingPktHandler {
    pub fn new(name: &str) -> Arc<Self> {
        Self::with_delay(name, Duration::ZERO)
    }

    pub fn with_delay(name: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            base: BaseNode::new(NodeMeta::new(name, name, "collects packets"), EventBus::default()),
            handled: Arc::new(Mutex::new(Vec::new())),
            delay,
            stop_after: None,
        })
    }

    pub fn stopping_after(name: &str, count: usize, token: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            base: BaseNode::new(NodeMeta::new(name, name, "collects packets"), EventBus::default()),
            handled: Arc::new(Mutex::new(Vec::new())),
            delay: Duration::ZERO,
            stop_after: Some((count, token)),
        })
    }

    pub fn dts_seen(&self) -> Vec<i64> {
        self.handled.lock().unwrap().iter().map(|h| h.dts).collect()
    }

    pub fn count(&self) -> usize {
        self.handled.lock().unwrap().len()
    }
}

impl Node for CollectingPktHandler {
    fn base(&self) -> &BaseNode {
        &self.base
    }

    fn start(self: Arc<Self>, parent: &CancellationToken, tasks: &TaskSet) {
        self.base.start(parent, tasks, async {});
    }
}

#[async_trait]
impl Handler<Packet> for CollectingPktHandler {
    async fn handle(&self, payload: PktPayload) {
        let started = Instant::now();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let record = Handled {
            dts: payload.buffer.dts(),
            started,
            finished: Instant::now(),
        };
        let count = {
            let mut handled = self.handled.lock().unwrap();
            handled.push(record);
            handled.len()
        };
        if let Some((target, token)) = &self.stop_after {
            if count >= *target {
                token.cancel();
            }
        }
    }
}

/// A frame handler that records pts values.
pub struct CollectingFrameHandler {
    base: Arc<BaseNode>,
    pub seen: Arc<Mutex<Vec<i64>>>,
}

impl CollectingFrameHandler {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            base: BaseNode::new(NodeMeta::new(name, name, "collects frames"), EventBus::default()),
            seen: Arc::new(Mutex::new(Vec::new())),
        })
    }
}

impl Node for CollectingFrameHandler {
    fn base(&self) -> &BaseNode {
        &self.base
    }

    fn start(self: Arc<Self>, parent: &CancellationToken, tasks: &TaskSet) {
        self.base.start(parent, tasks, async {});
    }
}

#[async_trait]
impl Handler<Frame> for CollectingFrameHandler {
    async fn handle(&self, payload: FramePayload) {
        self.seen.lock().unwrap().push(payload.buffer.pts());
    }
}

/// Build a packet payload by hand, as an upstream dispatcher would.
pub fn pkt_payload(
    pool: &BufferPool<Packet>,
    descriptor: Descriptor,
    source: NodeMeta,
    dts: i64,
    duration: i64,
) -> PktPayload {
    let mut buffer = pool.get().expect("pool get");
    buffer.set_data(Bytes::from_static(b"fixture"));
    buffer.set_dts(dts);
    buffer.set_pts(dts);
    buffer.set_duration(duration);
    Payload {
        buffer,
        descriptor,
        source,
    }
}

/// Build a frame payload by hand.
pub fn frame_payload(
    pool: &BufferPool<Frame>,
    descriptor: Descriptor,
    source: NodeMeta,
    pts: i64,
    duration: i64,
) -> FramePayload {
    let mut buffer = pool.get().expect("pool get");
    buffer.set_data(Bytes::from_static(b"fixture"));
    buffer.set_pts(pts);
    buffer.set_duration(duration);
    Payload {
        buffer,
        descriptor,
        source,
    }
}

/// A pool with its own closer, for tests that build payloads by hand.
pub fn standalone_pool<B: avflow::pool::PoolBuffer>() -> (BufferPool<B>, Arc<Closer>) {
    let closer = Arc::new(Closer::new());
    (BufferPool::new(&closer), closer)
}

/// Mono audio stream info at 48kHz.
pub fn audio_stream(index: i32) -> StreamInfo {
    StreamInfo {
        index,
        time_base: Rational::new(1, 48000),
        codec_type: CodecType::Audio,
        sample_rate: 48000,
    }
}

/// Video stream info at the given time base.
pub fn video_stream(index: i32, time_base: Rational) -> StreamInfo {
    StreamInfo {
        index,
        time_base,
        codec_type: CodecType::Video,
        sample_rate: 0,
    }
}
