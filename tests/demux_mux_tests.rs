//! Demuxer looping, rate emulation, and the muxer write path.

mod common;

use avflow::demux::{Demuxer, DemuxerOptions};
use avflow::dispatch::{Handler, PktHandlerConnector};
use avflow::media::SkipSamples;
use avflow::mux::{Muxer, MuxerOptions};
use avflow::node::{Node, NodeState};
use avflow::rational::Rational;
use avflow::workflow::Workflow;
use common::{CollectingPktHandler, FixturePkt, MockInput, MockOutput};
use std::sync::atomic::Ordering;
use tokio::time::Duration;

#[tokio::test]
async fn loop_restamp_produces_monotonic_timeline() {
    let workflow = Workflow::new("loop");

    // 10 packets, dts 0..=9, duration 1, at time base 1/10, looping.
    let input = MockInput::video_sequence(Rational::new(1, 10), 10, 1);
    let demuxer = Demuxer::new(
        DemuxerOptions {
            loop_input: true,
            ..Default::default()
        },
        input,
        workflow.events().clone(),
        workflow.closer(),
    )
    .unwrap();

    let handler = CollectingPktHandler::stopping_after("sink", 25, workflow.token().clone());
    demuxer.connect(handler.clone());
    workflow.add_node(demuxer.clone());

    workflow.start();
    tokio::time::timeout(Duration::from_secs(10), workflow.wait())
        .await
        .expect("loop demux failed to wind down");

    // Restamped traversals concatenate into one monotonic timeline.
    let seen = handler.dts_seen();
    assert!(seen.len() >= 25);
    let expected: Vec<i64> = (0..25).collect();
    assert_eq!(&seen[..25], &expected[..]);

    // Loop seek round-trip: the second traversal starts strictly after
    // the first traversal's last dts.
    assert!(seen[10] > seen[9]);
    assert_eq!(demuxer.base().state(), NodeState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn rate_emulation_paces_packets() {
    let workflow = Workflow::new("pacing");

    // 5 packets of duration 2 at time base 1/10: 200ms of presentation
    // time each.
    let input = MockInput::video_sequence(Rational::new(1, 10), 5, 2);
    let demuxer = Demuxer::new(
        DemuxerOptions {
            emulate_rate: true,
            ..Default::default()
        },
        input,
        workflow.events().clone(),
        workflow.closer(),
    )
    .unwrap();

    let handler = CollectingPktHandler::new("sink");
    demuxer.connect(handler.clone());
    workflow.add_node(demuxer.clone());

    workflow.start();
    while demuxer.base().state() != NodeState::Stopped {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    workflow.stop_and_wait().await;

    // Pacing runs from the first packet: the wall clock between the
    // first and last dispatch covers the four intervening durations.
    let handled = handler.handled.lock().unwrap().clone();
    assert_eq!(handled.len(), 5);
    let elapsed = handled[4].started - handled[0].started;
    assert_eq!(elapsed, Duration::from_millis(800));
}

#[tokio::test(start_paused = true)]
async fn rate_emulation_subtracts_skip_samples() {
    let workflow = Workflow::new("skip");

    // Audio at 48kHz; the first packet's 1024-sample duration is halved
    // by skip-samples side data {start: 512, end: 0}, so the second
    // packet goes out (1024 - 512) / 48000 = 10.67ms later.
    let stream = common::audio_stream(0);
    let packets = vec![
        FixturePkt {
            stream_index: 0,
            dts: 0,
            duration: 1024,
            skip: Some(SkipSamples { start: 512, end: 0 }),
        },
        FixturePkt::new(0, 1024, 1024),
    ];
    let input = MockInput::new(vec![stream], packets);
    let demuxer = Demuxer::new(
        DemuxerOptions {
            emulate_rate: true,
            ..Default::default()
        },
        input,
        workflow.events().clone(),
        workflow.closer(),
    )
    .unwrap();

    let handler = CollectingPktHandler::new("sink");
    demuxer.connect(handler.clone());
    workflow.add_node(demuxer.clone());

    workflow.start();
    while demuxer.base().state() != NodeState::Stopped {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    workflow.stop_and_wait().await;

    let handled = handler.handled.lock().unwrap().clone();
    assert_eq!(handled.len(), 2);
    let gap = handled[1].started - handled[0].started;
    assert_eq!(gap, Duration::from_nanos(10_666_667));
}

#[tokio::test]
async fn muxer_rescales_to_stream_time_base() {
    let workflow = Workflow::new("rescale");

    let out_stream = common::video_stream(0, Rational::new(1, 90000));
    let (output, probe) = MockOutput::new(vec![out_stream.clone()]);
    let muxer = Muxer::new(
        MuxerOptions::default(),
        output,
        workflow.events().clone(),
        workflow.closer().clone(),
    )
    .unwrap();
    let handler = muxer.new_pkt_handler(out_stream);
    workflow.add_node(muxer.clone());
    workflow.start();

    // Source timestamps 1000 and 2000 at 1/1000.
    let (pool, _closer) = common::standalone_pool();
    let descriptor = avflow::media::Descriptor::new(
        Rational::new(1, 1000),
        avflow::media::CodecType::Video,
    );
    let source = avflow::node::NodeMeta::new("demuxer_x", "Demuxer", "");
    for ts in [1000, 2000] {
        handler
            .handle(common::pkt_payload(&pool, descriptor, source.clone(), ts, 40))
            .await;
    }

    while probe.written_count() < 2 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    workflow.stop_and_wait().await;

    assert_eq!(
        *probe.written.lock().unwrap(),
        vec![(0, 90000, 90000), (0, 180000, 180000)]
    );
    assert_eq!(probe.header_writes.load(Ordering::SeqCst), 1);
    assert_eq!(probe.trailer_writes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn muxer_writes_header_and_trailer_once() {
    let workflow = Workflow::new("once");

    let out_stream = common::video_stream(0, Rational::new(1, 90000));
    let (output, probe) = MockOutput::new(vec![out_stream.clone()]);
    let muxer = Muxer::new(
        MuxerOptions::default(),
        output,
        workflow.events().clone(),
        workflow.closer().clone(),
    )
    .unwrap();
    workflow.add_node(muxer.clone());

    workflow.start();
    workflow.stop_and_wait().await;
    assert_eq!(muxer.base().state(), NodeState::Stopped);

    // Redundant start attempts on the stopped instance change nothing.
    muxer
        .clone()
        .start(workflow.token(), &avflow::node::TaskSet::new());

    assert_eq!(probe.header_writes.load(Ordering::SeqCst), 1);
    assert_eq!(probe.trailer_writes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn muxer_header_failure_stops_node() {
    let workflow = Workflow::new("badheader");
    let mut receiver = workflow.subscribe();

    let out_stream = common::video_stream(0, Rational::new(1, 90000));
    let (mut output, probe) = MockOutput::new(vec![out_stream.clone()]);
    output.fail_header = true;
    let muxer = Muxer::new(
        MuxerOptions::default(),
        output,
        workflow.events().clone(),
        workflow.closer().clone(),
    )
    .unwrap();
    workflow.add_node(muxer.clone());

    workflow.start();
    while muxer.base().state() != NodeState::Stopped {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    workflow.stop_and_wait().await;

    // The failure surfaced as an event and no trailer hook was installed.
    let mut saw_error = false;
    while let Some(event) = receiver.try_recv() {
        if let avflow::event::Event::NodeError { message, .. } = event {
            saw_error = saw_error || message.contains("I/O error");
        }
    }
    assert!(saw_error);
    assert_eq!(probe.trailer_writes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn muxer_write_failure_does_not_stop_node() {
    let workflow = Workflow::new("badwrite");
    let mut receiver = workflow.subscribe();

    let out_stream = common::video_stream(0, Rational::new(1, 90000));
    let (mut output, probe) = MockOutput::new(vec![out_stream.clone()]);
    output.fail_write_at = Some(0);
    let muxer = Muxer::new(
        MuxerOptions::default(),
        output,
        workflow.events().clone(),
        workflow.closer().clone(),
    )
    .unwrap();
    let handler = muxer.new_pkt_handler(out_stream);
    workflow.add_node(muxer.clone());
    workflow.start();

    let (pool, _closer) = common::standalone_pool();
    let descriptor = avflow::media::Descriptor::new(
        Rational::new(1, 1000),
        avflow::media::CodecType::Video,
    );
    let source = avflow::node::NodeMeta::new("demuxer_x", "Demuxer", "");
    for ts in [1000, 2000] {
        handler
            .handle(common::pkt_payload(&pool, descriptor, source.clone(), ts, 40))
            .await;
    }

    // The first write fails but the second lands: the node survives
    // transient write errors.
    while probe.written_count() < 1 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(muxer.base().state(), NodeState::Running);
    workflow.stop_and_wait().await;

    assert_eq!(*probe.written.lock().unwrap(), vec![(0, 180000, 180000)]);
    let mut saw_error = false;
    while let Some(event) = receiver.try_recv() {
        if let avflow::event::Event::NodeError { message, .. } = event {
            saw_error = saw_error || message.contains("Broken pipe");
        }
    }
    assert!(saw_error);
}

#[tokio::test]
async fn demuxer_routes_per_stream_connections() {
    let workflow = Workflow::new("streams");

    let video = common::video_stream(0, Rational::new(1, 90000));
    let audio = common::audio_stream(1);
    let packets = vec![
        FixturePkt::new(0, 0, 3000),
        FixturePkt::new(1, 0, 1024),
        FixturePkt::new(0, 3000, 3000),
        FixturePkt::new(1, 1024, 1024),
    ];
    let input = MockInput::new(vec![video, audio], packets);
    let demuxer = Demuxer::new(
        DemuxerOptions::default(),
        input,
        workflow.events().clone(),
        workflow.closer(),
    )
    .unwrap();

    let video_sink = CollectingPktHandler::new("video_sink");
    let audio_sink = CollectingPktHandler::new("audio_sink");
    demuxer.connect_for_stream(video_sink.clone(), 0);
    demuxer.connect_for_stream(audio_sink.clone(), 1);
    workflow.add_node(demuxer.clone());

    workflow.start();
    while demuxer.base().state() != NodeState::Stopped {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    workflow.stop_and_wait().await;

    assert_eq!(video_sink.dts_seen(), vec![0, 3000]);
    assert_eq!(audio_sink.dts_seen(), vec![0, 1024]);
}
