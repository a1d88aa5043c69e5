//! Integration tests for graphs spread over several nodes
//!
//! Every rank runs on its own thread with a sibling `ExecutionContext`,
//! builds the same graph and executes only its own steps.

mod common;

use common::builders::{Medium, PipelineBuilder};
use common::run_on_ranks;
use serial_test::serial;
use std::sync::Barrier;
use std::time::{Duration, Instant};
use stepgraph::graph::EdgeId;
use stepgraph::prelude::*;
use stepgraph::work::WorkState;

const PASSES: u64 = 5;

fn split_pipeline(medium: Medium, nodes: [u32; 3], size: u32) -> Vec<Vec<Vec<f64>>> {
    run_on_ranks(size, |ctx| {
        let log = RecordLog::new();
        let mut graph = PipelineBuilder::new("split", &log)
            .ramp(1.0)
            .nodes(nodes)
            .medium(medium)
            .build(&ctx);
        graph.preprocess(&ctx).unwrap();
        graph.run(PASSES).unwrap();
        graph.postprocess().unwrap();
        log.values()
    })
}

fn expected() -> Vec<Vec<f64>> {
    (1..=PASSES)
        .map(|n| {
            let n = n as f64;
            vec![2.0 * (1.0 + n), 2.0 * (2.0 + n), 2.0 * (3.0 + n)]
        })
        .collect()
}

#[test]
fn test_two_nodes_over_memory() {
    let logs = split_pipeline(Medium::Memory, [0, 1, 1], 2);
    assert!(logs[0].is_empty(), "rank 0 runs no sink");
    assert_eq!(logs[1], expected());
}

#[test]
fn test_two_nodes_over_shared_memory() {
    let logs = split_pipeline(Medium::SharedMemory, [0, 0, 1], 2);
    assert!(logs[0].is_empty());
    assert_eq!(logs[1], expected());
}

#[test]
fn test_three_nodes_over_fabric() {
    let logs = split_pipeline(Medium::Fabric, [0, 1, 2], 3);
    assert!(logs[0].is_empty());
    assert!(logs[1].is_empty());
    assert_eq!(logs[2], expected());
}

#[test]
fn test_each_rank_runs_only_its_steps() {
    let states = run_on_ranks(2, |ctx| {
        let log = RecordLog::new();
        let mut graph = PipelineBuilder::new("states", &log)
            .nodes([0, 1, 1])
            .build(&ctx);
        graph.preprocess(&ctx).unwrap();
        graph.run(1).unwrap();
        ["source", "scale", "sink"].map(|name| graph.find_step(name).unwrap().state())
    });

    assert_eq!(
        states[0],
        [WorkState::Ready, WorkState::Uninitialized, WorkState::Uninitialized]
    );
    assert_eq!(
        states[1],
        [WorkState::Uninitialized, WorkState::Ready, WorkState::Ready]
    );
}

#[test]
#[serial]
fn test_slow_consumer_throttles_producer() {
    const DELAY: Duration = Duration::from_millis(20);
    const N: u64 = 15;

    let elapsed = run_on_ranks(2, |ctx| {
        let log = RecordLog::new();
        let mut graph = PipelineBuilder::new("throttle", &log)
            .nodes([0, 0, 1])
            .build_with_recorder(&ctx, |r| r.with_delay(DELAY));
        graph.preprocess(&ctx).unwrap();
        let start = Instant::now();
        graph.run(N).unwrap();
        let elapsed = start.elapsed();
        graph.postprocess().unwrap();
        (elapsed, log.len())
    });

    let (producer, _) = elapsed[0];
    let (consumer, received) = elapsed[1];
    assert_eq!(received, N as usize);
    assert!(consumer >= DELAY * N as u32);
    // The producer may run ahead by what the link buffers, no further.
    assert!(
        producer >= DELAY * (N as u32 - 4),
        "producer finished in {:?}, faster than the consumer allows",
        producer
    );
}

#[test]
#[serial]
fn test_cancel_unblocks_waiting_consumer() {
    let barrier = Barrier::new(2);
    let results = run_on_ranks(2, |ctx| {
        let log = RecordLog::new();
        let mut graph = PipelineBuilder::new("stalled", &log)
            .nodes([0, 1, 1])
            .build(&ctx);
        graph.preprocess(&ctx).unwrap();

        let outcome = if ctx.rank() == 0 {
            // Never produce; cancel once the consumer is waiting.
            std::thread::sleep(Duration::from_millis(100));
            ctx.cancel_token().cancel();
            None
        } else {
            Some(graph.process().unwrap_err().class())
        };
        barrier.wait();
        outcome
    });

    assert_eq!(results[1], Some(ErrorClass::Cancelled));
}

/// source (rank 0) → recorder (rank 1) over a one-frame memory link, so a
/// second unread message leaves the producer's write pending.
fn one_slot_link(
    ctx: &ExecutionContext,
    name: &str,
    log: &RecordLog,
    delay: Duration,
    mode: TransferMode,
) -> (Composite, EdgeId) {
    let mut graph = Composite::new(name);
    let src = graph
        .add_block(Step::from_prototype("source", VectorSource::new(vec![1.0, 2.0, 3.0]).unwrap().with_ramp(1.0)))
        .unwrap();
    let sink = graph
        .add_block(Step::from_prototype("sink", Recorder::new(3, log.clone()).unwrap().with_delay(delay)).on_node(1))
        .unwrap();
    let key = format!("{}/source-sink", name);
    let connection = Connection::new(&key, Box::new(MemoryChannel::with_capacity(ctx, &key, 1))).with_mode(mode);
    let edge = graph.connect(src, 0, sink, 0, connection).unwrap();
    (graph, edge)
}

fn ramp(passes: u64) -> Vec<Vec<f64>> {
    (1..=passes)
        .map(|n| {
            let n = n as f64;
            vec![1.0 + n, 2.0 + n, 3.0 + n]
        })
        .collect()
}

#[test]
#[serial]
fn test_non_blocking_writer_waits_then_flushes() {
    const DELAY: Duration = Duration::from_millis(20);
    const N: u64 = 10;

    let results = run_on_ranks(2, |ctx| {
        let log = RecordLog::new();
        // Only the producer side of the edge is non-blocking.
        let mode = if ctx.rank() == 0 { TransferMode::NonBlocking } else { TransferMode::Blocking };
        let (mut graph, edge) = one_slot_link(&ctx, "nb-writer", &log, DELAY, mode);
        graph.preprocess(&ctx).unwrap();

        let start = Instant::now();
        graph.run(N).unwrap();
        let elapsed = start.elapsed();
        let sent = graph.connection(edge).unwrap().stats().messages_sent;
        graph.postprocess().unwrap();
        (elapsed, sent, log.values())
    });

    let (producer, sent, _) = &results[0];
    let (_, _, received) = &results[1];
    assert_eq!(*sent, N);
    // Every pass past the link's buffer waited for the previous write.
    assert!(
        *producer >= DELAY * (N as u32 - 4),
        "producer finished in {:?} without waiting for the consumer",
        producer
    );
    // The last write was still pending after `run` and went out in postprocess.
    assert_eq!(*received, ramp(N));
}

#[test]
#[serial]
fn test_non_blocking_reader_keeps_stale_input() {
    let barrier = Barrier::new(2);
    let results = run_on_ranks(2, |ctx| {
        let log = RecordLog::new();
        let (mut graph, edge) = one_slot_link(&ctx, "nb-reader", &log, Duration::ZERO, TransferMode::NonBlocking);
        graph.preprocess(&ctx).unwrap();

        // Nothing sent yet: the consumer runs on its zeroed input.
        if ctx.rank() == 1 {
            graph.process().unwrap();
        }
        barrier.wait();
        if ctx.rank() == 0 {
            graph.process().unwrap();
        }
        barrier.wait();
        // One message arrives, then the next pass finds nothing new.
        if ctx.rank() == 1 {
            graph.run(2).unwrap();
        }
        barrier.wait();

        let received = graph.connection(edge).unwrap().stats().messages_received;
        graph.postprocess().unwrap();
        (received, log.values())
    });

    let (received, values) = &results[1];
    assert_eq!(*received, 1);
    assert_eq!(
        *values,
        vec![vec![0.0, 0.0, 0.0], vec![2.0, 3.0, 4.0], vec![2.0, 3.0, 4.0]]
    );
}

#[test]
#[serial]
fn test_non_blocking_writer_blocks_when_consumer_stops() {
    let results = run_on_ranks(2, |ctx| {
        let log = RecordLog::new();
        let (mut graph, _) = one_slot_link(&ctx, "nb-stalled", &log, Duration::ZERO, TransferMode::NonBlocking);
        graph.preprocess(&ctx).unwrap();

        if ctx.rank() == 1 {
            // Take whatever arrives for a while, then stop reading.
            std::thread::sleep(Duration::from_millis(50));
            graph.process().unwrap();
            std::thread::sleep(Duration::from_millis(100));
            ctx.cancel_token().cancel();
            None
        } else {
            let err = graph.run(PASSES * 10).unwrap_err();
            Some((err.class(), graph.stats().passes))
        }
    });

    let (class, passes) = results[0].unwrap();
    assert_eq!(class, ErrorClass::Cancelled);
    // One message consumed, one buffered, one pending; the next pass waits.
    assert!(passes <= 3, "producer completed {} passes", passes);
}
