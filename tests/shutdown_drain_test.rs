//! Queue backpressure and the best-effort drain performed by shutdown

mod common;

use command_bus::{BusConfig, BusError, CommandBus};
use common::*;
use crossbeam::channel::{self, RecvTimeoutError};
use std::thread;

fn gated_bus(pool_size: usize, queue_capacity: usize) -> (CommandBus<TestCommand>, Gate) {
    let bus = CommandBus::with_config(BusConfig {
        pool_size,
        queue_capacity,
    });
    let (handler, gate) = gated_handler();
    bus.initialize(vec![handler]).unwrap();
    (bus, gate)
}

#[test]
fn full_queue_blocks_submitter_until_a_slot_frees() {
    let capacity = 3;
    let (bus, mut gate) = gated_bus(1, capacity);

    // Occupy the only worker
    bus.handle_async(TestCommand::new(1)).unwrap();
    assert_eq!(gate.started.recv_timeout(PROMPT).unwrap(), 1);

    for id in 2..=(capacity as u64 + 1) {
        bus.handle_async(TestCommand::new(id)).unwrap();
    }
    assert_eq!(bus.queued(), capacity);

    let (done_tx, done_rx) = channel::bounded(1);
    let submitter = {
        let bus = bus.clone();
        thread::spawn(move || {
            let result = bus.handle_async(TestCommand::new(99));
            done_tx.send(result).unwrap();
        })
    };

    assert_eq!(
        done_rx.recv_timeout(STUCK).unwrap_err(),
        RecvTimeoutError::Timeout
    );

    // Finishing command 1 lets the worker take command 2, freeing a slot
    gate.release_one();
    assert!(done_rx.recv_timeout(PROMPT).unwrap().is_ok());
    submitter.join().unwrap();

    gate.open();
    bus.shutdown();

    let mut processed = gate.processed();
    processed.sort_unstable();
    assert_eq!(processed, vec![1, 2, 3, 4, 99]);
}

#[test]
fn command_queued_ahead_of_stop_is_still_processed() {
    let (bus, mut gate) = gated_bus(1, 4);

    bus.handle_async(TestCommand::new(1)).unwrap();
    assert_eq!(gate.started.recv_timeout(PROMPT).unwrap(), 1);
    bus.handle_async(TestCommand::new(2)).unwrap();

    let stopper = {
        let bus = bus.clone();
        thread::spawn(move || bus.shutdown())
    };
    while !bus.is_shutting_down() {
        thread::yield_now();
    }

    // Submissions after shutdown began are rejected at the gate
    assert!(matches!(
        bus.handle_async(TestCommand::new(3)),
        Err(BusError::ShuttingDown)
    ));

    gate.open();
    stopper.join().unwrap();

    assert_eq!(gate.processed(), vec![1, 2]);
    assert_eq!(bus.stats().commands_discarded, 0);
    assert_eq!(bus.stats().commands_rejected, 1);
    assert_eq!(bus.live_workers(), 0);
}

#[test]
fn every_command_racing_shutdown_is_accounted_for() {
    let bus = CommandBus::with_config(BusConfig {
        pool_size: 1,
        queue_capacity: 1,
    });
    let errors = RecordingErrorHandler::new();
    bus.set_error_handlers([errors.as_handler()]);
    let (handler, mut gate) = gated_handler();
    bus.initialize(vec![handler]).unwrap();

    bus.handle_async(TestCommand::new(1)).unwrap();
    assert_eq!(gate.started.recv_timeout(PROMPT).unwrap(), 1);
    bus.handle_async(TestCommand::new(2)).unwrap();

    // Blocks on the full queue, racing the Stop entry for the next slot
    let racer = {
        let bus = bus.clone();
        thread::spawn(move || bus.handle_async(TestCommand::new(3)))
    };
    thread::sleep(STUCK);

    let stopper = {
        let bus = bus.clone();
        thread::spawn(move || bus.shutdown())
    };
    while !bus.is_shutting_down() {
        thread::yield_now();
    }

    gate.open();
    let racer_result = racer.join().unwrap();
    stopper.join().unwrap();

    let processed = gate.processed();
    let reported = errors.ids_matching(|e| matches!(e, BusError::ShuttingDown));
    assert_eq!(&processed[..2], &[1, 2]);

    let seen_three = processed.iter().filter(|id| **id == 3).count()
        + reported.iter().filter(|id| **id == 3).count();
    assert_eq!(seen_three, 1, "command 3 must be processed or reported exactly once");
    if racer_result.is_err() {
        assert_eq!(reported, vec![3]);
    }
    assert_eq!(bus.live_workers(), 0);
}

#[test]
fn zero_capacity_queue_hands_commands_directly_to_workers() {
    let (bus, mut gate) = gated_bus(1, 0);

    let (done_tx, done_rx) = channel::bounded(2);
    let submitter = {
        let bus = bus.clone();
        thread::spawn(move || {
            done_tx.send(bus.handle_async(TestCommand::new(1))).unwrap();
            done_tx.send(bus.handle_async(TestCommand::new(2))).unwrap();
        })
    };

    // The worker takes command 1, command 2 waits for it to come back
    assert!(done_rx.recv_timeout(PROMPT).unwrap().is_ok());
    assert_eq!(
        done_rx.recv_timeout(STUCK).unwrap_err(),
        RecvTimeoutError::Timeout
    );

    gate.open();
    assert!(done_rx.recv_timeout(PROMPT).unwrap().is_ok());
    submitter.join().unwrap();

    bus.shutdown();
    assert_eq!(gate.processed(), vec![1, 2]);
}
