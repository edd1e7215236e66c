//! # Worker Pool
//!
//! Fixed-size pool of OS threads draining the async command queue. Every
//! worker runs the same handler chain as the synchronous path and exits only
//! when it dequeues an [`Envelope::Stop`] (or the queue disconnects), after
//! which it acknowledges on the shutdown rendezvous channel.
//!
//! Workers hold the [`Dispatch`] context and their own channel ends, never
//! the bus, so a bus dropped without `shutdown` still closes the queue.

use crossbeam::channel::{Receiver, Sender};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info, trace};

use super::stats::StatsCounters;
use super::{Dispatch, HandlerChain, Inner};
use crate::error::{BusError, Result};
use crate::handler::Command;

/// Entry of the async command queue
pub(crate) enum Envelope<C> {
    Work(C),
    /// Tells exactly one worker to exit
    Stop,
}

/// Spawn `pool_size` workers sharing `receiver`.
///
/// `live_workers` is incremented once per successful spawn, so a failure part
/// way through leaves the count matching the threads actually running.
pub(super) fn spawn_workers<C: Command>(
    inner: &Arc<Inner<C>>,
    pool_size: usize,
    handlers: &HandlerChain<C>,
    receiver: &Receiver<Envelope<C>>,
) -> Result<()> {
    let mut workers = inner.workers.lock();

    for index in 0..pool_size {
        let worker = Worker {
            index,
            dispatch: Arc::clone(&inner.dispatch),
            handlers: Arc::clone(handlers),
            receiver: receiver.clone(),
            closed_tx: inner.closed_tx.clone(),
        };

        let spawned = thread::Builder::new()
            .name(format!("command-bus-worker-{index}"))
            .spawn(move || worker.run());

        match spawned {
            Ok(handle) => {
                workers.push(handle);
                inner.live_workers.fetch_add(1, Ordering::AcqRel);
                StatsCounters::incr(&inner.dispatch.stats.workers_started);
            }
            Err(e) => {
                error!(
                    worker = index,
                    pool_size = pool_size,
                    error = %e,
                    "❌ POOL: Failed to spawn worker"
                );
                return Err(BusError::from(e));
            }
        }
    }

    info!(pool_size = pool_size, "🏊 POOL: Worker pool started");
    Ok(())
}

struct Worker<C> {
    index: usize,
    dispatch: Arc<Dispatch<C>>,
    handlers: HandlerChain<C>,
    receiver: Receiver<Envelope<C>>,
    closed_tx: Sender<()>,
}

impl<C: Command> Worker<C> {
    fn run(self) {
        let Worker {
            index,
            dispatch,
            handlers,
            receiver,
            closed_tx,
        } = self;
        debug!(worker = index, "POOL: Worker started");

        for envelope in receiver.iter() {
            match envelope {
                Envelope::Work(command) => {
                    trace!(worker = index, "POOL: Processing command");
                    // Failures already reached the error handlers
                    let _ = dispatch.run_chain(&handlers, &command);
                }
                Envelope::Stop => break,
            }
        }
        drop(receiver);

        debug!(worker = index, "POOL: Worker exiting");
        // Fails only when the bus was dropped without shutdown
        if closed_tx.send(()).is_err() {
            debug!(worker = index, "POOL: Bus gone, exiting without acknowledgment");
        }
    }
}
