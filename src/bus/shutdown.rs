//! # Shutdown Coordinator
//!
//! Retires the worker pool one worker at a time: push one `Stop`, wait for one
//! acknowledgment on the rendezvous channel, decrement the live count. Only
//! then is the queue torn down and `initialized` cleared.

use std::sync::atomic::Ordering;
use tracing::{debug, error, info, warn};

use super::pool::Envelope;
use super::stats::StatsCounters;
use super::Inner;
use crate::error::BusError;
use crate::handler::Command;

impl<C: Command> Inner<C> {
    /// Run by the single caller that won the `shutting_down` transition,
    /// with the `lifecycle` lock held
    pub(super) fn drain(&self) {
        let live = self.live_workers.load(Ordering::Acquire);
        info!(live_workers = live, "🛑 SHUTDOWN: Draining worker pool");

        let retired = self.retire_workers();
        self.join_workers();
        let discarded = self.teardown_queue();

        let _ = self
            .initialized
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire);

        info!(
            retired = retired,
            discarded = discarded,
            "✅ SHUTDOWN: Command bus stopped"
        );
    }

    fn retire_workers(&self) -> usize {
        let Some(sender) = self.pipeline.read().as_ref().map(|p| p.sender.clone()) else {
            return 0;
        };

        let mut retired = 0;
        while self.live_workers.load(Ordering::Acquire) > 0 {
            if sender.send(Envelope::Stop).is_err() {
                error!("❌ SHUTDOWN: Command queue disconnected before all workers retired");
                break;
            }
            if self.closed_rx.recv().is_err() {
                error!("❌ SHUTDOWN: Rendezvous channel closed");
                break;
            }

            let remaining = self.live_workers.fetch_sub(1, Ordering::AcqRel) - 1;
            StatsCounters::incr(&self.dispatch.stats.workers_retired);
            retired += 1;
            debug!(remaining = remaining, "SHUTDOWN: Worker retired");
        }

        retired
    }

    fn join_workers(&self) {
        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                error!("❌ SHUTDOWN: Worker thread panicked");
            }
        }
    }

    /// Drop the queue, reporting every command that never reached a worker.
    ///
    /// Blocks until every in-flight `handle_async` caller has released its
    /// sender, so a command racing the teardown is either drained here or was
    /// rejected at the gate.
    fn teardown_queue(&self) -> usize {
        let Some(pipeline) = self.pipeline.write().take() else {
            return 0;
        };
        let receiver = pipeline.receiver;
        drop(pipeline.sender);

        let mut discarded = 0;
        for envelope in receiver.iter() {
            if let Envelope::Work(command) = envelope {
                discarded += 1;
                StatsCounters::incr(&self.dispatch.stats.commands_discarded);
                self.dispatch.broadcast(&command, &BusError::ShuttingDown);
            }
        }

        if discarded > 0 {
            warn!(
                discarded = discarded,
                "⚠️ SHUTDOWN: Discarded queued commands that no worker picked up"
            );
        }
        discarded
    }
}
