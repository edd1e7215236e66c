//! # Command Bus
//!
//! In-process dispatcher that runs every submitted command through an ordered
//! chain of [`Handler`]s, either inline on the caller's thread
//! ([`CommandBus::handle`]) or on a fixed pool of worker threads draining a
//! bounded queue ([`CommandBus::handle_async`]).
//!
//! ## Lifecycle
//!
//! ```text
//! new ──configure──▶ initialize ──▶ operational ──shutdown──▶ stopped
//!  ▲                                                              │
//!  └──────────────────────── initialize again ◀───────────────────┘
//! ```
//!
//! Lifecycle flags are atomics. `initialize` and `shutdown` each flip their
//! flag with a compare-and-swap under the `lifecycle` mutex, so only one
//! caller performs a transition and a drain never overlaps a pool being
//! built. Submitters never take that lock, nor any lock while running
//! handlers or waiting on the queue.
//!
//! ## Example
//!
//! ```
//! use command_bus::{BusError, Command, CommandBus, Handler, HandlerError};
//! use std::sync::Arc;
//!
//! struct CreateOrder {
//!     sku: String,
//! }
//!
//! impl Command for CreateOrder {
//!     fn is_empty(&self) -> bool {
//!         self.sku.is_empty()
//!     }
//! }
//!
//! let bus = CommandBus::new();
//! bus.set_pool_size(2);
//!
//! let validate = |cmd: &CreateOrder| -> Result<(), HandlerError> {
//!     if cmd.sku.starts_with("SKU-") {
//!         Ok(())
//!     } else {
//!         Err("unknown sku".into())
//!     }
//! };
//! let handlers: Vec<Arc<dyn Handler<CreateOrder>>> = vec![Arc::new(validate)];
//! bus.initialize(handlers).unwrap();
//!
//! bus.handle(CreateOrder { sku: "SKU-1".into() }).unwrap();
//! bus.handle_async(CreateOrder { sku: "SKU-2".into() }).unwrap();
//! assert!(matches!(
//!     bus.handle(CreateOrder { sku: String::new() }),
//!     Err(BusError::InvalidCommand)
//! ));
//!
//! bus.shutdown();
//! assert_eq!(bus.live_workers(), 0);
//! ```
mod pool;
mod shutdown;
mod stats;

pub use stats::BusStats;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::config::BusConfig;
use crate::error::{BusError, Result};
use crate::handler::{Command, ErrorHandler, Handler};
use pool::Envelope;
use stats::StatsCounters;

type HandlerChain<C> = Arc<[Arc<dyn Handler<C>>]>;
type ErrorHandlerChain<C> = Arc<[Arc<dyn ErrorHandler<C>>]>;

/// Queue and handler chain built by `initialize`, torn down by `shutdown`
struct Pipeline<C> {
    handlers: HandlerChain<C>,
    sender: Sender<Envelope<C>>,
    receiver: Receiver<Envelope<C>>,
}

/// The part of the bus worker threads need to process commands.
///
/// Workers never hold the bus itself, so dropping the last [`CommandBus`]
/// handle always drops [`Inner`].
pub(crate) struct Dispatch<C> {
    error_handlers: RwLock<ErrorHandlerChain<C>>,
    stats: StatsCounters,
}

pub(crate) struct Inner<C> {
    pool_size: AtomicUsize,
    queue_capacity: AtomicUsize,
    initialized: AtomicBool,
    /// Set by the first successful `initialize`, never cleared
    ever_initialized: AtomicBool,
    shutting_down: AtomicBool,
    live_workers: AtomicUsize,
    pipeline: RwLock<Option<Pipeline<C>>>,
    /// Serializes configuration, pool setup and pool teardown
    lifecycle: Mutex<()>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    closed_tx: Sender<()>,
    closed_rx: Receiver<()>,
    dispatch: Arc<Dispatch<C>>,
}

/// Handle to a command bus. Clones share the same bus.
///
/// Dropping the last handle without calling [`shutdown`](Self::shutdown)
/// closes the queue: workers finish the commands already queued and exit
/// on their own, without being joined.
pub struct CommandBus<C: Command> {
    inner: Arc<Inner<C>>,
}

impl<C: Command> Clone for CommandBus<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Command> Default for CommandBus<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Command> fmt::Debug for CommandBus<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandBus")
            .field("pool_size", &self.pool_size())
            .field("queue_capacity", &self.queue_capacity())
            .field("initialized", &self.is_initialized())
            .field("shutting_down", &self.is_shutting_down())
            .field("live_workers", &self.live_workers())
            .finish()
    }
}

impl<C: Command> CommandBus<C> {
    /// Bus with one worker per logical processor and a queue of 100
    pub fn new() -> Self {
        Self::with_config(BusConfig::default())
    }

    pub fn with_config(config: BusConfig) -> Self {
        if let Err(e) = config.validate() {
            warn!(error = %e, "⚠️ BUS: Invalid configuration, using a single worker");
        }
        let (closed_tx, closed_rx) = channel::bounded(0);

        Self {
            inner: Arc::new(Inner {
                pool_size: AtomicUsize::new(config.pool_size.max(1)),
                queue_capacity: AtomicUsize::new(config.queue_capacity),
                initialized: AtomicBool::new(false),
                ever_initialized: AtomicBool::new(false),
                shutting_down: AtomicBool::new(false),
                live_workers: AtomicUsize::new(0),
                pipeline: RwLock::new(None),
                lifecycle: Mutex::new(()),
                workers: Mutex::new(Vec::new()),
                closed_tx,
                closed_rx,
                dispatch: Arc::new(Dispatch {
                    error_handlers: RwLock::new(Arc::from(Vec::new())),
                    stats: StatsCounters::default(),
                }),
            }),
        }
    }

    /// Number of workers spawned by the next `initialize`.
    ///
    /// Ignored once the bus is initialized; zero is always ignored.
    pub fn set_pool_size(&self, pool_size: usize) {
        if pool_size == 0 {
            warn!("⚠️ BUS: Ignoring pool size of 0, at least one worker is required");
            return;
        }
        if let Some(_lifecycle) = self.configurable("pool_size") {
            self.inner.pool_size.store(pool_size, Ordering::Release);
        }
    }

    /// Capacity of the async queue allocated by the next `initialize`.
    ///
    /// A capacity of 0 makes every `handle_async` wait for an idle worker.
    /// Ignored once the bus is initialized.
    pub fn set_queue_capacity(&self, queue_capacity: usize) {
        if let Some(_lifecycle) = self.configurable("queue_capacity") {
            self.inner
                .queue_capacity
                .store(queue_capacity, Ordering::Release);
        }
    }

    /// Replace the error handlers. Ignored once the bus is initialized.
    pub fn set_error_handlers<I>(&self, error_handlers: I)
    where
        I: IntoIterator<Item = Arc<dyn ErrorHandler<C>>>,
    {
        if let Some(_lifecycle) = self.configurable("error_handlers") {
            *self.inner.dispatch.error_handlers.write() = error_handlers.into_iter().collect();
        }
    }

    /// Lifecycle guard for a setter, or `None` once the bus is initialized.
    ///
    /// The flag is checked before and after locking: the first check keeps a
    /// handler running during a drain from waiting on the lock, the second
    /// closes the window against a racing `initialize`.
    fn configurable(&self, setting: &str) -> Option<MutexGuard<'_, ()>> {
        if !self.is_initialized() {
            let lifecycle = self.inner.lifecycle.lock();
            if !self.is_initialized() {
                return Some(lifecycle);
            }
        }
        debug!(setting = setting, "BUS: Already initialized - ignoring setting");
        None
    }

    /// Build the queue and start the worker pool.
    ///
    /// Only the first caller performs the setup and gets `Ok(true)`; every
    /// other call until the next completed `shutdown` is a no-op returning
    /// `Ok(false)` and its handlers are dropped.
    #[instrument(skip_all)]
    pub fn initialize<I>(&self, handlers: I) -> Result<bool>
    where
        I: IntoIterator<Item = Arc<dyn Handler<C>>>,
    {
        if self.is_initialized() {
            debug!("BUS: Already initialized - ignoring initialize call");
            return Ok(false);
        }

        let _lifecycle = self.inner.lifecycle.lock();
        if self
            .inner
            .initialized
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("BUS: Already initialized - ignoring initialize call");
            return Ok(false);
        }
        self.inner.ever_initialized.store(true, Ordering::Release);

        let handlers: HandlerChain<C> = handlers.into_iter().collect();
        let pool_size = self.pool_size();
        let queue_capacity = self.queue_capacity();
        let (sender, receiver) = channel::bounded(queue_capacity);

        info!(
            pool_size = pool_size,
            queue_capacity = queue_capacity,
            handlers = handlers.len(),
            "🚀 BUS: Initializing command bus"
        );

        let spawned = pool::spawn_workers(&self.inner, pool_size, &handlers, &receiver);

        *self.inner.pipeline.write() = Some(Pipeline {
            handlers,
            sender,
            receiver,
        });

        let _ = self.inner.shutting_down.compare_exchange(
            true,
            false,
            Ordering::AcqRel,
            Ordering::Acquire,
        );

        spawned.map(|()| true)
    }

    /// Queue `command` for a worker.
    ///
    /// Blocks while the queue is full. Handler failures are only reported to
    /// the error handlers; the returned error is a validation rejection.
    pub fn handle_async(&self, command: C) -> Result<()> {
        self.inner.validate(&command)?;

        let sender = self
            .inner
            .pipeline
            .read()
            .as_ref()
            .map(|p| p.sender.clone());
        let Some(sender) = sender else {
            return Err(self.inner.reject(&command, self.inner.missing_pipeline()));
        };

        match sender.send(Envelope::Work(command)) {
            Ok(()) => Ok(()),
            Err(channel::SendError(Envelope::Work(command))) => {
                Err(self.inner.reject(&command, BusError::ShuttingDown))
            }
            Err(channel::SendError(Envelope::Stop)) => Err(BusError::ShuttingDown),
        }
    }

    /// Run the handler chain on the calling thread.
    pub fn handle(&self, command: C) -> Result<()> {
        self.inner.validate(&command)?;

        let handlers = self
            .inner
            .pipeline
            .read()
            .as_ref()
            .map(|p| Arc::clone(&p.handlers));
        let Some(handlers) = handlers else {
            return Err(self.inner.reject(&command, self.inner.missing_pipeline()));
        };

        self.inner.dispatch.run_chain(&handlers, &command)
    }

    /// Retire every worker and tear down the queue.
    ///
    /// The first caller blocks until all workers have exited; concurrent and
    /// later callers return once that drain is over. Must not be called from
    /// a handler running on a worker thread.
    #[instrument(skip_all)]
    pub fn shutdown(&self) {
        if self.is_shutting_down() {
            debug!("BUS: Shutdown already in progress - ignoring");
            return;
        }

        let _lifecycle = self.inner.lifecycle.lock();
        if self
            .inner
            .shutting_down
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("BUS: Shutdown already in progress - ignoring");
            return;
        }

        self.inner.drain();
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::Acquire)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::Acquire)
    }

    /// Number of worker loops currently running
    pub fn live_workers(&self) -> usize {
        self.inner.live_workers.load(Ordering::Acquire)
    }

    pub fn pool_size(&self) -> usize {
        self.inner.pool_size.load(Ordering::Acquire)
    }

    pub fn queue_capacity(&self) -> usize {
        self.inner.queue_capacity.load(Ordering::Acquire)
    }

    /// Entries waiting in the async queue
    pub fn queued(&self) -> usize {
        self.inner
            .pipeline
            .read()
            .as_ref()
            .map_or(0, |p| p.receiver.len())
    }

    pub fn stats(&self) -> BusStats {
        self.inner.dispatch.stats.snapshot()
    }
}

impl<C: Command> Inner<C> {
    /// Validation gate shared by both submit paths
    fn validate(&self, command: &C) -> Result<()> {
        let rejection = if command.is_empty() {
            BusError::InvalidCommand
        } else if !self.ever_initialized.load(Ordering::Acquire) {
            BusError::NotInitialized
        } else if self.shutting_down.load(Ordering::Acquire) {
            BusError::ShuttingDown
        } else if !self.initialized.load(Ordering::Acquire) {
            BusError::NotInitialized
        } else {
            return Ok(());
        };

        Err(self.reject(command, rejection))
    }

    /// Rejection for a caller that passed the gate while the pipeline was
    /// being built or torn down
    fn missing_pipeline(&self) -> BusError {
        if self.shutting_down.load(Ordering::Acquire) {
            BusError::ShuttingDown
        } else {
            BusError::NotInitialized
        }
    }

    fn reject(&self, command: &C, error: BusError) -> BusError {
        StatsCounters::incr(&self.dispatch.stats.commands_rejected);
        debug!(error = %error, "BUS: Command rejected");
        self.dispatch.broadcast(command, &error);
        error
    }
}

impl<C> Drop for Inner<C> {
    fn drop(&mut self) {
        let live = *self.live_workers.get_mut();
        if live == 0 {
            return;
        }

        // Dropping the only queue sender lets workers drain and exit
        self.pipeline.get_mut().take();
        warn!(
            live_workers = live,
            "⚠️ BUS: Dropped without shutdown, workers exit once the queue is empty"
        );
    }
}

impl<C: Command> Dispatch<C> {
    /// Run `handlers` in order, stopping at the first failure
    fn run_chain(&self, handlers: &[Arc<dyn Handler<C>>], command: &C) -> Result<()> {
        for handler in handlers {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(command)));

            let error = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(source)) => BusError::handler_failed(handler.name(), source),
                Err(payload) => BusError::HandlerPanicked {
                    handler: handler.name().to_string(),
                    message: panic_message(payload.as_ref()),
                },
            };

            StatsCounters::incr(&self.stats.commands_failed);
            debug!(handler = handler.name(), error = %error, "BUS: Handler failed");
            self.broadcast(command, &error);
            return Err(error);
        }

        StatsCounters::incr(&self.stats.commands_handled);
        Ok(())
    }

    fn broadcast(&self, command: &C, error: &BusError) {
        let error_handlers = self.error_handlers.read().clone();

        for error_handler in error_handlers.iter() {
            let observed =
                panic::catch_unwind(AssertUnwindSafe(|| error_handler.handle(command, error)));
            if observed.is_err() {
                error!(error = %error, "❌ BUS: Error handler panicked");
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
