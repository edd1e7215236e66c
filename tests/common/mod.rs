//! Shared fixtures for command bus integration tests

#![allow(dead_code)]

use command_bus::{BusError, Command, ErrorHandler, Handler, HandlerError};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Long enough for a blocked call to be considered stuck
pub const STUCK: Duration = Duration::from_millis(150);
/// Upper bound for anything expected to happen promptly
pub const PROMPT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCommand {
    pub id: u64,
}

impl TestCommand {
    pub fn new(id: u64) -> Self {
        Self { id }
    }

    /// The empty command
    pub fn empty() -> Self {
        Self { id: 0 }
    }
}

impl Command for TestCommand {
    fn is_empty(&self) -> bool {
        self.id == 0
    }
}

/// Records `(handler name, command id)` for every invocation
pub type CallLog = Arc<Mutex<Vec<(String, u64)>>>;

pub struct RecordingHandler {
    name: String,
    calls: CallLog,
    fail: bool,
}

impl RecordingHandler {
    pub fn ok(name: &str, calls: &CallLog) -> Arc<dyn Handler<TestCommand>> {
        Arc::new(Self {
            name: name.to_string(),
            calls: Arc::clone(calls),
            fail: false,
        })
    }

    pub fn failing(name: &str, calls: &CallLog) -> Arc<dyn Handler<TestCommand>> {
        Arc::new(Self {
            name: name.to_string(),
            calls: Arc::clone(calls),
            fail: true,
        })
    }
}

impl Handler<TestCommand> for RecordingHandler {
    fn handle(&self, command: &TestCommand) -> Result<(), HandlerError> {
        self.calls.lock().push((self.name.clone(), command.id));
        if self.fail {
            Err(anyhow::anyhow!("{} rejected command {}", self.name, command.id).into())
        } else {
            Ok(())
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Records every `(command id, error)` pair it observes
#[derive(Default, Clone)]
pub struct RecordingErrorHandler {
    pub seen: Arc<Mutex<Vec<(u64, BusError)>>>,
}

impl RecordingErrorHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_handler(&self) -> Arc<dyn ErrorHandler<TestCommand>> {
        Arc::new(self.clone())
    }

    pub fn count(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn ids_matching(&self, predicate: impl Fn(&BusError) -> bool) -> Vec<u64> {
        self.seen
            .lock()
            .iter()
            .filter(|(_, error)| predicate(error))
            .map(|(id, _)| *id)
            .collect()
    }
}

impl ErrorHandler<TestCommand> for RecordingErrorHandler {
    fn handle(&self, command: &TestCommand, error: &BusError) {
        self.seen.lock().push((command.id, error.clone()));
    }
}

/// Handler that blocks every command until released.
///
/// Each invocation announces itself on `started` and then waits for one token
/// on the release channel. Dropping the [`Gate`] releases everything.
pub struct GatedHandler {
    started: Sender<u64>,
    release: Receiver<()>,
    processed: Arc<Mutex<Vec<u64>>>,
}

pub struct Gate {
    pub started: Receiver<u64>,
    release: Option<Sender<()>>,
    pub processed: Arc<Mutex<Vec<u64>>>,
}

impl Gate {
    /// Let exactly one blocked command finish
    pub fn release_one(&self) {
        if let Some(release) = &self.release {
            release.send(()).expect("gated handler is gone");
        }
    }

    /// Let every current and future command through
    pub fn open(&mut self) {
        self.release.take();
    }

    pub fn processed(&self) -> Vec<u64> {
        self.processed.lock().clone()
    }
}

pub fn gated_handler() -> (Arc<dyn Handler<TestCommand>>, Gate) {
    let (started_tx, started_rx) = channel::unbounded();
    let (release_tx, release_rx) = channel::unbounded();
    let processed = Arc::new(Mutex::new(Vec::new()));

    let handler = GatedHandler {
        started: started_tx,
        release: release_rx,
        processed: Arc::clone(&processed),
    };
    let gate = Gate {
        started: started_rx,
        release: Some(release_tx),
        processed,
    };
    (Arc::new(handler), gate)
}

impl Handler<TestCommand> for GatedHandler {
    fn handle(&self, command: &TestCommand) -> Result<(), HandlerError> {
        let _ = self.started.send(command.id);
        // Err means the gate was opened for good
        let _ = self.release.recv();
        self.processed.lock().push(command.id);
        Ok(())
    }
}
