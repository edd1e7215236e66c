//! # Handler Contracts
//!
//! The capability traits the bus consumes. Implementations are supplied by the
//! embedding application; plain closures implement both traits.

use tracing::warn;

use crate::error::{BusError, HandlerError};

/// A unit of work submitted to the bus.
///
/// The bus prescribes no structure beyond one question: is this an empty
/// command? Empty commands are rejected by the validation gate with
/// [`BusError::InvalidCommand`] and never reach a handler.
pub trait Command: Send + 'static {
    fn is_empty(&self) -> bool {
        false
    }
}

/// `None` is the empty command.
impl<T: Send + 'static> Command for Option<T> {
    fn is_empty(&self) -> bool {
        self.is_none()
    }
}

/// One processing step of the handler chain.
///
/// Handlers run in registration order; the first error halts the chain.
pub trait Handler<C>: Send + Sync {
    fn handle(&self, command: &C) -> Result<(), HandlerError>;

    /// Name used in logs and in [`BusError::HandlerFailed`]
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

impl<C, F> Handler<C> for F
where
    F: Fn(&C) -> Result<(), HandlerError> + Send + Sync,
{
    fn handle(&self, command: &C) -> Result<(), HandlerError> {
        self(command)
    }
}

/// Side-effecting observer of every rejection and handler failure.
pub trait ErrorHandler<C>: Send + Sync {
    fn handle(&self, command: &C, error: &BusError);
}

impl<C, F> ErrorHandler<C> for F
where
    F: Fn(&C, &BusError) + Send + Sync,
{
    fn handle(&self, command: &C, error: &BusError) {
        self(command, error)
    }
}

/// Error handler that reports every failure through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorHandler;

impl<C> ErrorHandler<C> for TracingErrorHandler {
    fn handle(&self, _command: &C, error: &BusError) {
        warn!(
            error = %error,
            rejected = error.is_rejection(),
            "⚠️ BUS: Command failed"
        );
    }
}
