#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Command Bus
//!
//! In-process command dispatcher with a bounded worker pool.
//!
//! ## Overview
//!
//! Callers submit commands either synchronously ([`CommandBus::handle`]), where
//! the handler chain runs on the calling thread and the first failure is
//! returned, or asynchronously ([`CommandBus::handle_async`]), where the command
//! is queued for a fixed pool of worker threads and failures only surface
//! through the registered [`ErrorHandler`]s.
//!
//! ## Key Features
//!
//! - **Lock-free lifecycle**: initialize and shutdown are single atomic
//!   transitions; losers of either race are no-ops
//! - **Backpressure**: `handle_async` blocks while the bounded queue is full
//! - **Graceful shutdown**: workers are retired one at a time through `Stop`
//!   queue entries and a rendezvous channel, none is left running
//! - **Accounting**: every rejection, handler failure, and command abandoned by
//!   a shutdown reaches the error handlers
//! - **Re-initialization**: a stopped bus can be initialized again
//!
//! ## Module Organization
//!
//! - [`bus`] - The dispatcher core, worker pool, and shutdown coordinator
//! - [`handler`] - `Command`, `Handler`, and `ErrorHandler` contracts
//! - [`config`] - Pool and queue configuration
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured console logging setup

pub mod bus;
pub mod config;
pub mod error;
pub mod handler;
pub mod logging;

pub use crate::bus::{BusStats, CommandBus};
pub use crate::config::BusConfig;
pub use crate::error::{BusError, ConfigError, HandlerError, Result};
pub use crate::handler::{Command, ErrorHandler, Handler, TracingErrorHandler};
