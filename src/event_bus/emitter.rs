use std::fmt;
use thiserror::Error;

use super::event::Event;

/// Cloneable handle components use to publish events without knowing about
/// sinks. Emission is synchronous and non-blocking; a full or closed bus is
/// reported, never waited on.
pub trait EventEmitter: Send + Sync + fmt::Debug {
    fn emit(&self, event: Event) -> Result<(), EmitterError>;
}

/// Errors that can occur when emitting an event.
#[derive(Debug, Error)]
pub enum EmitterError {
    #[error("event bus closed")]
    Closed,
    #[error("event emission failed: {0}")]
    Other(String),
}

/// Emitter backed by the bus's flume channel.
#[derive(Clone, Debug)]
pub struct BusEmitter {
    pub(super) sender: flume::Sender<Event>,
}

impl EventEmitter for BusEmitter {
    fn emit(&self, event: Event) -> Result<(), EmitterError> {
        self.sender.send(event).map_err(|_| EmitterError::Closed)
    }
}

/// Emitter that discards everything. Useful for pure-function tests that do
/// not care about observability output.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopEmitter;

impl EventEmitter for NoopEmitter {
    fn emit(&self, _event: Event) -> Result<(), EmitterError> {
        Ok(())
    }
}
