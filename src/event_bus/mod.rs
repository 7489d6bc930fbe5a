//! Structured observability for pipeline runs.
//!
//! Components publish [`Event`]s through a cloneable [`EventEmitter`]; an
//! [`EventBus`] broadcasts them to [`EventSink`]s on a background task.
//! Formatting lives entirely in the sinks: the pipeline core emits data,
//! not log lines.

mod bus;
mod emitter;
mod event;
mod sink;

pub use bus::EventBus;
pub use emitter::{BusEmitter, EmitterError, EventEmitter, NoopEmitter};
pub use event::{DiagnosticEvent, Event, ProgressEvent, StageEvent, WarningEvent};
pub use sink::{ChannelSink, EventSink, MemorySink, SinkError, StdOutSink};
