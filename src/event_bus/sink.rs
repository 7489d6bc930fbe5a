use std::fmt;
use std::sync::{Arc, Mutex};

use super::event::Event;

/// Destination for broadcast events. Sinks own all formatting decisions;
/// the pipeline core only hands them structured [`Event`] values.
pub trait EventSink: Send + Sync {
    fn handle(&mut self, event: &Event) -> Result<(), SinkError>;
}

#[derive(Debug)]
pub struct SinkError(pub String);

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sink error: {}", self.0)
    }
}

impl std::error::Error for SinkError {}

/// Renders each event on stdout using its `Display` form.
#[derive(Debug, Default)]
pub struct StdOutSink;

impl EventSink for StdOutSink {
    fn handle(&mut self, event: &Event) -> Result<(), SinkError> {
        println!("{event}");
        Ok(())
    }
}

/// Collects events in memory. The shared buffer makes it easy for tests to
/// assert on the exact event sequence a component produced.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<Event>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<Event> {
        self.events.lock().expect("memory sink poisoned").clone()
    }
}

impl EventSink for MemorySink {
    fn handle(&mut self, event: &Event) -> Result<(), SinkError> {
        self.events
            .lock()
            .map_err(|e| SinkError(e.to_string()))?
            .push(event.clone());
        Ok(())
    }
}

/// Forwards events into a flume channel, e.g. for streaming over a socket.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: flume::Sender<Event>,
}

impl ChannelSink {
    pub fn new(sender: flume::Sender<Event>) -> Self {
        Self { sender }
    }
}

impl EventSink for ChannelSink {
    fn handle(&mut self, event: &Event) -> Result<(), SinkError> {
        self.sender
            .send(event.clone())
            .map_err(|e| SinkError(e.to_string()))
    }
}
