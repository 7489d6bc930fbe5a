use std::sync::{Arc, Mutex};
use tokio::{sync::oneshot, task};

use super::emitter::BusEmitter;
use super::event::Event;
use super::sink::{EventSink, StdOutSink};

/// Receives events from pipeline components and broadcasts them to sinks.
///
/// One bus serves a whole run; components hold cheap [`BusEmitter`] clones.
/// Broadcasting happens on a background task so emitters never block on slow
/// sinks.
pub struct EventBus {
    sinks: Arc<Mutex<Vec<Box<dyn EventSink>>>>,
    channel: (flume::Sender<Event>, flume::Receiver<Event>),
    listener: Mutex<Option<ListenerState>>,
}

struct ListenerState {
    shutdown: oneshot::Sender<()>,
    handle: task::JoinHandle<()>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_sink(StdOutSink)
    }
}

impl EventBus {
    pub fn with_sink<T: EventSink + 'static>(sink: T) -> Self {
        Self::with_sinks(vec![Box::new(sink)])
    }

    pub fn with_sinks(sinks: Vec<Box<dyn EventSink>>) -> Self {
        Self {
            sinks: Arc::new(Mutex::new(sinks)),
            channel: flume::unbounded(),
            listener: Mutex::new(None),
        }
    }

    /// Dynamically attach a sink, e.g. a per-request stream.
    pub fn add_sink<T: EventSink + 'static>(&self, sink: T) {
        self.sinks
            .lock()
            .expect("sinks poisoned")
            .push(Box::new(sink));
    }

    /// Hand out an emitter clone for a component.
    pub fn emitter(&self) -> BusEmitter {
        BusEmitter {
            sender: self.channel.0.clone(),
        }
    }

    /// Spawn the broadcast task. Idempotent.
    pub fn listen(&self) {
        let mut guard = self.listener.lock().expect("listener poisoned");
        if guard.is_some() {
            return;
        }

        let receiver = self.channel.1.clone();
        let sinks = Arc::clone(&self.sinks);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let handle = task::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    recv = receiver.recv_async() => match recv {
                        Err(_) => break,
                        Ok(event) => {
                            let mut sinks = sinks.lock().expect("sinks poisoned");
                            for sink in sinks.iter_mut() {
                                if let Err(e) = sink.handle(&event) {
                                    tracing::warn!(error = %e, "event sink rejected event");
                                }
                            }
                        }
                    }
                }
            }
        });

        *guard = Some(ListenerState {
            shutdown: shutdown_tx,
            handle,
        });
    }

    /// Stop the broadcast task after draining pending events.
    pub async fn shutdown(&self) {
        let state = self.listener.lock().expect("listener poisoned").take();
        if let Some(state) = state {
            // Drain what is already queued before signalling shutdown.
            while let Ok(event) = self.channel.1.try_recv() {
                let mut sinks = self.sinks.lock().expect("sinks poisoned");
                for sink in sinks.iter_mut() {
                    let _ = sink.handle(&event);
                }
            }
            let _ = state.shutdown.send(());
            let _ = state.handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::emitter::EventEmitter;
    use crate::event_bus::sink::MemorySink;

    #[tokio::test]
    async fn broadcasts_to_memory_sink() {
        let sink = MemorySink::new();
        let bus = EventBus::with_sink(sink.clone());
        bus.listen();

        let emitter = bus.emitter();
        emitter.emit(Event::diagnostic("test", "hello")).unwrap();
        emitter.emit(Event::progress("xtts-v2", 1024, Some(4096))).unwrap();

        // Give the listener a chance to drain, then shut down.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        bus.shutdown().await;

        let events = sink.snapshot();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].scope_label(), "test");
        assert_eq!(events[1].scope_label(), "progress");
    }
}
