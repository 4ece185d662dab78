use crossbeam_channel::{Receiver, Sender};
use tracing::debug;

use crate::breakpoints::RuntimeBreakpoint;

/// Notifications raised by the runtime for the front end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeEvent {
    StopOnEntry,
    StopOnStep,
    End,
    BreakpointValidated(RuntimeBreakpoint),
}

impl RuntimeEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RuntimeEvent::StopOnEntry => "stopOnEntry",
            RuntimeEvent::StopOnStep => "stopOnStep",
            RuntimeEvent::End => "end",
            RuntimeEvent::BreakpointValidated(_) => "breakpointValidated",
        }
    }
}

/// Outbound side of the runtime's notification channel.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Sender<RuntimeEvent>,
}

impl EventSink {
    pub fn new() -> (Self, Receiver<RuntimeEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self { tx }, rx)
    }

    /// Start collecting the events of one operation.
    pub fn batch(&self) -> EventBatch<'_> {
        EventBatch {
            sink: self,
            events: Vec::new(),
        }
    }
}

/// Events raised by a single operation. They reach the channel, in order,
/// only when the batch is dropped at the end of that operation.
#[must_use]
pub struct EventBatch<'a> {
    sink: &'a EventSink,
    events: Vec<RuntimeEvent>,
}

impl EventBatch<'_> {
    pub fn push(&mut self, event: RuntimeEvent) {
        self.events.push(event);
    }
}

impl Drop for EventBatch<'_> {
    fn drop(&mut self) {
        for event in self.events.drain(..) {
            let name = event.name();
            if self.sink.tx.send(event).is_err() {
                debug!(event = name, "No listener for runtime event");
            }
        }
    }
}
