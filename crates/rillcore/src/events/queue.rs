use crate::expression::FlowExpression;
use crate::fei::Fei;
use crate::pool::ApplyRequest;
use crate::tree::Tree;
use crate::workitem::Workitem;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;

/// Logical channels of the work queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Channel {
    Expressions,
    Variables,
    Participants,
    Processes,
    Errors,
}

/// Events published on the work queue during flow execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FlowEvent {
    ExpressionUpdated {
        expression: Box<FlowExpression>,
    },
    ExpressionDeleted {
        fei: Fei,
    },
    Forgotten {
        fei: Fei,
        parent: Option<Fei>,
    },
    EnteredTag {
        tag: String,
        fei: Fei,
    },
    LeftTag {
        tag: String,
        fei: Fei,
    },
    VariableSet {
        var: String,
        fei: Fei,
    },
    VariableUnset {
        var: String,
        fei: Fei,
    },
    ParticipantDispatched {
        participant: String,
        workitem: Workitem,
    },
    ProcessLaunched {
        wfid: String,
    },
    ProcessTerminated {
        wfid: String,
        workitem: Workitem,
    },
    ProcessError {
        report: ErrorReport,
    },
}

impl FlowEvent {
    pub fn channel(&self) -> Channel {
        match self {
            FlowEvent::ExpressionUpdated { .. }
            | FlowEvent::ExpressionDeleted { .. }
            | FlowEvent::Forgotten { .. }
            | FlowEvent::EnteredTag { .. }
            | FlowEvent::LeftTag { .. } => Channel::Expressions,
            FlowEvent::VariableSet { .. } | FlowEvent::VariableUnset { .. } => Channel::Variables,
            FlowEvent::ParticipantDispatched { .. } => Channel::Participants,
            FlowEvent::ProcessLaunched { .. } | FlowEvent::ProcessTerminated { .. } => {
                Channel::Processes
            }
            FlowEvent::ProcessError { .. } => Channel::Errors,
        }
    }
}

/// An error published on the `Errors` channel
///
/// `resume` is the apply message needed to re-run the failed expression.
/// Flow-level timeouts are reported with class `TimeoutError`, the timeout
/// attribute as payload and the synthetic stack trace `["---"]` -- they mark
/// a flow event, not a crash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    pub class: String,
    pub payload: Value,
    pub wfid: String,
    pub fei: Fei,
    pub stacktrace: Vec<String>,
    pub resume: Option<ApplyRequest>,
    /// True when the pool escalated the error into an `on_error` handler;
    /// the process is expected to recover.
    pub handled: bool,
}

impl ErrorReport {
    /// The process tree the report was raised from, if resumable.
    pub fn tree(&self) -> Option<&Tree> {
        self.resume.as_ref().map(|r| &r.tree)
    }
}

/// Synchronous subscriber invoked from `emit_sync` before the method that
/// published the event returns.
pub trait QueueObserver: Send + Sync {
    fn observes(&self, channel: Channel) -> bool;
    fn on_event(&self, event: &FlowEvent);
}

/// The engine's event bus
///
/// `emit` is a best-effort broadcast to async subscribers. `emit_sync`
/// additionally delivers the event inline to the registered observers
/// (storage among them), so their side effects are committed before the
/// emitting method returns.
pub struct WorkQueue {
    sender: broadcast::Sender<FlowEvent>,
    observers: RwLock<Vec<Arc<dyn QueueObserver>>>,
}

impl WorkQueue {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            observers: RwLock::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FlowEvent> {
        self.sender.subscribe()
    }

    pub fn add_observer(&self, observer: Arc<dyn QueueObserver>) {
        self.observers
            .write()
            .expect("observer list poisoned")
            .push(observer);
    }

    /// Best-effort publish; dropped when nobody listens.
    pub fn emit(&self, event: FlowEvent) {
        let _ = self.sender.send(event);
    }

    /// Publish with synchronous observer delivery.
    pub fn emit_sync(&self, event: FlowEvent) {
        let channel = event.channel();
        {
            let observers = self.observers.read().expect("observer list poisoned");
            for observer in observers.iter() {
                if observer.observes(channel) {
                    observer.on_event(&event);
                }
            }
        }
        let _ = self.sender.send(event);
    }
}
