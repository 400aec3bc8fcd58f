// crates/rillcore/src/events/mod.rs

mod iggy_bridge;
mod queue;

pub use iggy_bridge::{IggyBridgeConfig, IggyBridgeError, IggyEventBridge, IggyEventTap};
pub use queue::{Channel, ErrorReport, FlowEvent, QueueObserver, WorkQueue};
