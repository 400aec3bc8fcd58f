//! Core abstractions for the rillflow workflow engine
//!
//! This crate provides the fundamental types every other component depends
//! on: expression identifiers, process trees, workitems, the work-queue
//! event model, and the flow-expression base that implements the shared
//! lifecycle protocol (apply / reply / cancel / fail), lexical variable
//! scoping, tags, timeouts and handler dispatch.

mod condition;
mod context;
mod duration;
mod error;
mod events;
mod expression;
mod fei;
mod pool;
mod registry;
mod scheduler;
mod storage;
mod tree;
mod workitem;

pub use condition::{apply_allowed, eval_condition, substitute, truthy};
pub use context::EngineContext;
pub use duration::parse_duration;
pub use error::{ExpressionError, FlowError, StorageError};
pub use events::{
    Channel, ErrorReport, FlowEvent, IggyBridgeConfig, IggyBridgeError, IggyEventBridge,
    IggyEventTap, QueueObserver, WorkQueue,
};
pub use expression::{
    CancelFlavour, ExpressionBehavior, ExpressionState, FlowExpression, HandlerKind, HandlerSpec,
};
pub use fei::Fei;
pub use pool::{ApplyRequest, PoolHandle, PoolJob};
pub use registry::BehaviorRegistry;
pub use scheduler::{JobId, Scheduler};
pub use storage::ExpressionStorage;
pub use tree::Tree;
pub use workitem::Workitem;

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
