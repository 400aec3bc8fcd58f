//! Workflow execution runtime
//!
//! This crate provides the expression pool that drives live process trees,
//! the in-memory expression storage, the tokio-backed timeout scheduler and
//! the `Engine` facade that wires everything together.

mod engine;
mod pool;
mod scheduler;
mod storage;

pub use engine::{Engine, EngineConfig};
pub use pool::ExpressionPool;
pub use scheduler::TokioScheduler;
pub use storage::InMemoryStorage;
