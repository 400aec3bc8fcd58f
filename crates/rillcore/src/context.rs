use crate::error::{ExpressionError, FlowError};
use crate::events::WorkQueue;
use crate::expression::ExpressionBehavior;
use crate::pool::PoolHandle;
use crate::registry::BehaviorRegistry;
use crate::scheduler::Scheduler;
use crate::storage::ExpressionStorage;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Shared collaborators handed to every expression method
///
/// Expressions do not own a context reference; persisted state never
/// includes one. The pool passes a context into each call, and a reloaded
/// expression works against whatever context the engine currently runs.
#[derive(Clone)]
pub struct EngineContext {
    pub queue: Arc<WorkQueue>,
    pub storage: Arc<dyn ExpressionStorage>,
    pub scheduler: Arc<dyn Scheduler>,
    pub pool: PoolHandle,
    pub registry: Arc<BehaviorRegistry>,
    pub engine_variables: Arc<RwLock<HashMap<String, Value>>>,
}

impl EngineContext {
    /// Resolve the behavior for an expression name.
    pub fn behavior(&self, name: &str) -> Result<Arc<dyn ExpressionBehavior>, FlowError> {
        self.registry
            .lookup(name)
            .ok_or_else(|| ExpressionError::UnknownExpression(name.to_string()).into())
    }

    pub fn engine_variable(&self, name: &str) -> Option<Value> {
        self.engine_variables
            .read()
            .expect("engine variables poisoned")
            .get(name)
            .cloned()
    }

    pub fn set_engine_variable(&self, name: impl Into<String>, value: Value) {
        self.engine_variables
            .write()
            .expect("engine variables poisoned")
            .insert(name.into(), value);
    }

    pub fn unset_engine_variable(&self, name: &str) {
        self.engine_variables
            .write()
            .expect("engine variables poisoned")
            .remove(name);
    }
}
