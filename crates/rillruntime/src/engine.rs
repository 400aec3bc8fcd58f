use crate::pool::ExpressionPool;
use crate::scheduler::TokioScheduler;
use crate::storage::InMemoryStorage;
use rillcore::{
    BehaviorRegistry, CancelFlavour, EngineContext, ExpressionError, ExpressionStorage, Fei,
    FlowError, FlowEvent, PoolHandle, Tree, WorkQueue, Workitem,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Configuration for the engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub event_buffer_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: 1024,
        }
    }
}

/// Main entry point: wires the work queue, storage, scheduler and
/// expression pool together and drives process instances.
pub struct Engine {
    context: EngineContext,
    pool_task: JoinHandle<()>,
    terminal_events: tokio::sync::Mutex<broadcast::Receiver<FlowEvent>>,
}

impl Engine {
    /// Create an engine with default settings.
    pub fn new(registry: Arc<BehaviorRegistry>) -> Self {
        Self::with_config(registry, EngineConfig::default())
    }

    pub fn with_config(registry: Arc<BehaviorRegistry>, config: EngineConfig) -> Self {
        let queue = Arc::new(WorkQueue::new(config.event_buffer_size));
        let storage = Arc::new(InMemoryStorage::new());
        queue.add_observer(storage.clone());

        let (pool, receiver) = PoolHandle::new();
        let scheduler = Arc::new(TokioScheduler::new(pool.clone()));

        let context = EngineContext {
            queue: queue.clone(),
            storage,
            scheduler,
            pool,
            registry,
            engine_variables: Arc::new(RwLock::new(HashMap::new())),
        };

        let terminal_events = tokio::sync::Mutex::new(queue.subscribe());
        let pool_task = ExpressionPool::spawn(context.clone(), receiver);

        Self {
            context,
            pool_task,
            terminal_events,
        }
    }

    /// The shared collaborators, as handed to every expression method.
    pub fn context(&self) -> &EngineContext {
        &self.context
    }

    pub fn storage(&self) -> Arc<dyn ExpressionStorage> {
        self.context.storage.clone()
    }

    /// Launch a process instance; returns its workflow id.
    pub fn launch(
        &self,
        tree: Tree,
        fields: HashMap<String, Value>,
    ) -> Result<String, FlowError> {
        let wfid = Uuid::new_v4().to_string();
        let workitem = Workitem {
            fei: None,
            participant: None,
            fields,
        };
        self.context.pool.launch(wfid.clone(), tree, workitem)?;
        Ok(wfid)
    }

    /// Cancel a whole process instance by cancelling its root.
    pub fn cancel_process(&self, wfid: &str, flavour: CancelFlavour) -> Result<(), FlowError> {
        self.context
            .pool
            .cancel_expression(Fei::root(wfid), flavour)
    }

    /// Hand a participant's finished workitem back to its expression.
    pub fn reply(&self, workitem: Workitem) -> Result<(), FlowError> {
        let to = workitem
            .fei
            .clone()
            .ok_or(ExpressionError::MissingFei)?;
        self.context.pool.reply(workitem, to)
    }

    /// Subscribe to the engine's event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<FlowEvent> {
        self.context.queue.subscribe()
    }

    /// Block until the given process terminates or errors out.
    ///
    /// Uses a receiver opened at engine construction, so events emitted
    /// before the call are not missed.
    pub async fn wait_for(&self, wfid: &str) -> Result<Workitem, FlowError> {
        let mut receiver = self.terminal_events.lock().await;
        loop {
            match receiver.recv().await {
                Ok(FlowEvent::ProcessTerminated { wfid: w, workitem }) if w == wfid => {
                    return Ok(workitem);
                }
                Ok(FlowEvent::ProcessError { report })
                    if report.wfid == wfid && !report.handled =>
                {
                    return Err(FlowError::ProcessFailed {
                        wfid: report.wfid,
                        class: report.class,
                        message: report.payload.to_string(),
                    });
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("wait_for lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(FlowError::Queue("event stream closed".to_string()));
                }
            }
        }
    }

    /// Engine-global variables (the `//`-prefixed scope).
    pub fn set_variable(&self, name: impl Into<String>, value: Value) {
        self.context.set_engine_variable(name, value);
    }

    pub fn variable(&self, name: &str) -> Option<Value> {
        self.context.engine_variable(name)
    }

    /// Stop the dispatch loop. In-flight jobs are dropped.
    pub fn shutdown(&self) {
        self.pool_task.abort();
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.pool_task.abort();
    }
}
