use rillcore::{
    Channel, ExpressionStorage, Fei, FlowError, FlowEvent, FlowExpression, QueueObserver,
    StorageError,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;

/// In-memory expression storage
///
/// Records are kept serialized, so every write round-trips the expression
/// through JSON -- the same shape a durable backend would persist. The
/// storage subscribes to the `Expressions` channel and is fed synchronously
/// by `persist` / `unpersist`.
pub struct InMemoryStorage {
    records: RwLock<HashMap<Fei, Value>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl ExpressionStorage for InMemoryStorage {
    fn get(&self, fei: &Fei) -> Option<FlowExpression> {
        let records = self.records.read().expect("storage lock poisoned");
        let record = records.get(fei)?;
        match serde_json::from_value(record.clone()) {
            Ok(expression) => Some(expression),
            Err(e) => {
                tracing::error!("Corrupt record for {}: {}", fei, e);
                None
            }
        }
    }

    fn put(&self, expression: &FlowExpression) -> Result<(), FlowError> {
        let record = serde_json::to_value(expression).map_err(|e| StorageError::Serialize {
            fei: expression.fei.clone(),
            source: e,
        })?;
        self.records
            .write()
            .expect("storage lock poisoned")
            .insert(expression.fei.clone(), record);
        Ok(())
    }

    fn remove(&self, fei: &Fei) {
        self.records
            .write()
            .expect("storage lock poisoned")
            .remove(fei);
    }

    fn size(&self) -> usize {
        self.records.read().expect("storage lock poisoned").len()
    }

    fn feis_for(&self, wfid: &str) -> Vec<Fei> {
        self.records
            .read()
            .expect("storage lock poisoned")
            .keys()
            .filter(|fei| fei.wfid == wfid)
            .cloned()
            .collect()
    }
}

impl QueueObserver for InMemoryStorage {
    fn observes(&self, channel: Channel) -> bool {
        channel == Channel::Expressions
    }

    fn on_event(&self, event: &FlowEvent) {
        match event {
            FlowEvent::ExpressionUpdated { expression } => {
                if let Err(e) = self.put(expression) {
                    tracing::error!("Failed to store {}: {}", expression.fei, e);
                }
            }
            FlowEvent::ExpressionDeleted { fei } => self.remove(fei),
            _ => {}
        }
    }
}
