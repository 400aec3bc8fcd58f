use crate::expression::ExpressionBehavior;
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of available expression behaviors, keyed by tree name
pub struct BehaviorRegistry {
    behaviors: HashMap<String, Arc<dyn ExpressionBehavior>>,
}

impl BehaviorRegistry {
    pub fn new() -> Self {
        Self {
            behaviors: HashMap::new(),
        }
    }

    /// Register a behavior under its own expression name.
    pub fn register(&mut self, behavior: Arc<dyn ExpressionBehavior>) {
        let name = behavior.expression_name().to_string();
        tracing::info!("Registering expression: {}", name);
        self.behaviors.insert(name, behavior);
    }

    /// Register a behavior under an alias.
    pub fn register_as(&mut self, name: impl Into<String>, behavior: Arc<dyn ExpressionBehavior>) {
        self.behaviors.insert(name.into(), behavior);
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<dyn ExpressionBehavior>> {
        self.behaviors.get(name).cloned()
    }

    pub fn list_names(&self) -> Vec<String> {
        self.behaviors.keys().cloned().collect()
    }
}

impl Default for BehaviorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
