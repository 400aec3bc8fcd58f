use crate::fei::Fei;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// The flow-level payload carried between expressions
///
/// `fei` names the expression the workitem currently belongs to (or the
/// child that just replied, when delivered as a reply). Cloning a workitem
/// is a deep copy; branches never alias each other's fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Workitem {
    pub fei: Option<Fei>,
    pub participant: Option<String>,
    pub fields: HashMap<String, Value>,
}

impl Workitem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}
