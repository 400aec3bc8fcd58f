use serde::de::Deserializer;
use serde::ser::{SerializeTuple, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A node of a process definition
///
/// Serialized as the triple `[name, attributes, children]`. An attribute
/// whose value is `null` is a "text" argument (`["echo", {"hello": null}, []]`
/// echoes `hello`).
#[derive(Debug, Clone, PartialEq)]
pub struct Tree {
    pub name: String,
    pub attributes: HashMap<String, Value>,
    pub children: Vec<Tree>,
}

impl Tree {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: HashMap::new(),
            children: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Add a null-valued attribute, turning `text` into the text argument.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.attributes.insert(text.into(), Value::Null);
        self
    }

    pub fn with_child(mut self, child: Tree) -> Self {
        self.children.push(child);
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    /// Attribute rendered as a string, if present and scalar.
    pub fn attribute_str(&self, name: &str) -> Option<String> {
        match self.attributes.get(name) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Bool(b)) => Some(b.to_string()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }

    /// The first null-valued attribute key, if any.
    pub fn text_argument(&self) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(_, v)| v.is_null())
            .map(|(k, _)| k.as_str())
    }
}

impl Serialize for Tree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut triple = serializer.serialize_tuple(3)?;
        triple.serialize_element(&self.name)?;
        triple.serialize_element(&self.attributes)?;
        triple.serialize_element(&self.children)?;
        triple.end()
    }
}

impl<'de> Deserialize<'de> for Tree {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (name, attributes, children) =
            <(String, HashMap<String, Value>, Vec<Tree>)>::deserialize(deserializer)?;
        Ok(Tree {
            name,
            attributes,
            children,
        })
    }
}
