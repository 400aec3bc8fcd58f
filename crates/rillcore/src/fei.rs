use serde::{Deserialize, Serialize};
use std::fmt;

/// Flow expression identifier
///
/// Uniquely addresses a live expression inside an engine. `expid` encodes
/// the dotted path from the process root (`"0"`, `"0.1.2"`, ...) and
/// `child_id` is the expression's index among its siblings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fei {
    pub wfid: String,
    pub expid: String,
    pub child_id: usize,
}

impl Fei {
    /// The identifier of a process root.
    pub fn root(wfid: impl Into<String>) -> Self {
        Self {
            wfid: wfid.into(),
            expid: "0".to_string(),
            child_id: 0,
        }
    }

    /// Derive the identifier of the `index`-th child of this expression.
    pub fn child(&self, index: usize) -> Self {
        Self {
            wfid: self.wfid.clone(),
            expid: format!("{}.{}", self.expid, index),
            child_id: index,
        }
    }
}

impl fmt::Display for Fei {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.wfid, self.expid, self.child_id)
    }
}
