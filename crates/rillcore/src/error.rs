use crate::fei::Fei;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Expression error: {0}")]
    Expression(#[from] ExpressionError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Work queue error: {0}")]
    Queue(String),

    #[error("Process {wfid} failed: {class}: {message}")]
    ProcessFailed {
        wfid: String,
        class: String,
        message: String,
    },
}

#[derive(Error, Debug, Clone)]
pub enum ExpressionError {
    #[error("Unknown expression: {0}")]
    UnknownExpression(String),

    #[error("Missing required attribute: {0}")]
    MissingAttribute(String),

    #[error("No child at index {index} under {fei}")]
    NoSuchChild { fei: Fei, index: usize },

    #[error("Expression not found: {0}")]
    NotFound(Fei),

    #[error("Invalid duration: {0}")]
    InvalidDuration(String),

    #[error("Workitem carries no expression identifier")]
    MissingFei,
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to serialize expression {fei}: {source}")]
    Serialize {
        fei: Fei,
        source: serde_json::Error,
    },

    #[error("Corrupt record for expression {fei}: {source}")]
    Deserialize {
        fei: Fei,
        source: serde_json::Error,
    },
}
