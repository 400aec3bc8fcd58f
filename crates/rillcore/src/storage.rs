use crate::error::FlowError;
use crate::expression::FlowExpression;
use crate::fei::Fei;

/// Persistence for live expressions, keyed by identifier
///
/// The storage owns the canonical copy of every expression; in-memory
/// instances are working copies. `parent()` lookups go through here, never
/// through object pointers, which keeps the tree acyclic and persistable.
pub trait ExpressionStorage: Send + Sync {
    fn get(&self, fei: &Fei) -> Option<FlowExpression>;
    fn put(&self, expression: &FlowExpression) -> Result<(), FlowError>;
    fn remove(&self, fei: &Fei);
    fn size(&self) -> usize;

    /// Identifiers of every stored expression of one process instance.
    fn feis_for(&self, wfid: &str) -> Vec<Fei>;
}
