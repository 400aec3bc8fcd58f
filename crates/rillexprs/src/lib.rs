//! Standard expression library
//!
//! The built-in constructs every process definition can use. Each one is a
//! thin `ExpressionBehavior`: all lifecycle bookkeeping lives in the
//! flow-expression base.

mod concurrence;
mod define;
mod echo;
mod participant;
mod sequence;
mod set;
mod wait;

pub use concurrence::ConcurrenceExpression;
pub use define::DefineExpression;
pub use echo::EchoExpression;
pub use participant::ParticipantExpression;
pub use sequence::SequenceExpression;
pub use set::{SetExpression, UnsetExpression};
pub use wait::WaitExpression;

use rillcore::BehaviorRegistry;
use std::sync::Arc;

/// Register all standard expressions with a registry
pub fn register_all(registry: &mut BehaviorRegistry) {
    let define = Arc::new(DefineExpression);
    registry.register(define.clone());
    registry.register_as("process-definition", define);
    registry.register(Arc::new(SequenceExpression));
    registry.register(Arc::new(ConcurrenceExpression));
    registry.register(Arc::new(ParticipantExpression));
    registry.register(Arc::new(SetExpression));
    registry.register(Arc::new(UnsetExpression));
    registry.register(Arc::new(EchoExpression));
    registry.register(Arc::new(WaitExpression));
}

/// A registry pre-populated with the standard expressions.
pub fn standard_registry() -> BehaviorRegistry {
    let mut registry = BehaviorRegistry::new();
    register_all(&mut registry);
    registry
}
