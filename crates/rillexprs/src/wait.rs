use rillcore::{EngineContext, ExpressionBehavior, FlowError, FlowExpression, Workitem};

/// Parks until something cancels it: a timeout, a tag-addressed cancel or
/// a process-level cancel.
pub struct WaitExpression;

impl ExpressionBehavior for WaitExpression {
    fn expression_name(&self) -> &str {
        "wait"
    }

    fn apply(
        &self,
        expression: &mut FlowExpression,
        ctx: &EngineContext,
        _workitem: Workitem,
    ) -> Result<(), FlowError> {
        expression.persist(ctx)
    }
}
