use rillcore::{EngineContext, ExpressionBehavior, FlowError, FlowExpression, Workitem};

/// Runs its children one after the other, passing the workitem along.
pub struct SequenceExpression;

impl ExpressionBehavior for SequenceExpression {
    fn expression_name(&self) -> &str {
        "sequence"
    }

    fn apply(
        &self,
        expression: &mut FlowExpression,
        ctx: &EngineContext,
        workitem: Workitem,
    ) -> Result<(), FlowError> {
        if expression.current_tree().children.is_empty() {
            return expression.reply_to_parent(ctx, workitem);
        }
        ctx.pool.apply_child(expression, 0, workitem, false)?;
        expression.persist(ctx)
    }

    fn reply(
        &self,
        expression: &mut FlowExpression,
        ctx: &EngineContext,
        workitem: Workitem,
    ) -> Result<(), FlowError> {
        step(expression, ctx, workitem)
    }
}

/// Apply the child after the one that just replied, or yield to the parent
/// when the current tree is exhausted.
pub(crate) fn step(
    expression: &mut FlowExpression,
    ctx: &EngineContext,
    workitem: Workitem,
) -> Result<(), FlowError> {
    let next = workitem.fei.as_ref().map(|f| f.child_id + 1).unwrap_or(0);
    if next < expression.current_tree().children.len() {
        ctx.pool.apply_child(expression, next, workitem, false)?;
        expression.persist(ctx)
    } else {
        expression.reply_to_parent(ctx, workitem)
    }
}
