use rillcore::{EngineContext, ExpressionBehavior, FlowError, FlowExpression, Workitem};

/// Runs all children at once and yields once the last one replied.
///
/// The reply carried upward is the last child reply received; earlier
/// branches' field edits are superseded where they collide.
pub struct ConcurrenceExpression;

impl ExpressionBehavior for ConcurrenceExpression {
    fn expression_name(&self) -> &str {
        "concurrence"
    }

    fn apply(
        &self,
        expression: &mut FlowExpression,
        ctx: &EngineContext,
        workitem: Workitem,
    ) -> Result<(), FlowError> {
        let count = expression.current_tree().children.len();
        if count == 0 {
            return expression.reply_to_parent(ctx, workitem);
        }
        for index in 0..count {
            ctx.pool.apply_child(expression, index, workitem.clone(), false)?;
        }
        expression.persist(ctx)
    }

    fn reply(
        &self,
        expression: &mut FlowExpression,
        ctx: &EngineContext,
        workitem: Workitem,
    ) -> Result<(), FlowError> {
        if expression.children.is_empty() {
            expression.reply_to_parent(ctx, workitem)
        } else {
            expression.persist(ctx)
        }
    }
}
