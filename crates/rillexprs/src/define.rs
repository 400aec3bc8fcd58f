use crate::sequence;
use rillcore::{EngineContext, ExpressionBehavior, FlowError, FlowExpression, Workitem};
use std::collections::HashMap;

/// A process definition: introduces a variable scope, records its own
/// `name` as a variable, then runs its children like a sequence.
pub struct DefineExpression;

impl ExpressionBehavior for DefineExpression {
    fn expression_name(&self) -> &str {
        "define"
    }

    fn apply(
        &self,
        expression: &mut FlowExpression,
        ctx: &EngineContext,
        workitem: Workitem,
    ) -> Result<(), FlowError> {
        if expression.variables.is_none() {
            expression.variables = Some(HashMap::new());
        }
        if let Some(name) = expression.attribute_str("name") {
            let tree_value = serde_json::to_value(expression.current_tree())?;
            expression.set_variable(ctx, &name, tree_value)?;
        }
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
        sequence::step(expression, ctx, workitem)
    }
}
