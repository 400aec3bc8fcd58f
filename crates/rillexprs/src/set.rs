use rillcore::{
    substitute, EngineContext, ExpressionBehavior, ExpressionError, FlowError, FlowExpression,
    Workitem,
};
use serde_json::Value;

/// Binds a variable (`var`) or a workitem field (`field`) to a value taken
/// from the `val` / `value` attribute or the text argument.
pub struct SetExpression;

impl ExpressionBehavior for SetExpression {
    fn expression_name(&self) -> &str {
        "set"
    }

    fn apply(
        &self,
        expression: &mut FlowExpression,
        ctx: &EngineContext,
        workitem: Workitem,
    ) -> Result<(), FlowError> {
        let mut workitem = workitem;
        let value = resolve_value(expression, &workitem);

        if let Some(var) = target_variable(expression) {
            expression.set_variable(ctx, &var, value)?;
        } else if let Some(field) = expression.attribute_str("field") {
            workitem.fields.insert(field, value);
        } else {
            return Err(ExpressionError::MissingAttribute("var".to_string()).into());
        }
        expression.reply_to_parent(ctx, workitem)
    }
}

/// Erases a variable (`var`) or a workitem field (`field`).
pub struct UnsetExpression;

impl ExpressionBehavior for UnsetExpression {
    fn expression_name(&self) -> &str {
        "unset"
    }

    fn apply(
        &self,
        expression: &mut FlowExpression,
        ctx: &EngineContext,
        workitem: Workitem,
    ) -> Result<(), FlowError> {
        let mut workitem = workitem;

        if let Some(var) = target_variable(expression) {
            expression.unset_variable(ctx, &var)?;
        } else if let Some(field) = expression.attribute_str("field") {
            workitem.fields.remove(&field);
        } else {
            return Err(ExpressionError::MissingAttribute("var".to_string()).into());
        }
        expression.reply_to_parent(ctx, workitem)
    }
}

fn target_variable(expression: &FlowExpression) -> Option<String> {
    expression
        .attribute_str("var")
        .or_else(|| expression.attribute_str("variable"))
}

fn resolve_value(expression: &FlowExpression, workitem: &Workitem) -> Value {
    if let Some(value) = expression
        .attribute("val")
        .or_else(|| expression.attribute("value"))
    {
        return match value {
            Value::String(s) => Value::String(substitute(s, workitem)),
            other => other.clone(),
        };
    }
    if let Some(text) = expression.current_tree().text_argument() {
        return Value::String(substitute(text, workitem));
    }
    Value::Null
}
