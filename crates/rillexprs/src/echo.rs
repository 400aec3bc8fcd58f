use rillcore::{
    substitute, EngineContext, ExpressionBehavior, FlowError, FlowExpression, Workitem,
};

/// Logs its substituted text argument and replies right away.
pub struct EchoExpression;

impl ExpressionBehavior for EchoExpression {
    fn expression_name(&self) -> &str {
        "echo"
    }

    fn apply(
        &self,
        expression: &mut FlowExpression,
        ctx: &EngineContext,
        workitem: Workitem,
    ) -> Result<(), FlowError> {
        let text = expression
            .current_tree()
            .text_argument()
            .unwrap_or("")
            .to_string();
        let message = substitute(&text, &workitem);
        tracing::info!("echo [{}] {}", expression.fei, message);
        expression.reply_to_parent(ctx, workitem)
    }
}
