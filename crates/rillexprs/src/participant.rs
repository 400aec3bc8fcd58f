use rillcore::{
    substitute, EngineContext, ExpressionBehavior, ExpressionError, FlowError, FlowEvent,
    FlowExpression, Workitem,
};

/// Hands the workitem to an external participant and waits
///
/// The participant name comes from the `ref` attribute or the text
/// argument, after `${...}` substitution and variable alias chasing. The
/// expression parks until the engine delivers the participant's reply back
/// to its fei.
pub struct ParticipantExpression;

impl ExpressionBehavior for ParticipantExpression {
    fn expression_name(&self) -> &str {
        "participant"
    }

    fn apply(
        &self,
        expression: &mut FlowExpression,
        ctx: &EngineContext,
        workitem: Workitem,
    ) -> Result<(), FlowError> {
        let raw = expression
            .attribute_str("ref")
            .or_else(|| {
                expression
                    .current_tree()
                    .text_argument()
                    .map(|s| s.to_string())
            })
            .ok_or_else(|| ExpressionError::MissingAttribute("ref".to_string()))?;

        let substituted = substitute(&raw, &workitem);
        let (name, _) = expression.iterative_var_lookup(ctx, &substituted);

        let mut workitem = workitem;
        workitem.participant = Some(name.clone());
        workitem.fei = Some(expression.fei.clone());

        tracing::info!("Dispatching {} to participant '{}'", expression.fei, name);
        ctx.queue.emit(FlowEvent::ParticipantDispatched {
            participant: name,
            workitem,
        });
        expression.persist(ctx)
    }
}
