use rillcore::{
    ApplyRequest, EngineContext, ErrorReport, ExpressionStorage, Fei, FlowError, FlowEvent,
    FlowExpression, HandlerKind, PoolJob, Workitem,
};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

/// The expression pool's dispatch loop
///
/// One job at a time, run to completion: an expression method never sees
/// another expression mid-mutation, and every state change is persisted
/// before the next job is picked up. Hook errors never unwind the loop;
/// they are reported on the `Errors` channel and escalated to the nearest
/// `on_error` owner.
pub struct ExpressionPool;

impl ExpressionPool {
    pub fn spawn(ctx: EngineContext, receiver: UnboundedReceiver<PoolJob>) -> JoinHandle<()> {
        tokio::spawn(Self::run(ctx, receiver))
    }

    async fn run(ctx: EngineContext, mut receiver: UnboundedReceiver<PoolJob>) {
        tracing::debug!("Expression pool dispatch loop started");
        while let Some(job) = receiver.recv().await {
            Self::dispatch(&ctx, job);
        }
        tracing::debug!("Expression pool dispatch loop stopped");
    }

    fn dispatch(ctx: &EngineContext, job: PoolJob) {
        match job {
            PoolJob::Launch {
                wfid,
                tree,
                workitem,
            } => {
                tracing::info!("Launching process {} ({})", wfid, tree.name);
                ctx.queue.emit(FlowEvent::ProcessLaunched { wfid: wfid.clone() });
                Self::apply(
                    ctx,
                    ApplyRequest {
                        fei: Fei::root(wfid),
                        parent: None,
                        tree,
                        workitem,
                        // the root owns the process scope
                        variables: Some(HashMap::new()),
                        triggered_by: None,
                    },
                );
            }
            PoolJob::Apply(request) => Self::apply(ctx, request),
            PoolJob::Reply { to, workitem } => Self::reply(ctx, to, workitem),
            PoolJob::Cancel { fei, flavour } => match ctx.storage.get(&fei) {
                Some(mut expression) => {
                    if let Err(e) = expression.do_cancel(ctx, flavour) {
                        Self::handle_error(ctx, expression, e);
                    }
                }
                None => tracing::debug!("Cancel for missing expression {}, ignoring", fei),
            },
        }
    }

    fn apply(ctx: &EngineContext, request: ApplyRequest) {
        let workitem = request.workitem.clone();
        let mut expression = FlowExpression::new(
            request.fei,
            request.parent,
            request.tree,
            request.workitem,
            request.variables,
            request.triggered_by,
        );
        if let Err(e) = expression.do_apply(ctx, workitem) {
            Self::handle_error(ctx, expression, e);
        }
    }

    fn reply(ctx: &EngineContext, to: Fei, workitem: Workitem) {
        match ctx.storage.get(&to) {
            Some(mut expression) => {
                if let Err(e) = expression.do_reply(ctx, workitem) {
                    Self::handle_error(ctx, expression, e);
                }
            }
            None => tracing::warn!("Reply target {} not found, dropping reply", to),
        }
    }

    /// Report a hook failure and route it to the nearest `on_error` owner.
    /// An expression applied *as* an error handler never re-fires its own
    /// handler; escalation restarts from its parent.
    fn handle_error(ctx: &EngineContext, mut expression: FlowExpression, error: FlowError) {
        tracing::error!("Expression {} failed: {}", expression.fei, error);

        let owner = if expression.triggered_by == Some(HandlerKind::OnError) {
            expression
                .parent(ctx)
                .and_then(|p| p.lookup_on(ctx, HandlerKind::OnError))
        } else {
            expression.lookup_on(ctx, HandlerKind::OnError)
        };

        let report = ErrorReport {
            class: error_class(&error).to_string(),
            payload: Value::String(error.to_string()),
            wfid: expression.fei.wfid.clone(),
            fei: expression.fei.clone(),
            stacktrace: Vec::new(),
            resume: Some(ApplyRequest {
                fei: expression.fei.clone(),
                parent: expression.parent_id.clone(),
                tree: expression.current_tree().clone(),
                workitem: expression.applied_workitem.clone(),
                variables: expression.variables.clone(),
                triggered_by: expression.triggered_by,
            }),
            handled: owner.is_some(),
        };
        ctx.queue.emit(FlowEvent::ProcessError { report });

        match owner {
            Some(fei) if fei == expression.fei => {
                if let Err(e) = expression.fail(ctx) {
                    tracing::error!("Could not fail {}: {}", expression.fei, e);
                }
            }
            Some(fei) => {
                if let Err(e) = expression.mark_failed(ctx) {
                    tracing::error!("Could not mark {} failed: {}", expression.fei, e);
                }
                match ctx.storage.get(&fei) {
                    Some(mut owner_expression) => {
                        if let Err(e) = owner_expression.fail(ctx) {
                            tracing::error!("Could not fail on_error owner {}: {}", fei, e);
                        }
                    }
                    None => tracing::warn!("on_error owner {} not found", fei),
                }
            }
            None => {
                if let Err(e) = expression.mark_failed(ctx) {
                    tracing::error!("Could not mark {} failed: {}", expression.fei, e);
                }
            }
        }
    }
}

fn error_class(error: &FlowError) -> &'static str {
    match error {
        FlowError::Expression(_) => "ExpressionError",
        FlowError::Storage(_) => "StorageError",
        FlowError::Serialization(_) => "SerializationError",
        FlowError::Queue(_) => "QueueError",
        FlowError::ProcessFailed { .. } => "ProcessError",
    }
}
