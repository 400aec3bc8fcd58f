use crate::condition;
use crate::context::EngineContext;
use crate::duration::parse_duration;
use crate::error::FlowError;
use crate::events::{ErrorReport, FlowEvent};
use crate::fei::Fei;
use crate::pool::ApplyRequest;
use crate::scheduler::{JobId, Scheduler};
use crate::storage::ExpressionStorage;
use crate::tree::Tree;
use crate::workitem::Workitem;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Lifecycle state of a live expression
///
/// `Active` means the expression has not been asked to cancel, fail or time
/// out. Once the state leaves `Active` it never goes back; a handler
/// re-apply replaces the instance with a fresh one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpressionState {
    Active,
    Failing,
    Cancelling,
    TimingOut,
    Dying,
    Failed,
}

/// Why a cancel was issued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelFlavour {
    Cancel,
    Kill,
    Timeout,
}

/// Which handler attribute triggered a re-apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandlerKind {
    OnError,
    OnCancel,
    OnTimeout,
}

/// A handler attribute value: a bare name (including the literals `redo`,
/// `undo` and `error`) or an embedded tree triple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HandlerSpec {
    Name(String),
    Tree(Tree),
}

impl HandlerSpec {
    pub fn from_value(value: &Value) -> Option<HandlerSpec> {
        match value {
            Value::String(s) => Some(HandlerSpec::Name(s.clone())),
            Value::Array(_) => serde_json::from_value(value.clone())
                .ok()
                .map(HandlerSpec::Tree),
            _ => None,
        }
    }
}

/// What a concrete expression kind contributes to the protocol
///
/// The `do_apply` / `do_reply` / `do_cancel` wrappers on [`FlowExpression`]
/// own all the bookkeeping; behaviors only decide what applying, a child
/// reply, or a cancel means for their construct. The defaults reply
/// straight to the parent and cancel every registered child.
pub trait ExpressionBehavior: Send + Sync {
    /// Tree name this behavior answers to (e.g. "sequence").
    fn expression_name(&self) -> &str;

    fn apply(
        &self,
        expression: &mut FlowExpression,
        ctx: &EngineContext,
        workitem: Workitem,
    ) -> Result<(), FlowError>;

    fn reply(
        &self,
        expression: &mut FlowExpression,
        ctx: &EngineContext,
        workitem: Workitem,
    ) -> Result<(), FlowError> {
        expression.reply_to_parent(ctx, workitem)
    }

    fn cancel(
        &self,
        expression: &mut FlowExpression,
        ctx: &EngineContext,
        flavour: CancelFlavour,
    ) -> Result<(), FlowError> {
        expression.cancel_children(ctx, flavour)
    }
}

/// A live node of a running process
///
/// The storage owns the canonical copy; instances in the dispatch loop are
/// working copies that persist themselves after every externally observable
/// mutation. `parent_id` is a key, not a pointer -- resolving the parent is
/// a storage lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowExpression {
    pub fei: Fei,
    pub parent_id: Option<Fei>,
    pub original_tree: Tree,
    pub updated_tree: Option<Tree>,
    pub children: Vec<Fei>,
    pub variables: Option<HashMap<String, Value>>,
    pub applied_workitem: Workitem,
    pub state: ExpressionState,
    pub on_error: Option<HandlerSpec>,
    pub on_cancel: Option<HandlerSpec>,
    pub on_timeout: Option<HandlerSpec>,
    pub tagname: Option<String>,
    pub timeout_job_id: Option<JobId>,
    pub triggered_by: Option<HandlerKind>,
    pub created_time: DateTime<Utc>,
    pub modified_time: DateTime<Utc>,
}

impl FlowExpression {
    pub fn new(
        fei: Fei,
        parent_id: Option<Fei>,
        tree: Tree,
        workitem: Workitem,
        variables: Option<HashMap<String, Value>>,
        triggered_by: Option<HandlerKind>,
    ) -> Self {
        let on_error = tree.attribute("on_error").and_then(HandlerSpec::from_value);
        let on_cancel = tree.attribute("on_cancel").and_then(HandlerSpec::from_value);
        let on_timeout = tree
            .attribute("on_timeout")
            .and_then(HandlerSpec::from_value);

        let mut applied_workitem = workitem;
        applied_workitem.fei = Some(fei.clone());

        let now = Utc::now();
        Self {
            fei,
            parent_id,
            original_tree: tree,
            updated_tree: None,
            children: Vec::new(),
            variables,
            applied_workitem,
            state: ExpressionState::Active,
            on_error,
            on_cancel,
            on_timeout,
            tagname: None,
            timeout_job_id: None,
            triggered_by,
            created_time: now,
            modified_time: now,
        }
    }

    /// The tree currently driving this expression; local edits take
    /// precedence over the tree as originally applied.
    pub fn current_tree(&self) -> &Tree {
        self.updated_tree.as_ref().unwrap_or(&self.original_tree)
    }

    pub fn name(&self) -> &str {
        &self.current_tree().name
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.current_tree().attribute(name)
    }

    pub fn attribute_str(&self, name: &str) -> Option<String> {
        self.current_tree().attribute_str(name)
    }

    fn attribute_is_truthy(&self, name: &str, workitem: &Workitem) -> bool {
        match self.attribute(name) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => condition::truthy(&condition::substitute(s, workitem)),
            Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
            _ => false,
        }
    }

    /// Resolve the parent expression, a storage lookup.
    pub fn parent(&self, ctx: &EngineContext) -> Option<FlowExpression> {
        self.parent_id.as_ref().and_then(|fei| ctx.storage.get(fei))
    }

    pub fn handler(&self, kind: HandlerKind) -> Option<&HandlerSpec> {
        match kind {
            HandlerKind::OnError => self.on_error.as_ref(),
            HandlerKind::OnCancel => self.on_cancel.as_ref(),
            HandlerKind::OnTimeout => self.on_timeout.as_ref(),
        }
    }

    //
    // lifecycle wrappers

    /// Apply this expression: guard, forget, tag, timeout, then the
    /// concrete behavior's `apply`.
    pub fn do_apply(&mut self, ctx: &EngineContext, workitem: Workitem) -> Result<(), FlowError> {
        if !condition::apply_allowed(self.current_tree(), &workitem) {
            tracing::debug!("Guard vetoed {}, replying untouched", self.fei);
            return self.reply_to_parent(ctx, workitem);
        }

        if self.attribute_is_truthy("forget", &workitem) {
            let parent = self.parent_id.clone();
            self.forget(ctx)?;
            if let Some(parent_fei) = parent {
                // the parent resumes right away, the branch runs detached
                let mut copy = workitem.clone();
                copy.fei = Some(self.fei.clone());
                ctx.pool.reply(copy, parent_fei)?;
            }
        }

        self.consider_tag(ctx)?;
        self.consider_timeout(ctx)?;

        let name = self.name().to_string();
        let behavior = ctx.behavior(&name)?;
        behavior.apply(self, ctx, workitem)
    }

    /// A child replied. Deregister it; when tearing down, propagate once
    /// the last child is gone, otherwise hand over to the behavior.
    pub fn do_reply(&mut self, ctx: &EngineContext, workitem: Workitem) -> Result<(), FlowError> {
        if let Some(child) = workitem.fei.clone() {
            self.children.retain(|c| *c != child);
        }

        if self.state != ExpressionState::Active {
            if self.children.is_empty() {
                self.reply_to_parent(ctx, workitem)
            } else {
                self.persist(ctx)
            }
        } else {
            let name = self.name().to_string();
            match ctx.behavior(&name) {
                Ok(behavior) => behavior.reply(self, ctx, workitem),
                // teardown must work even for a tree naming no behavior
                Err(_) => self.reply_to_parent(ctx, workitem),
            }
        }
    }

    /// Tear this expression down.
    pub fn do_cancel(
        &mut self,
        ctx: &EngineContext,
        flavour: CancelFlavour,
    ) -> Result<(), FlowError> {
        if self.state == ExpressionState::Failed && flavour == CancelFlavour::Timeout {
            tracing::debug!("Not timing out already-failed expression {}", self.fei);
            return Ok(());
        }

        self.state = match flavour {
            CancelFlavour::Kill => ExpressionState::Dying,
            CancelFlavour::Timeout => ExpressionState::TimingOut,
            CancelFlavour::Cancel => ExpressionState::Cancelling,
        };

        if flavour == CancelFlavour::Timeout {
            let stamp = serde_json::json!([self.fei, Utc::now()]);
            self.applied_workitem
                .fields
                .insert("__timed_out__".to_string(), stamp);
        }

        self.persist(ctx)?;

        let name = self.name().to_string();
        match ctx.behavior(&name) {
            Ok(behavior) => behavior.cancel(self, ctx, flavour),
            // teardown must work even for a tree naming no behavior
            Err(_) => self.cancel_children(ctx, flavour),
        }
    }

    /// Force this expression into the failing state. Children are
    /// cancelled; once the last one replied, `reply_to_parent` routes into
    /// the `on_error` handler.
    pub fn fail(&mut self, ctx: &EngineContext) -> Result<(), FlowError> {
        tracing::info!("Failing {}", self.fei);
        self.state = ExpressionState::Failing;
        self.persist(ctx)?;
        self.cancel_children(ctx, CancelFlavour::Cancel)
    }

    /// Record this expression as failed without tearing anything down.
    /// Used by the pool when a behavior hook errors out.
    pub fn mark_failed(&mut self, ctx: &EngineContext) -> Result<(), FlowError> {
        self.state = ExpressionState::Failed;
        self.persist(ctx)
    }

    /// Default cancel: propagate the flavour to every registered child, or
    /// reply immediately when there is nothing to wait for.
    pub fn cancel_children(
        &mut self,
        ctx: &EngineContext,
        flavour: CancelFlavour,
    ) -> Result<(), FlowError> {
        if self.children.is_empty() {
            let workitem = self.applied_workitem.clone();
            return self.reply_to_parent(ctx, workitem);
        }
        for child in self.children.clone() {
            ctx.pool.cancel_expression(child, flavour)?;
        }
        self.persist(ctx)
    }

    /// Yield to the parent (or terminate the process at the root)
    ///
    /// Cleans up tag and timeout, dispatches to the matching handler when
    /// tearing down, splices `updated_tree` back into the parent, then
    /// unpersists and routes the workitem upward.
    pub fn reply_to_parent(
        &mut self,
        ctx: &EngineContext,
        mut workitem: Workitem,
    ) -> Result<(), FlowError> {
        if let Some(tag) = self.tagname.take() {
            self.unset_variable(ctx, &tag)?;
            ctx.queue.emit(FlowEvent::LeftTag {
                tag,
                fei: self.fei.clone(),
            });
        }

        if let Some(job) = self.timeout_job_id.take() {
            ctx.scheduler.unschedule(&job);
        }

        match self.state {
            ExpressionState::Failing => {
                if let Some(spec) = self.on_error.clone() {
                    match spec {
                        HandlerSpec::Name(n) if n == "undo" => {
                            // the cancel already performed is the resolution
                        }
                        HandlerSpec::Name(n) if n == "redo" => {
                            return self.reapply(ctx, self.current_tree().clone(), HandlerKind::OnError);
                        }
                        HandlerSpec::Name(n) => {
                            return self.reapply(ctx, Tree::new(n), HandlerKind::OnError);
                        }
                        HandlerSpec::Tree(t) => {
                            return self.reapply(ctx, t, HandlerKind::OnError);
                        }
                    }
                }
            }
            ExpressionState::Cancelling => {
                // a kill (Dying) deliberately skips this
                if let Some(spec) = self.on_cancel.clone() {
                    let tree = match spec {
                        HandlerSpec::Tree(t) => t,
                        HandlerSpec::Name(n) => Tree::new(n),
                    };
                    return self.reapply(ctx, tree, HandlerKind::OnCancel);
                }
            }
            ExpressionState::TimingOut => {
                if let Some(spec) = self.on_timeout.clone() {
                    match spec {
                        HandlerSpec::Name(n) if n == "error" => {
                            return self.synthesize_timeout_error(ctx);
                        }
                        HandlerSpec::Name(n) if n == "redo" => {
                            return self.reapply(
                                ctx,
                                self.current_tree().clone(),
                                HandlerKind::OnTimeout,
                            );
                        }
                        HandlerSpec::Name(n) => {
                            return self.reapply(ctx, Tree::new(n), HandlerKind::OnTimeout);
                        }
                        HandlerSpec::Tree(t) => {
                            return self.reapply(ctx, t, HandlerKind::OnTimeout);
                        }
                    }
                }
            }
            _ => {}
        }

        if let (Some(updated), Some(parent_fei)) =
            (self.updated_tree.clone(), self.parent_id.clone())
        {
            if let Some(mut parent) = ctx.storage.get(&parent_fei) {
                if parent.updated_tree.is_none() {
                    parent.updated_tree = Some(parent.original_tree.clone());
                }
                if let Some(tree) = parent.updated_tree.as_mut() {
                    let slot = self.fei.child_id;
                    if slot < tree.children.len() {
                        tree.children[slot] = updated;
                    } else {
                        tracing::warn!(
                            "Cannot splice updated tree of {} into parent {}: no slot {}",
                            self.fei,
                            parent_fei,
                            slot
                        );
                    }
                }
                parent.persist(ctx)?;
            }
        }

        workitem.fei = Some(self.fei.clone());
        self.unpersist(ctx)?;

        match self.parent_id.clone() {
            Some(parent_fei) => ctx.pool.reply(workitem, parent_fei),
            None => {
                tracing::info!("Process {} terminated", self.fei.wfid);
                ctx.queue.emit(FlowEvent::ProcessTerminated {
                    wfid: self.fei.wfid.clone(),
                    workitem,
                });
                Ok(())
            }
        }
    }

    /// Re-apply a handler tree at this expression's place, reusing fei,
    /// parent, variables and the workitem captured at apply time.
    fn reapply(
        &self,
        ctx: &EngineContext,
        tree: Tree,
        kind: HandlerKind,
    ) -> Result<(), FlowError> {
        tracing::info!("Re-applying {} as {:?} handler ({})", self.fei, kind, tree.name);
        ctx.pool.apply(ApplyRequest {
            fei: self.fei.clone(),
            parent: self.parent_id.clone(),
            tree,
            workitem: self.applied_workitem.clone(),
            variables: self.variables.clone(),
            triggered_by: Some(kind),
        })
    }

    /// Promote a timeout into a flow-level error. The stack trace is the
    /// synthetic `["---"]`: this is a flow event, not a crash.
    fn synthesize_timeout_error(&mut self, ctx: &EngineContext) -> Result<(), FlowError> {
        let payload = self.attribute("timeout").cloned().unwrap_or(Value::Null);
        let report = ErrorReport {
            class: "TimeoutError".to_string(),
            payload,
            wfid: self.fei.wfid.clone(),
            fei: self.fei.clone(),
            stacktrace: vec!["---".to_string()],
            resume: Some(ApplyRequest {
                fei: self.fei.clone(),
                parent: self.parent_id.clone(),
                tree: self.current_tree().clone(),
                workitem: self.applied_workitem.clone(),
                variables: self.variables.clone(),
                triggered_by: Some(HandlerKind::OnTimeout),
            }),
            handled: false,
        };
        ctx.queue.emit(FlowEvent::ProcessError { report });
        self.state = ExpressionState::Failed;
        self.persist(ctx)
    }

    //
    // forgetting

    /// Detach this expression into an independent branch. The visible
    /// variable environment is snapshotted so lookups keep working without
    /// the parent chain.
    pub fn forget(&mut self, ctx: &EngineContext) -> Result<(), FlowError> {
        tracing::info!("Forgetting {}", self.fei);
        ctx.queue.emit(FlowEvent::Forgotten {
            fei: self.fei.clone(),
            parent: self.parent_id.clone(),
        });
        let snapshot = self.compile_variables(ctx);
        self.variables = Some(snapshot);
        self.parent_id = None;
        self.persist(ctx)
    }

    /// Flatten every variable visible from here, local bindings overriding
    /// inherited ones. Engine-global variables are not included; lookups
    /// still fall through to them once the chain ends.
    pub fn compile_variables(&self, ctx: &EngineContext) -> HashMap<String, Value> {
        let mut vars = self
            .parent(ctx)
            .map(|p| p.compile_variables(ctx))
            .unwrap_or_default();
        if let Some(own) = &self.variables {
            vars.extend(own.clone());
        }
        vars
    }

    //
    // variables

    /// Lexical lookup. `name` resolves in the nearest enclosing scope,
    /// `/name` starts at the parent, `//name` goes straight to the
    /// engine-global scope.
    pub fn lookup_variable(&self, ctx: &EngineContext, name: &str) -> Option<Value> {
        let (prefix, bare) = extract_prefix(name);
        self.lookup_variable_prefixed(ctx, bare, prefix)
    }

    fn lookup_variable_prefixed(
        &self,
        ctx: &EngineContext,
        name: &str,
        prefix: &str,
    ) -> Option<Value> {
        if prefix.len() >= 2 {
            return ctx.engine_variable(name);
        }
        if !prefix.is_empty() {
            if let Some(parent) = self.parent(ctx) {
                return parent.lookup_variable_prefixed(ctx, name, &prefix[1..]);
            }
        }
        if let Some(vars) = &self.variables {
            if let Some(value) = vars.get(name) {
                // a binding present but null falls through to the parent chain
                if !value.is_null() {
                    return Some(value.clone());
                }
            }
        }
        if let Some(parent) = self.parent(ctx) {
            return parent.lookup_variable_prefixed(ctx, name, "");
        }
        ctx.engine_variable(name)
    }

    /// Write a variable into the nearest enclosing scope (or up the chain
    /// as directed by the prefix). The owning expression persists itself
    /// and a `VariableSet` event is published.
    pub fn set_variable(
        &mut self,
        ctx: &EngineContext,
        name: &str,
        value: Value,
    ) -> Result<(), FlowError> {
        let (prefix, bare) = extract_prefix(name);
        let bare = bare.to_string();
        self.set_variable_prefixed(ctx, &bare, value, prefix)
    }

    fn set_variable_prefixed(
        &mut self,
        ctx: &EngineContext,
        name: &str,
        value: Value,
        prefix: &str,
    ) -> Result<(), FlowError> {
        if prefix.len() >= 2 {
            ctx.set_engine_variable(name, value);
            return Ok(());
        }
        if !prefix.is_empty() {
            if let Some(mut parent) = self.parent(ctx) {
                let shorter = prefix[1..].to_string();
                return parent.set_variable_prefixed(ctx, name, value, &shorter);
            }
        }
        if let Some(vars) = self.variables.as_mut() {
            vars.insert(name.to_string(), value);
            self.persist(ctx)?;
            ctx.queue.emit(FlowEvent::VariableSet {
                var: name.to_string(),
                fei: self.fei.clone(),
            });
            return Ok(());
        }
        if let Some(mut parent) = self.parent(ctx) {
            return parent.set_variable_prefixed(ctx, name, value, "");
        }
        tracing::warn!(
            "No scope reachable from {} for variable '{}', dropping write",
            self.fei,
            name
        );
        Ok(())
    }

    /// Erase a variable binding, symmetric to `set_variable`.
    pub fn unset_variable(&mut self, ctx: &EngineContext, name: &str) -> Result<(), FlowError> {
        let (prefix, bare) = extract_prefix(name);
        let bare = bare.to_string();
        self.unset_variable_prefixed(ctx, &bare, prefix)
    }

    fn unset_variable_prefixed(
        &mut self,
        ctx: &EngineContext,
        name: &str,
        prefix: &str,
    ) -> Result<(), FlowError> {
        if prefix.len() >= 2 {
            ctx.unset_engine_variable(name);
            return Ok(());
        }
        if !prefix.is_empty() {
            if let Some(mut parent) = self.parent(ctx) {
                let shorter = prefix[1..].to_string();
                return parent.unset_variable_prefixed(ctx, name, &shorter);
            }
        }
        if let Some(vars) = self.variables.as_mut() {
            vars.remove(name);
            self.persist(ctx)?;
            ctx.queue.emit(FlowEvent::VariableUnset {
                var: name.to_string(),
                fei: self.fei.clone(),
            });
            return Ok(());
        }
        if let Some(mut parent) = self.parent(ctx) {
            return parent.unset_variable_prefixed(ctx, name, "");
        }
        tracing::warn!(
            "No scope reachable from {} for variable '{}', nothing to unset",
            self.fei,
            name
        );
        Ok(())
    }

    /// Chase string aliases until the lookup stops yielding names.
    /// Resolves process-name and participant-name indirections.
    pub fn iterative_var_lookup(
        &self,
        ctx: &EngineContext,
        name: &str,
    ) -> (String, Option<Value>) {
        match self.lookup_variable(ctx, name) {
            Some(Value::String(next)) => self.iterative_var_lookup(ctx, &next),
            other => (name.to_string(), other),
        }
    }

    /// Nearest expression (self included) carrying the given handler,
    /// walking up the parent chain.
    pub fn lookup_on(&self, ctx: &EngineContext, kind: HandlerKind) -> Option<Fei> {
        if self.handler(kind).is_some() {
            return Some(self.fei.clone());
        }
        self.parent(ctx).and_then(|p| p.lookup_on(ctx, kind))
    }

    //
    // tag and timeout bookkeeping

    fn consider_tag(&mut self, ctx: &EngineContext) -> Result<(), FlowError> {
        let raw = match self.current_tree().attribute_str("tag") {
            Some(t) => t,
            None => return Ok(()),
        };
        let tag = condition::substitute(&raw, &self.applied_workitem);
        if tag.is_empty() {
            return Ok(());
        }
        let fei_value = serde_json::to_value(&self.fei)?;
        self.tagname = Some(tag.clone());
        self.set_variable(ctx, &tag, fei_value)?;
        ctx.queue.emit(FlowEvent::EnteredTag {
            tag,
            fei: self.fei.clone(),
        });
        self.persist(ctx)
    }

    fn consider_timeout(&mut self, ctx: &EngineContext) -> Result<(), FlowError> {
        let spec = match self.current_tree().attribute_str("timeout") {
            Some(t) => t,
            None => return Ok(()),
        };
        let delay = parse_duration(&spec)?;
        let job = ctx.scheduler.schedule(delay, self.fei.clone());
        tracing::debug!("Scheduled timeout {:?} for {} as job {}", delay, self.fei, job);
        self.timeout_job_id = Some(job);
        self.persist(ctx)
    }

    //
    // persistence

    /// Commit this expression's current state to storage and publish it.
    pub fn persist(&mut self, ctx: &EngineContext) -> Result<(), FlowError> {
        self.modified_time = Utc::now();
        ctx.queue.emit_sync(FlowEvent::ExpressionUpdated {
            expression: Box::new(self.clone()),
        });
        Ok(())
    }

    /// Remove this expression from storage.
    pub fn unpersist(&self, ctx: &EngineContext) -> Result<(), FlowError> {
        ctx.queue.emit_sync(FlowEvent::ExpressionDeleted {
            fei: self.fei.clone(),
        });
        Ok(())
    }
}

/// Split a variable name into its slash prefix (at most two characters)
/// and the bare name with every leading slash stripped.
fn extract_prefix(name: &str) -> (&str, &str) {
    let bare = name.trim_start_matches('/');
    let run = name.len() - bare.len();
    (&name[..run.min(2)], bare)
}
