use crate::error::{ExpressionError, FlowError};
use crate::expression::{CancelFlavour, FlowExpression, HandlerKind};
use crate::fei::Fei;
use crate::tree::Tree;
use crate::workitem::Workitem;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Everything needed to (re)apply an expression at a given identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyRequest {
    pub fei: Fei,
    pub parent: Option<Fei>,
    pub tree: Tree,
    pub workitem: Workitem,
    pub variables: Option<HashMap<String, Value>>,
    pub triggered_by: Option<HandlerKind>,
}

/// A unit of work for the expression pool's dispatch loop
#[derive(Debug, Clone)]
pub enum PoolJob {
    Launch {
        wfid: String,
        tree: Tree,
        workitem: Workitem,
    },
    Apply(ApplyRequest),
    Reply {
        to: Fei,
        workitem: Workitem,
    },
    Cancel {
        fei: Fei,
        flavour: CancelFlavour,
    },
}

/// Submission side of the expression pool
///
/// Every operation enqueues a job; the dispatch loop processes one job at a
/// time, so an expression method never observes another one mid-mutation.
#[derive(Clone)]
pub struct PoolHandle {
    sender: mpsc::UnboundedSender<PoolJob>,
}

impl PoolHandle {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PoolJob>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Launch a new process instance.
    pub fn launch(&self, wfid: String, tree: Tree, workitem: Workitem) -> Result<(), FlowError> {
        self.send(PoolJob::Launch {
            wfid,
            tree,
            workitem,
        })
    }

    /// Generic apply, used for children and handler re-applies.
    pub fn apply(&self, request: ApplyRequest) -> Result<(), FlowError> {
        self.send(PoolJob::Apply(request))
    }

    /// Spawn the `index`-th child of `expression`'s current tree.
    ///
    /// The child is registered in `expression.children` unless `forget` is
    /// set; the caller persists afterwards. The actual apply happens on a
    /// later dispatch turn.
    pub fn apply_child(
        &self,
        expression: &mut FlowExpression,
        index: usize,
        workitem: Workitem,
        forget: bool,
    ) -> Result<(), FlowError> {
        let tree = expression
            .current_tree()
            .children
            .get(index)
            .cloned()
            .ok_or_else(|| ExpressionError::NoSuchChild {
                fei: expression.fei.clone(),
                index,
            })?;

        let child_fei = expression.fei.child(index);
        if !forget {
            expression.children.push(child_fei.clone());
        }

        self.apply(ApplyRequest {
            fei: child_fei,
            parent: Some(expression.fei.clone()),
            tree,
            workitem,
            variables: None,
            triggered_by: None,
        })
    }

    /// Deliver a reply to the expression identified by `to`.
    pub fn reply(&self, workitem: Workitem, to: Fei) -> Result<(), FlowError> {
        self.send(PoolJob::Reply { to, workitem })
    }

    /// Route a cancel event to an expression.
    pub fn cancel_expression(&self, fei: Fei, flavour: CancelFlavour) -> Result<(), FlowError> {
        self.send(PoolJob::Cancel { fei, flavour })
    }

    fn send(&self, job: PoolJob) -> Result<(), FlowError> {
        self.sender
            .send(job)
            .map_err(|e| FlowError::Queue(format!("expression pool is gone: {}", e)))
    }
}
