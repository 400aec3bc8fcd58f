use rillcore::{
    CancelFlavour, ExpressionState, ExpressionStorage, FlowError, FlowEvent, FlowExpression, Tree,
    Workitem,
};
use rillruntime::Engine;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

fn engine() -> Engine {
    Engine::new(Arc::new(rillexprs::standard_registry()))
}

fn find(engine: &Engine, wfid: &str, expid: &str) -> Option<FlowExpression> {
    let storage = engine.storage();
    storage
        .feis_for(wfid)
        .into_iter()
        .find(|fei| fei.expid == expid)
        .and_then(|fei| storage.get(&fei))
}

async fn eventually<F: Fn() -> bool>(what: &str, cond: F) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {}", what);
}

async fn next_matching<F>(events: &mut broadcast::Receiver<FlowEvent>, pred: F) -> FlowEvent
where
    F: Fn(&FlowEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) => {}
                Err(e) => panic!("event stream ended: {}", e),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

#[tokio::test(start_paused = true)]
async fn a_timeout_cancels_the_waiting_branch() {
    let engine = engine();

    let tree = Tree::new("define").with_child(Tree::new("wait").with_attribute("timeout", "1s"));
    let wfid = engine.launch(tree, HashMap::new()).expect("launch");

    let workitem = tokio::time::timeout(Duration::from_secs(30), engine.wait_for(&wfid))
        .await
        .expect("process did not finish")
        .expect("process should terminate");

    // the timeout left its stamp for downstream expressions
    let stamp = workitem
        .fields
        .get("__timed_out__")
        .expect("timeout stamp");
    assert_eq!(stamp[0]["expid"], json!("0.0"));
    assert!(stamp[1].is_string());
}

#[tokio::test(start_paused = true)]
async fn on_timeout_error_promotes_the_timeout_to_an_error() {
    let engine = engine();
    let mut events = engine.subscribe();

    let tree = Tree::new("define").with_child(
        Tree::new("wait")
            .with_attribute("timeout", "1s")
            .with_attribute("on_timeout", "error"),
    );
    let wfid = engine
        .launch(tree, HashMap::from([("order".to_string(), json!(7))]))
        .expect("launch");

    let result = tokio::time::timeout(Duration::from_secs(30), engine.wait_for(&wfid))
        .await
        .expect("wait_for");
    match result {
        Err(FlowError::ProcessFailed { class, .. }) => assert_eq!(class, "TimeoutError"),
        other => panic!("expected a timeout failure, got {:?}", other),
    }

    let event = next_matching(&mut events, |e| matches!(e, FlowEvent::ProcessError { .. })).await;
    let FlowEvent::ProcessError { report } = event else {
        unreachable!()
    };
    assert_eq!(report.class, "TimeoutError");
    assert_eq!(report.payload, json!("1s"));
    assert_eq!(report.stacktrace, vec!["---".to_string()]);

    // the report carries everything needed to re-apply the expression
    let resume = report.resume.expect("resume request");
    assert_eq!(resume.fei.expid, "0.0");
    assert_eq!(resume.tree.name, "wait");
    assert_eq!(resume.workitem.fields.get("order"), Some(&json!(7)));

    let failed = find(&engine, &wfid, "0.0").expect("failed expression is kept");
    assert_eq!(failed.state, ExpressionState::Failed);
    assert!(failed
        .applied_workitem
        .fields
        .contains_key("__timed_out__"));
}

#[tokio::test(start_paused = true)]
async fn an_early_reply_unschedules_the_timeout() {
    let engine = engine();
    let mut events = engine.subscribe();

    let tree = Tree::new("define").with_child(
        Tree::new("participant")
            .with_attribute("ref", "alice")
            .with_attribute("timeout", "1h"),
    );
    let wfid = engine.launch(tree, HashMap::new()).expect("launch");

    let event = next_matching(&mut events, |e| {
        matches!(e, FlowEvent::ParticipantDispatched { .. })
    })
    .await;
    let FlowEvent::ParticipantDispatched { workitem, .. } = event else {
        unreachable!()
    };

    engine.reply(workitem).expect("participant reply");
    tokio::time::timeout(Duration::from_secs(30), engine.wait_for(&wfid))
        .await
        .expect("process did not finish")
        .expect("process should terminate");

    // run far past the timeout; the revoked job must not fire an error
    tokio::time::sleep(Duration::from_secs(7200)).await;
    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(event, FlowEvent::ProcessError { .. }),
            "the timeout was unscheduled and must not fire"
        );
    }
    assert_eq!(engine.storage().size(), 0);
}

#[tokio::test(start_paused = true)]
async fn a_timeout_never_cancels_a_failed_expression() {
    let engine = engine();

    let tree = Tree::new("define").with_child(Tree::new("wait"));
    let wfid = engine.launch(tree, HashMap::new()).expect("launch");

    eventually("the wait to park", || find(&engine, &wfid, "0.0").is_some()).await;

    let ctx = engine.context();
    let mut parked = find(&engine, &wfid, "0.0").expect("parked wait");
    parked.mark_failed(ctx).expect("mark failed");

    ctx.pool
        .cancel_expression(parked.fei.clone(), CancelFlavour::Timeout)
        .expect("timeout cancel");
    tokio::time::sleep(Duration::from_millis(100)).await;

    let still_there = find(&engine, &wfid, "0.0").expect("expression is kept");
    assert_eq!(still_there.state, ExpressionState::Failed);

    // an ordinary cancel still tears it down
    ctx.pool
        .cancel_expression(parked.fei.clone(), CancelFlavour::Cancel)
        .expect("plain cancel");
    let workitem: Workitem = tokio::time::timeout(Duration::from_secs(30), engine.wait_for(&wfid))
        .await
        .expect("process did not finish")
        .expect("process should terminate");
    assert_eq!(workitem.fei.map(|f| f.expid), Some("0".to_string()));
}
