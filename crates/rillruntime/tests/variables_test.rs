use rillcore::{CancelFlavour, ExpressionStorage, FlowEvent, FlowExpression, Tree, Workitem};
use rillruntime::Engine;
use serde_json::{json, Value};
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

async fn finished(engine: &Engine, wfid: &str) -> Workitem {
    tokio::time::timeout(Duration::from_secs(5), engine.wait_for(wfid))
        .await
        .expect("process did not finish in time")
        .expect("process should terminate cleanly")
}

async fn next_matching<F>(events: &mut broadcast::Receiver<FlowEvent>, pred: F) -> FlowEvent
where
    F: Fn(&FlowEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
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

fn set_var(name: &str, value: impl Into<Value>) -> Tree {
    Tree::new("set")
        .with_attribute("var", name)
        .with_attribute("val", value)
}

#[tokio::test]
async fn prefixed_write_lands_in_the_parent_scope() {
    let engine = engine();
    let mut events = engine.subscribe();

    let tree = Tree::new("define").with_child(
        Tree::new("define")
            .with_child(set_var("/x", "1"))
            .with_child(Tree::new("wait")),
    );

    let wfid = engine.launch(tree, HashMap::new()).expect("launch");

    let event = next_matching(&mut events, |e| matches!(e, FlowEvent::VariableSet { .. })).await;
    let FlowEvent::VariableSet { var, fei } = event else {
        unreachable!()
    };
    assert_eq!(var, "x");
    // one slash skips the writer's own frame; the binding lands in the
    // inner define, the nearest scope starting from the parent
    assert_eq!(fei.expid, "0.0");

    let inner = find(&engine, &wfid, "0.0").expect("inner define");
    assert_eq!(
        inner.variables.as_ref().and_then(|v| v.get("x")),
        Some(&json!("1"))
    );

    let leaf = find(&engine, &wfid, "0.0.1").expect("parked wait");
    let ctx = engine.context();
    assert_eq!(leaf.lookup_variable(ctx, "x"), Some(json!("1")));
    assert_eq!(leaf.lookup_variable(ctx, "/x"), Some(json!("1")));
    assert_eq!(leaf.lookup_variable(ctx, "//x"), None);

    engine
        .cancel_process(&wfid, CancelFlavour::Cancel)
        .expect("cancel");
    finished(&engine, &wfid).await;
}

#[tokio::test]
async fn double_slash_reaches_the_engine_scope() {
    let engine = engine();
    engine.set_variable("motd", json!("hello"));

    let tree = Tree::new("define")
        .with_child(set_var("//g", "global"))
        .with_child(Tree::new("wait"));

    let wfid = engine.launch(tree, HashMap::new()).expect("launch");

    eventually("the engine variable to appear", || {
        engine.variable("g") == Some(json!("global"))
    })
    .await;

    let leaf = find(&engine, &wfid, "0.1").expect("parked wait");
    let ctx = engine.context();
    // unprefixed lookups fall through to the engine once the chain ends
    assert_eq!(leaf.lookup_variable(ctx, "motd"), Some(json!("hello")));
    assert_eq!(leaf.lookup_variable(ctx, "//motd"), Some(json!("hello")));

    engine
        .cancel_process(&wfid, CancelFlavour::Cancel)
        .expect("cancel");
    finished(&engine, &wfid).await;
}

#[tokio::test]
async fn a_null_binding_falls_through_to_the_parent_chain() {
    let engine = engine();

    let tree = Tree::new("define")
        .with_child(set_var("x", "real"))
        .with_child(
            Tree::new("define")
                .with_child(set_var("x", Value::Null))
                .with_child(Tree::new("wait")),
        );

    let wfid = engine.launch(tree, HashMap::new()).expect("launch");

    eventually("the null binding to land", || {
        find(&engine, &wfid, "0.1")
            .and_then(|inner| inner.variables)
            .map(|vars| vars.get("x") == Some(&Value::Null))
            .unwrap_or(false)
    })
    .await;

    let ctx = engine.context();
    let inner = find(&engine, &wfid, "0.1").expect("inner define");
    assert_eq!(inner.lookup_variable(ctx, "x"), Some(json!("real")));

    let leaf = find(&engine, &wfid, "0.1.1").expect("parked wait");
    assert_eq!(leaf.lookup_variable(ctx, "x"), Some(json!("real")));

    engine
        .cancel_process(&wfid, CancelFlavour::Cancel)
        .expect("cancel");
    finished(&engine, &wfid).await;
}

#[tokio::test]
async fn iterative_lookup_chases_string_aliases() {
    let engine = engine();

    let tree = Tree::new("define")
        .with_child(set_var("a", "b"))
        .with_child(set_var("b", "c"))
        .with_child(set_var("c", 42))
        .with_child(Tree::new("wait"));

    let wfid = engine.launch(tree, HashMap::new()).expect("launch");

    eventually("the aliases to land", || {
        find(&engine, &wfid, "0.3").is_some()
    })
    .await;

    let leaf = find(&engine, &wfid, "0.3").expect("parked wait");
    let ctx = engine.context();
    assert_eq!(
        leaf.iterative_var_lookup(ctx, "a"),
        ("c".to_string(), Some(json!(42)))
    );

    engine
        .cancel_process(&wfid, CancelFlavour::Cancel)
        .expect("cancel");
    finished(&engine, &wfid).await;
}

#[tokio::test]
async fn unset_erases_a_binding_and_publishes() {
    let engine = engine();
    let mut events = engine.subscribe();

    let tree = Tree::new("define")
        .with_child(set_var("x", "1"))
        .with_child(Tree::new("unset").with_attribute("var", "x"))
        .with_child(Tree::new("wait"));

    let wfid = engine.launch(tree, HashMap::new()).expect("launch");

    next_matching(&mut events, |e| {
        matches!(e, FlowEvent::VariableSet { var, .. } if var == "x")
    })
    .await;
    next_matching(&mut events, |e| {
        matches!(e, FlowEvent::VariableUnset { var, .. } if var == "x")
    })
    .await;

    let root = find(&engine, &wfid, "0").expect("root");
    assert_eq!(
        root.variables.as_ref().and_then(|v| v.get("x")),
        None
    );

    engine
        .cancel_process(&wfid, CancelFlavour::Cancel)
        .expect("cancel");
    finished(&engine, &wfid).await;
}
