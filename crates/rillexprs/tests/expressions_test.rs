use rillcore::{ExpressionStorage, FlowEvent, Tree, Workitem};
use rillruntime::Engine;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

fn engine() -> Engine {
    Engine::new(Arc::new(rillexprs::standard_registry()))
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

async fn next_dispatch(events: &mut broadcast::Receiver<FlowEvent>) -> (String, Workitem) {
    let event = next_matching(events, |e| {
        matches!(e, FlowEvent::ParticipantDispatched { .. })
    })
    .await;
    match event {
        FlowEvent::ParticipantDispatched {
            participant,
            workitem,
        } => (participant, workitem),
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn concurrence_waits_for_every_child() {
    let engine = engine();
    let mut events = engine.subscribe();

    let tree = Tree::new("concurrence")
        .with_child(Tree::new("participant").with_attribute("ref", "alpha"))
        .with_child(Tree::new("participant").with_attribute("ref", "beta"));

    let wfid = engine.launch(tree, HashMap::new()).expect("launch");

    let (first_name, first_wi) = next_dispatch(&mut events).await;
    let (second_name, second_wi) = next_dispatch(&mut events).await;
    let mut names = vec![first_name, second_name];
    names.sort();
    assert_eq!(names, vec!["alpha".to_string(), "beta".to_string()]);

    engine.reply(first_wi).expect("first reply");

    // one branch done is not enough
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(engine.storage().size() > 0, "concurrence must still wait");

    engine.reply(second_wi).expect("second reply");
    finished(&engine, &wfid).await;
    assert_eq!(engine.storage().size(), 0);
}

#[tokio::test]
async fn participant_names_resolve_through_variables() {
    let engine = engine();
    let mut events = engine.subscribe();

    let tree = Tree::new("define")
        .with_child(
            Tree::new("set")
                .with_attribute("var", "approver")
                .with_attribute("val", "alice"),
        )
        .with_child(Tree::new("participant").with_attribute("ref", "approver"));

    let wfid = engine.launch(tree, HashMap::new()).expect("launch");

    let (name, workitem) = next_dispatch(&mut events).await;
    assert_eq!(name, "alice");
    assert_eq!(workitem.participant, Some("alice".to_string()));

    engine.reply(workitem).expect("reply");
    finished(&engine, &wfid).await;
}

#[tokio::test]
async fn participant_ref_substitutes_workitem_fields() {
    let engine = engine();
    let mut events = engine.subscribe();

    let tree =
        Tree::new("define").with_child(Tree::new("participant").with_attribute("ref", "${assignee}"));

    let wfid = engine
        .launch(
            tree,
            HashMap::from([("assignee".to_string(), json!("carol"))]),
        )
        .expect("launch");

    let (name, workitem) = next_dispatch(&mut events).await;
    assert_eq!(name, "carol");

    engine.reply(workitem).expect("reply");
    finished(&engine, &wfid).await;
}

#[tokio::test]
async fn unless_guard_skips_a_child() {
    let engine = engine();
    let mut events = engine.subscribe();

    let tree = Tree::new("sequence").with_child(
        Tree::new("participant")
            .with_attribute("ref", "reviewer")
            .with_attribute("unless", "${vip} == yes"),
    );

    let wfid = engine
        .launch(tree, HashMap::from([("vip".to_string(), json!("yes"))]))
        .expect("launch");

    finished(&engine, &wfid).await;
    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(event, FlowEvent::ParticipantDispatched { .. }),
            "guarded participant must not be dispatched"
        );
    }
}

#[tokio::test]
async fn set_writes_fields_with_substitution() {
    let engine = engine();

    let tree = Tree::new("define")
        .with_child(
            Tree::new("set")
                .with_attribute("field", "greeting")
                .with_attribute("val", "hola ${name}"),
        )
        .with_child(Tree::new("echo").with_text("${greeting}"));

    let wfid = engine
        .launch(tree, HashMap::from([("name".to_string(), json!("amy"))]))
        .expect("launch");
    let workitem = finished(&engine, &wfid).await;

    assert_eq!(workitem.fields.get("greeting"), Some(&json!("hola amy")));
}

#[tokio::test]
async fn set_value_from_text_argument() {
    let engine = engine();

    let tree = Tree::new("define").with_child(
        Tree::new("set")
            .with_attribute("field", "note")
            .with_text("plain text value"),
    );

    let wfid = engine.launch(tree, HashMap::new()).expect("launch");
    let workitem = finished(&engine, &wfid).await;

    assert_eq!(
        workitem.fields.get("note"),
        Some(&json!("plain text value"))
    );
}

#[tokio::test]
async fn unset_removes_a_field() {
    let engine = engine();

    let tree = Tree::new("define")
        .with_child(Tree::new("unset").with_attribute("field", "scratch"));

    let wfid = engine
        .launch(
            tree,
            HashMap::from([("scratch".to_string(), json!("x"))]),
        )
        .expect("launch");
    let workitem = finished(&engine, &wfid).await;

    assert!(!workitem.fields.contains_key("scratch"));
}

#[tokio::test]
async fn define_records_its_name_as_a_variable() {
    let engine = engine();

    let tree = Tree::new("define")
        .with_attribute("name", "invoicing")
        .with_child(Tree::new("wait"));

    let wfid = engine.launch(tree, HashMap::new()).expect("launch");

    let storage = engine.storage();
    for _ in 0..400 {
        let root = storage.get(&rillcore::Fei::root(wfid.as_str()));
        if let Some(root) = root {
            if root
                .variables
                .as_ref()
                .map(|v| v.contains_key("invoicing"))
                .unwrap_or(false)
            {
                engine
                    .cancel_process(&wfid, rillcore::CancelFlavour::Cancel)
                    .expect("cancel");
                finished(&engine, &wfid).await;
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("the definition name was never bound");
}
