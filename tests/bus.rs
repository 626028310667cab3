//! Action bus suite: delivery order, takers, subscribers.

#[macro_use]
mod common;

use common::*;
use serde_json::{json, Value};
use sidefx::{Action, Cx, Pattern, Saga, TaskStatus};

fn init_test(test_name: &str) {
    init_test_logging();
    test_phase!(test_name);
}

/// Takes every action matching `pattern` and logs `"{tag}:{type}"`.
fn observer(log: &EventLog, tag: &'static str, pattern: Pattern) -> Saga {
    let log = log.clone();
    Saga::named(tag, move |cx: Cx, _args| {
        let log = log.clone();
        let pattern = pattern.clone();
        async move {
            loop {
                let action = cx.take(pattern.clone()).await?;
                log.push(format!("{tag}:{}", action.action_type));
            }
        }
    })
}

#[test]
fn subscribers_see_actions_in_dispatch_order() {
    init_test("subscribers_see_actions_in_dispatch_order");
    let rt = test_runtime();
    let log = EventLog::new();
    let sink = log.clone();
    let _sub = rt.subscribe(move |action| sink.push(action.action_type.clone()));

    for t in ["A", "B", "C"] {
        rt.dispatch(t);
    }
    assert_eq!(log.events(), vec!["A", "B", "C"]);
    assert_eq!(rt.stats().actions_dispatched, 3);
    test_complete!("subscribers_see_actions_in_dispatch_order");
}

#[test]
fn a_put_from_a_task_is_delivered_after_the_current_action() {
    init_test("a_put_from_a_task_is_delivered_after_the_current_action");
    let rt = test_runtime();
    let log = EventLog::new();
    let relay = {
        let log = log.clone();
        Saga::named("relay", move |cx: Cx, _args| {
            let log = log.clone();
            async move {
                loop {
                    cx.take("PING").await?;
                    cx.put("PONG").await?;
                    log.push("relay:put returned");
                }
            }
        })
    };
    rt.fork(&observer(&log, "obs", Pattern::Any), Vec::new());
    rt.fork(&relay, Vec::new());
    let sink = log.clone();
    let _sub = rt.subscribe(move |action| sink.push(format!("sub:{}", action.action_type)));

    rt.dispatch("PING");
    let expected = vec![
        "sub:PING",
        "obs:PING",
        "sub:PONG",
        "obs:PONG",
        "relay:put returned",
    ];
    let events = log.events();
    assert_with_log!(events == expected, "delivery order", expected, events);
    test_complete!("a_put_from_a_task_is_delivered_after_the_current_action");
}

#[test]
fn actions_are_not_retained_for_later_takers() {
    init_test("actions_are_not_retained_for_later_takers");
    let rt = test_runtime();
    let waiter = Saga::new(|cx: Cx, _args| async move {
        let action = cx.take("READY").await?;
        Ok(action.payload.unwrap_or_default())
    });

    rt.dispatch(Action::new("READY").with_payload(json!(1)));
    let task = rt.fork(&waiter, Vec::new());
    assert_eq!(task.status(), TaskStatus::Running);

    rt.dispatch(Action::new("READY").with_payload(json!(2)));
    assert!(task.is_terminal());
    assert_eq!(
        task.outcome().and_then(|o| o.into_result().ok()).map(|r| r.into_value().ok()),
        Some(Some(json!(2)))
    );
    test_complete!("actions_are_not_retained_for_later_takers");
}

#[test]
fn every_matching_taker_receives_the_action() {
    init_test("every_matching_taker_receives_the_action");
    let rt = test_runtime();
    let log = EventLog::new();
    rt.fork(&observer(&log, "a", "SAVE".into()), Vec::new());
    rt.fork(&observer(&log, "b", "SAVE".into()), Vec::new());
    rt.fork(&observer(&log, "c", "LOAD".into()), Vec::new());

    rt.dispatch("SAVE");
    assert_eq!(log.events(), vec!["a:SAVE", "b:SAVE"]);
    test_complete!("every_matching_taker_receives_the_action");
}

#[test]
fn patterns_select_actions() {
    init_test("patterns_select_actions");
    let rt = test_runtime();
    let log = EventLog::new();
    rt.fork(&observer(&log, "any", "*".into()), Vec::new());
    rt.fork(
        &observer(&log, "crud", Pattern::one_of(["CREATE", "DELETE"])),
        Vec::new(),
    );
    rt.fork(
        &observer(
            &log,
            "big",
            Pattern::predicate(|a| {
                a.payload
                    .as_ref()
                    .and_then(Value::as_i64)
                    .is_some_and(|n| n > 10)
            }),
        ),
        Vec::new(),
    );

    rt.dispatch("CREATE");
    rt.dispatch(Action::new("UPDATE").with_payload(json!(42)));
    rt.dispatch(Action::new("DELETE").with_payload(json!(3)));

    let expected = vec![
        "any:CREATE",
        "crud:CREATE",
        "any:UPDATE",
        "big:UPDATE",
        "any:DELETE",
        "crud:DELETE",
    ];
    assert_eq!(log.events(), expected);
    test_complete!("patterns_select_actions");
}

#[test]
fn subscribers_run_after_takers_are_resumed() {
    init_test("subscribers_run_after_takers_are_resumed");
    let rt = test_runtime();
    let task = rt.fork(&observer(&EventLog::new(), "t", "GO".into()), Vec::new());
    let log = EventLog::new();
    let sink = log.clone();
    let _sub = rt.subscribe(move |action| sink.push(format!("sub:{}", action.action_type)));

    rt.dispatch("GO");
    assert_eq!(log.events(), vec!["sub:GO"]);
    assert!(task.is_running(), "observer loops back to take");
    test_complete!("subscribers_run_after_takers_are_resumed");
}

#[test]
fn unsubscribe_stops_delivery() {
    init_test("unsubscribe_stops_delivery");
    let rt = test_runtime();
    let log = EventLog::new();
    let sink = log.clone();
    let sub = rt.subscribe(move |action| sink.push(action.action_type.clone()));
    let id = sub.id();

    rt.dispatch("ONE");
    assert!(sub.unsubscribe());
    rt.dispatch("TWO");
    assert!(!rt.unsubscribe(id), "already removed");
    assert_eq!(log.events(), vec!["ONE"]);
    test_complete!("unsubscribe_stops_delivery");
}

#[test]
fn a_panicking_subscriber_does_not_stop_delivery() {
    init_test("a_panicking_subscriber_does_not_stop_delivery");
    let rt = test_runtime();
    let log = EventLog::new();
    let _bad = rt.subscribe(|action| {
        assert_ne!(action.action_type, "BOOM", "listener failure");
    });
    let sink = log.clone();
    let _good = rt.subscribe(move |action| sink.push(action.action_type.clone()));

    rt.dispatch("BOOM");
    rt.dispatch("AFTER");
    assert_eq!(log.events(), vec!["BOOM", "AFTER"]);
    test_complete!("a_panicking_subscriber_does_not_stop_delivery");
}

#[test]
fn a_put_with_no_takers_still_resumes_the_putter() {
    init_test("a_put_with_no_takers_still_resumes_the_putter");
    let rt = test_runtime();
    let saga = Saga::new(|cx: Cx, _args| async move {
        cx.put(Action::new("NOBODY").with_payload(json!({"k": 1})))
            .await?;
        Ok(json!("done"))
    });
    assert_eq!(rt.run_saga(&saga, Vec::new()).unwrap(), json!("done"));
    assert_eq!(rt.stats().actions_dispatched, 1);
    test_complete!("a_put_with_no_takers_still_resumes_the_putter");
}
