//! Combinator suite: `race`, `all` and the watcher loops.
//!
//! Covers:
//! - Race losers are cancelled with cleanup run exactly once
//! - Simultaneous settlement is decided by declaration order
//! - `all` fails fast and cancels siblings still running
//! - `run_every`, `run_latest`, `run_leading` worker policies

#[macro_use]
mod common;

use common::*;
use serde_json::{json, Value};
use sidefx::{
    effect, run_every, run_latest, run_leading, Action, Callable, Cx, Effect, Error, ErrorKind,
    Resume, Saga,
};
use std::time::Duration;

fn init_test(test_name: &str) {
    init_test_logging();
    test_phase!(test_name);
}

/// Worker that logs `start:n`, waits, then logs `done:n`, where `n` is the
/// payload of the action that started it.
fn worker(log: &EventLog, ms: u64) -> Saga {
    let log = log.clone();
    Saga::named("worker", move |cx: Cx, args: Vec<Value>| {
        let log = log.clone();
        async move {
            let n = args
                .last()
                .and_then(|a| a.get("payload"))
                .cloned()
                .unwrap_or(Value::Null);
            log.push(format!("start:{n}"));
            let cleanup_log = log.clone();
            let tag = n.clone();
            cx.on_cleanup(move || cleanup_log.push(format!("cleanup:{tag}")));
            cx.delay(ms).await?;
            log.push(format!("done:{n}"));
            Ok(n)
        }
    })
}

fn numbered(n: i64) -> Action {
    Action::new("A").with_payload(json!(n))
}

/// Forks `forks` children that finish at once, then logs `name:settled`.
fn busy(log: &EventLog, name: &'static str, forks: usize, fail: bool) -> Saga {
    let log = log.clone();
    Saga::named(name, move |cx: Cx, _args| {
        let log = log.clone();
        async move {
            for _ in 0..forks {
                let quick = Saga::new(|_cx: Cx, _args| async move { Ok(Value::Null) });
                cx.fork(quick, Vec::new()).await?;
            }
            log.push(format!("{name}:settled"));
            if fail {
                Err(Error::user(format!("{name} failed")))
            } else {
                Ok(json!(name))
            }
        }
    })
}

/// A callable that settles on its first poll and logs `name:settled`.
fn immediate(log: &EventLog, name: &'static str, fail: bool) -> Callable {
    let log = log.clone();
    Callable::from_fn(name, move |_args| {
        log.push(format!("{name}:settled"));
        if fail {
            Err(Error::user(format!("{name} failed")))
        } else {
            Ok(json!(name))
        }
    })
}

// ============================================================================
// race
// ============================================================================

#[test]
fn race_first_to_settle_wins_and_loser_is_cancelled() {
    init_test("race_first_to_settle_wins_and_loser_is_cancelled");
    let rt = test_runtime();
    let log = EventLog::new();
    let fast = delayed(&log, "a", 2, json!("A"));
    let slow = delayed(&log, "b", 10, json!("B"));

    let racer = Saga::named("racer", move |cx: Cx, _args| {
        let fast = fast.clone();
        let slow = slow.clone();
        async move {
            let result = cx
                .race([
                    ("a", effect::call_saga(fast, Vec::new())),
                    ("b", effect::call_saga(slow, Vec::new())),
                ])
                .await?;
            let loser_absent = result.get("b").is_none();
            let (winner, value) = result.into_parts();
            Ok(json!({
                "winner": winner,
                "value": value.into_value()?,
                "loser_absent": loser_absent,
            }))
        }
    });

    let value = rt.run_saga(&racer, Vec::new()).unwrap();
    let expected = json!({"winner": "a", "value": "A", "loser_absent": true});
    assert_with_log!(value == expected, "race result", expected, value);

    test_section!("loser cleanup");
    assert_with_log!(log.count("b:cleanup") == 1, "b cleanup once", 1, log.count("b:cleanup"));
    assert_with_log!(log.count("b:done") == 0, "b never finished", 0, log.count("b:done"));
    assert_eq!(log.count("a:cleanup"), 1);

    rt.advance_time(Duration::from_millis(20)).unwrap();
    assert_eq!(log.count("b:done"), 0);
    assert_eq!(log.count("b:cleanup"), 1);
    // The loser saga and its branch.
    assert_eq!(rt.stats().tasks_cancelled, 2);
    assert_eq!(rt.live_task_count(), 0);
    test_complete!("race_first_to_settle_wins_and_loser_is_cancelled");
}

#[test]
fn race_tie_goes_to_the_first_declared_label() {
    init_test("race_tie_goes_to_the_first_declared_label");
    let rt = test_runtime();
    let racer = Saga::new(|cx: Cx, _args| async move {
        let result = cx
            .race([("second", effect::delay(5)), ("first", effect::delay(5))])
            .await?;
        Ok(json!(result.winner()))
    });
    let value = rt.run_saga(&racer, Vec::new()).unwrap();
    assert_with_log!(value == json!("second"), "winner", "second", value);
    test_complete!("race_tie_goes_to_the_first_declared_label");
}

#[test]
fn race_winner_is_the_first_to_settle_not_the_first_declared() {
    init_test("race_winner_is_the_first_to_settle_not_the_first_declared");
    let rt = test_runtime();
    let log = EventLog::new();
    let slow = busy(&log, "slow", 10, false);
    let fast = immediate(&log, "fast", false);
    let racer = Saga::new(move |cx: Cx, _args| {
        let slow = slow.clone();
        let fast = fast.clone();
        async move {
            let result = cx
                .race([
                    ("slow", effect::call_saga(slow, Vec::new())),
                    ("fast", effect::call(fast, Vec::new())),
                ])
                .await?;
            Ok(json!(result.winner()))
        }
    });
    let value = rt.run_saga(&racer, Vec::new()).unwrap();
    assert_with_log!(value == json!("fast"), "winner", "fast", value);
    assert_with_log!(
        log.events() == vec!["fast:settled"],
        "loser never ran",
        "[fast:settled]",
        log.events()
    );
    rt.run_until_quiescent().unwrap();
    assert_eq!(log.count("slow:settled"), 0);
    assert_eq!(rt.live_task_count(), 0);
    test_complete!("race_winner_is_the_first_to_settle_not_the_first_declared");
}

#[test]
fn race_losers_leave_no_actions_behind() {
    init_test("race_losers_leave_no_actions_behind");
    let rt = test_runtime();
    let log = EventLog::new();
    let seen = log.clone();
    let _sub = rt.subscribe(move |action| seen.push(format!("seen:{}", action.action_type)));
    let announcer = Saga::named("announcer", |cx: Cx, _args| async move {
        cx.put("FROM_SAGA").await?;
        Ok(Value::Null)
    });
    let fast = immediate(&log, "fast", false);
    let racer = Saga::new(move |cx: Cx, _args| {
        let announcer = announcer.clone();
        let fast = fast.clone();
        async move {
            let result = cx
                .race([
                    ("put", effect::put("FROM_BRANCH")),
                    ("saga", effect::call_saga(announcer, Vec::new())),
                    ("fast", effect::call(fast, Vec::new())),
                ])
                .await?;
            Ok(json!(result.winner()))
        }
    });
    assert_eq!(rt.run_saga(&racer, Vec::new()).unwrap(), json!("fast"));
    rt.run_until_quiescent().unwrap();
    assert_with_log!(
        log.events() == vec!["fast:settled"],
        "no loser action delivered",
        "[fast:settled]",
        log.events()
    );
    assert_eq!(rt.stats().actions_dispatched, 0);
    test_complete!("race_losers_leave_no_actions_behind");
}

#[test]
fn race_fails_when_the_winner_fails() {
    init_test("race_fails_when_the_winner_fails");
    let (rt, reports) = runtime_with_reports();
    let log = EventLog::new();
    let slow = delayed(&log, "slow", 10, Value::Null);
    let racer = Saga::new(move |cx: Cx, _args| {
        let slow = slow.clone();
        async move {
            cx.race([
                ("boom", effect::call_saga(failing("boom", 1), Vec::new())),
                ("slow", effect::call_saga(slow, Vec::new())),
            ])
            .await?;
            Ok(Value::Null)
        }
    });
    let err = rt.run_saga(&racer, Vec::new()).unwrap_err();
    assert_with_log!(err.kind() == ErrorKind::User, "kind", ErrorKind::User, err.kind());
    assert_eq!(err.message(), Some("boom failed"));
    assert_eq!(log.count("slow:cleanup"), 1);
    assert_eq!(log.count("slow:done"), 0);
    assert!(reports.lock().is_empty(), "joined errors are not unhandled");
    test_complete!("race_fails_when_the_winner_fails");
}

#[test]
fn race_rejects_empty_and_duplicate_labels() {
    init_test("race_rejects_empty_and_duplicate_labels");
    let rt = test_runtime();
    let empty = Saga::new(|cx: Cx, _args| async move {
        cx.race(Vec::<(String, Effect)>::new()).await?;
        Ok(Value::Null)
    });
    let err = rt.run_saga(&empty, Vec::new()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let duplicate = Saga::new(|cx: Cx, _args| async move {
        cx.race([("x", effect::delay(1)), ("x", effect::delay(2))]).await?;
        Ok(Value::Null)
    });
    let err = rt.run_saga(&duplicate, Vec::new()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert_eq!(rt.live_task_count(), 0);
    test_complete!("race_rejects_empty_and_duplicate_labels");
}

#[test]
fn cancelling_the_racer_cancels_every_branch() {
    init_test("cancelling_the_racer_cancels_every_branch");
    let rt = test_runtime();
    let log = EventLog::new();
    let a = delayed(&log, "a", 5, Value::Null);
    let b = delayed(&log, "b", 7, Value::Null);
    let racer = Saga::new(move |cx: Cx, _args| {
        let a = a.clone();
        let b = b.clone();
        async move {
            cx.race([
                ("a", effect::call_saga(a, Vec::new())),
                ("b", effect::call_saga(b, Vec::new())),
            ])
            .await?;
            Ok(Value::Null)
        }
    });
    let task = rt.fork(&racer, Vec::new());
    assert_eq!(rt.live_task_count(), 5);
    rt.cancel(&task);
    assert_outcome_cancelled!(task.outcome());
    assert_eq!(log.count("a:cleanup"), 1);
    assert_eq!(log.count("b:cleanup"), 1);
    assert_eq!(rt.live_task_count(), 0);
    rt.advance_time(Duration::from_millis(10)).unwrap();
    assert_eq!(log.count("a:done") + log.count("b:done"), 0);
    test_complete!("cancelling_the_racer_cancels_every_branch");
}

// ============================================================================
// all
// ============================================================================

#[test]
fn all_collects_every_result_in_declaration_order() {
    init_test("all_collects_every_result_in_declaration_order");
    let rt = test_runtime();
    let log = EventLog::new();
    let x = delayed(&log, "x", 3, json!(1));
    let saga = Saga::new(move |cx: Cx, _args| {
        let x = x.clone();
        async move {
            let all = cx
                .all([
                    ("x", effect::call_saga(x, Vec::new())),
                    ("y", effect::delay(1)),
                ])
                .await?;
            assert_eq!(all.get("x"), Some(&Resume::Value(json!(1))));
            assert_eq!(all.get("y"), Some(&Resume::Unit));
            let labels: Vec<&str> = all.iter().map(|(label, _)| label).collect();
            Ok(json!(labels))
        }
    });
    let value = rt.run_saga(&saga, Vec::new()).unwrap();
    assert_eq!(value, json!(["x", "y"]));
    test_complete!("all_collects_every_result_in_declaration_order");
}

#[test]
fn all_of_nothing_resolves_empty() {
    init_test("all_of_nothing_resolves_empty");
    let rt = test_runtime();
    let saga = Saga::new(|cx: Cx, _args| async move {
        let all = cx.all(Vec::<(String, Effect)>::new()).await?;
        Ok(json!(all.is_empty()))
    });
    assert_eq!(rt.run_saga(&saga, Vec::new()).unwrap(), json!(true));
    test_complete!("all_of_nothing_resolves_empty");
}

#[test]
fn all_fails_fast_and_cancels_running_siblings() {
    init_test("all_fails_fast_and_cancels_running_siblings");
    let (rt, reports) = runtime_with_reports();
    let log = EventLog::new();
    let x = delayed(&log, "x", 10, json!("x"));
    let saga = Saga::new(move |cx: Cx, _args| {
        let x = x.clone();
        async move {
            cx.all([
                ("x", effect::call_saga(x, Vec::new())),
                ("y", effect::call_saga(failing("y", 5), Vec::new())),
            ])
            .await?;
            Ok(Value::Null)
        }
    });
    let err = rt.run_saga(&saga, Vec::new()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::User);
    assert_eq!(err.message(), Some("y failed"));
    assert_with_log!(log.count("x:cleanup") == 1, "x cleanup", 1, log.count("x:cleanup"));
    assert_eq!(log.count("x:done"), 0);
    assert_eq!(rt.now().as_millis(), 5);
    assert!(reports.lock().is_empty());
    test_complete!("all_fails_fast_and_cancels_running_siblings");
}

#[test]
fn all_discards_results_that_completed_before_the_failure() {
    init_test("all_discards_results_that_completed_before_the_failure");
    let (rt, reports) = runtime_with_reports();
    let log = EventLog::new();
    let x = delayed(&log, "x", 2, json!("x"));
    let saga = Saga::new(move |cx: Cx, _args| {
        let x = x.clone();
        async move {
            cx.all([
                ("x", effect::call_saga(x, Vec::new())),
                ("y", effect::call_saga(failing("y", 5), Vec::new())),
            ])
            .await?;
            Ok(Value::Null)
        }
    });
    let err = rt.run_saga(&saga, Vec::new()).unwrap_err();
    assert_eq!(err.message(), Some("y failed"));
    assert_eq!(log.count("x:done"), 1);
    assert_eq!(log.count("x:cleanup"), 1);
    assert_eq!(rt.stats().tasks_cancelled, 0);
    assert!(reports.lock().is_empty(), "no error is raised for x");
    test_complete!("all_discards_results_that_completed_before_the_failure");
}

#[test]
fn all_reports_the_first_declared_failure_among_simultaneous_ones() {
    init_test("all_reports_the_first_declared_failure_among_simultaneous_ones");
    let rt = test_runtime();
    let saga = Saga::new(|cx: Cx, _args| async move {
        cx.all([
            ("ok", effect::delay(1)),
            ("second", effect::call_saga(failing("second", 4), Vec::new())),
            ("third", effect::call_saga(failing("third", 4), Vec::new())),
        ])
        .await?;
        Ok(Value::Null)
    });
    let err = rt.run_saga(&saga, Vec::new()).unwrap_err();
    assert_with_log!(
        err.message() == Some("second failed"),
        "first declared failure",
        "second failed",
        err.message()
    );
    test_complete!("all_reports_the_first_declared_failure_among_simultaneous_ones");
}

#[test]
fn all_fails_with_the_first_failure_to_settle() {
    init_test("all_fails_with_the_first_failure_to_settle");
    let rt = test_runtime();
    let log = EventLog::new();
    let late = busy(&log, "late", 10, true);
    let early = immediate(&log, "early", true);
    let saga = Saga::new(move |cx: Cx, _args| {
        let late = late.clone();
        let early = early.clone();
        async move {
            cx.all([
                ("late", effect::call_saga(late, Vec::new())),
                ("early", effect::call(early, Vec::new())),
            ])
            .await?;
            Ok(Value::Null)
        }
    });
    let err = rt.run_saga(&saga, Vec::new()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EffectResolution);
    let cause = err.cause().and_then(Error::message);
    assert_with_log!(cause == Some("early failed"), "failure", "early failed", cause);
    assert_eq!(log.events(), vec!["early:settled"]);
    test_complete!("all_fails_with_the_first_failure_to_settle");
}

// ============================================================================
// Watcher loops
// ============================================================================

#[test]
fn run_latest_cancels_the_superseded_worker() {
    init_test("run_latest_cancels_the_superseded_worker");
    let rt = test_runtime();
    let log = EventLog::new();
    rt.register("latest", &run_latest("A", worker(&log, 10)), Vec::new())
        .unwrap();

    rt.dispatch(numbered(1));
    rt.advance_time(Duration::from_millis(3)).unwrap();
    rt.dispatch(numbered(2));
    rt.advance_time(Duration::from_millis(10)).unwrap();

    let expected = vec!["start:1", "cleanup:1", "start:2", "done:2", "cleanup:2"];
    let events = log.events();
    assert_with_log!(events == expected, "latest events", expected, events);
    let stats = rt.stats();
    assert_eq!(stats.tasks_cancelled, 1);
    assert_eq!(stats.tasks_completed, 1);
    test_complete!("run_latest_cancels_the_superseded_worker");
}

#[test]
fn run_every_keeps_overlapping_workers() {
    init_test("run_every_keeps_overlapping_workers");
    let rt = test_runtime();
    let log = EventLog::new();
    rt.register("every", &run_every("A", worker(&log, 10)), Vec::new())
        .unwrap();

    rt.dispatch(numbered(1));
    rt.dispatch(numbered(2));
    rt.advance_time(Duration::from_millis(10)).unwrap();

    assert_eq!(log.count("done:1"), 1);
    assert_eq!(log.count("done:2"), 1);
    let stats = rt.stats();
    assert_with_log!(stats.tasks_cancelled == 0, "nothing cancelled", 0, stats.tasks_cancelled);
    assert_eq!(stats.tasks_completed, 2);
    test_complete!("run_every_keeps_overlapping_workers");
}

#[test]
fn run_leading_ignores_actions_while_busy() {
    init_test("run_leading_ignores_actions_while_busy");
    let rt = test_runtime();
    let log = EventLog::new();
    rt.register("leading", &run_leading("A", worker(&log, 10)), Vec::new())
        .unwrap();

    rt.dispatch(numbered(1));
    rt.dispatch(numbered(2));
    rt.advance_time(Duration::from_millis(10)).unwrap();
    rt.dispatch(numbered(3));
    rt.advance_time(Duration::from_millis(10)).unwrap();

    let expected = vec!["start:1", "done:1", "cleanup:1", "start:3", "done:3", "cleanup:3"];
    let events = log.events();
    assert_with_log!(events == expected, "leading events", expected, events);
    test_complete!("run_leading_ignores_actions_while_busy");
}

#[test]
fn watchers_ignore_non_matching_actions() {
    init_test("watchers_ignore_non_matching_actions");
    let rt = test_runtime();
    let log = EventLog::new();
    rt.register("every", &run_every("A", worker(&log, 1)), Vec::new())
        .unwrap();
    rt.dispatch(Action::new("B").with_payload(json!(9)));
    rt.advance_time(Duration::from_millis(5)).unwrap();
    assert!(log.events().is_empty());
    test_complete!("watchers_ignore_non_matching_actions");
}

#[test]
fn unregistering_a_watcher_cancels_its_workers() {
    init_test("unregistering_a_watcher_cancels_its_workers");
    let rt = test_runtime();
    let log = EventLog::new();
    let root = rt
        .register("every", &run_every("A", worker(&log, 10)), Vec::new())
        .unwrap();
    rt.dispatch(numbered(1));
    rt.dispatch(numbered(2));
    rt.unregister("every");

    assert_outcome_cancelled!(root.outcome());
    assert_eq!(log.count("cleanup:1"), 1);
    assert_eq!(log.count("cleanup:2"), 1);
    rt.advance_time(Duration::from_millis(20)).unwrap();
    assert_eq!(log.count("done:1") + log.count("done:2"), 0);
    assert_eq!(rt.live_task_count(), 0);
    test_complete!("unregistering_a_watcher_cancels_its_workers");
}
