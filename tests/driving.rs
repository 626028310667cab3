//! Runtime driving suite: external wakeups, remote dispatch, wall clock.

#[macro_use]
mod common;

use common::*;
use parking_lot::Mutex;
use serde_json::{json, Value};
use sidefx::{Action, Callable, Cx, RuntimeBuilder, Saga, TaskStatus, TimeMode};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::thread;
use std::time::{Duration, Instant};

fn init_test(test_name: &str) {
    init_test_logging();
    test_phase!(test_name);
}

/// A one-shot value completed from another thread.
#[derive(Default)]
struct Slot {
    value: Option<Value>,
    waker: Option<Waker>,
}

#[derive(Clone, Default)]
struct Completion(Arc<Mutex<Slot>>);

impl Completion {
    fn complete(&self, value: Value) {
        let waker = {
            let mut slot = self.0.lock();
            slot.value = Some(value);
            slot.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

impl Future for Completion {
    type Output = sidefx::Result<Value>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slot = self.0.lock();
        match slot.value.take() {
            Some(value) => Poll::Ready(Ok(value)),
            None => {
                slot.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

#[test]
fn an_external_call_completes_from_another_thread() {
    init_test("an_external_call_completes_from_another_thread");
    let rt = test_runtime();
    let completion = Completion::default();
    let request = {
        let completion = completion.clone();
        Callable::new("request", move |_args| completion.clone())
    };
    let saga = Saga::new(move |cx: Cx, _args| {
        let request = request.clone();
        async move {
            let reply = cx.call(request, Vec::new()).await?;
            Ok(json!({ "reply": reply }))
        }
    });
    let task = rt.fork(&saga, Vec::new());
    assert_eq!(task.status(), TaskStatus::Running);

    let remote = completion.clone();
    let worker = thread::spawn(move || {
        thread::sleep(Duration::from_millis(10));
        remote.complete(json!("pong"));
    });
    rt.run_until_quiescent().unwrap();
    worker.join().unwrap();

    let value = task.outcome().map(|o| o.into_result().and_then(|r| r.into_value()));
    assert_eq!(value.map(Result::ok), Some(Some(json!({ "reply": "pong" }))));
    test_complete!("an_external_call_completes_from_another_thread");
}

#[test]
fn remote_dispatch_wakes_a_waiting_runtime() {
    init_test("remote_dispatch_wakes_a_waiting_runtime");
    let rt = test_runtime();
    let log = EventLog::new();
    let listener = {
        let log = log.clone();
        Saga::named("listener", move |cx: Cx, _args| {
            let log = log.clone();
            async move {
                let action = cx.take("REMOTE").await?;
                log.push(format!("got {}", action.payload.unwrap_or_default()));
                Ok(Value::Null)
            }
        })
    };
    let task = rt.fork(&listener, Vec::new());

    let remote = rt.remote();
    let sender = thread::spawn(move || {
        thread::sleep(Duration::from_millis(10));
        remote.dispatch(Action::new("REMOTE").with_payload(json!(5)));
    });
    assert!(rt.wait_for_work(Duration::from_secs(5)));
    rt.run_until_stalled().unwrap();
    sender.join().unwrap();

    assert!(task.is_terminal());
    assert_eq!(log.events(), vec!["got 5"]);
    test_complete!("remote_dispatch_wakes_a_waiting_runtime");
}

#[test]
fn wait_for_work_times_out_when_idle() {
    init_test("wait_for_work_times_out_when_idle");
    let rt = test_runtime();
    let started = Instant::now();
    assert!(!rt.wait_for_work(Duration::from_millis(20)));
    assert!(started.elapsed() >= Duration::from_millis(20));
    test_complete!("wait_for_work_times_out_when_idle");
}

#[test]
fn the_wall_clock_sleeps_through_delays() {
    init_test("the_wall_clock_sleeps_through_delays");
    let rt = RuntimeBuilder::new().time_mode(TimeMode::Wall).build().unwrap();
    assert!(rt.advance_time(Duration::from_millis(1)).is_err());

    let saga = Saga::new(|cx: Cx, _args| async move {
        let before = cx.now();
        cx.delay(15).await?;
        Ok(json!(cx.now().duration_since(before).as_millis() >= 15))
    });
    let started = Instant::now();
    assert_eq!(rt.run_saga(&saga, Vec::new()).unwrap(), json!(true));
    assert!(started.elapsed() >= Duration::from_millis(15));
    test_complete!("the_wall_clock_sleeps_through_delays");
}

#[test]
fn virtual_time_jumps_straight_to_the_next_deadline() {
    init_test("virtual_time_jumps_straight_to_the_next_deadline");
    let rt = test_runtime();
    let log = EventLog::new();
    rt.fork(&delayed(&log, "long", 60_000, Value::Null), Vec::new());
    rt.fork(&delayed(&log, "short", 1_000, Value::Null), Vec::new());

    let started = Instant::now();
    rt.run_until_quiescent().unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(rt.now().as_millis(), 60_000);
    let done: Vec<String> = log
        .events()
        .into_iter()
        .filter(|e| e.ends_with(":done"))
        .collect();
    assert_eq!(done, vec!["short:done", "long:done"]);
    test_complete!("virtual_time_jumps_straight_to_the_next_deadline");
}

#[cfg(feature = "config-file")]
#[test]
fn builder_methods_override_the_config_file() {
    use std::io::Write;

    init_test("builder_methods_override_the_config_file");
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "[runtime]\ntime_mode = \"virtual\"\nauto_reap = false\n\n[registry]\nmax_watchers = 3"
    )
    .unwrap();

    let config = RuntimeBuilder::new()
        .config_file(file.path())
        .max_watchers(5)
        .resolve()
        .unwrap();
    assert_eq!(config.time_mode, TimeMode::Virtual);
    assert_eq!(config.max_watchers, 5);
    assert!(!config.auto_reap);
    test_complete!("builder_methods_override_the_config_file");
}
