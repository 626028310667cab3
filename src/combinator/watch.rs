//! Watcher combinators.
//!
//! Each combinator returns a [`Saga`] that loops forever on a pattern `take`
//! and forks the worker saga with the watcher's own arguments followed by
//! the matched action. Workers are attached children of the watcher, so
//! unregistering the watcher cancels every worker still running.
//!
//! ```rust,ignore
//! rt.register("search", run_latest("SEARCH", fetch_results), vec![])?;
//! ```

use serde_json::Value;

use crate::cx::Cx;
use crate::effect::{self, Saga};
use crate::error::Result;
use crate::runtime::TaskHandle;
use crate::tracing_compat::trace;
use crate::types::{Action, CancelReason, Pattern};

fn worker_args(args: &[Value], action: Action) -> Vec<Value> {
    let mut out = Vec::with_capacity(args.len() + 1);
    out.extend_from_slice(args);
    out.push(Value::from(action));
    out
}

/// Forks a new worker for every matching action. Workers overlap freely.
#[must_use]
pub fn run_every(pattern: impl Into<Pattern>, worker: Saga) -> Saga {
    let pattern = pattern.into();
    let name = format!("run_every({pattern}, {})", worker.name());
    Saga::named(name, move |cx, args| {
        every(cx, pattern.clone(), worker.clone(), args)
    })
}

/// Cancels the previous worker, if still running, before forking the next.
#[must_use]
pub fn run_latest(pattern: impl Into<Pattern>, worker: Saga) -> Saga {
    let pattern = pattern.into();
    let name = format!("run_latest({pattern}, {})", worker.name());
    Saga::named(name, move |cx, args| {
        latest(cx, pattern.clone(), worker.clone(), args)
    })
}

/// Ignores matching actions while the previous worker is still running.
#[must_use]
pub fn run_leading(pattern: impl Into<Pattern>, worker: Saga) -> Saga {
    let pattern = pattern.into();
    let name = format!("run_leading({pattern}, {})", worker.name());
    Saga::named(name, move |cx, args| {
        leading(cx, pattern.clone(), worker.clone(), args)
    })
}

async fn every(cx: Cx, pattern: Pattern, worker: Saga, args: Vec<Value>) -> Result<Value> {
    loop {
        let action = cx.take(pattern.clone()).await?;
        cx.fork(worker.clone(), worker_args(&args, action)).await?;
    }
}

async fn latest(cx: Cx, pattern: Pattern, worker: Saga, args: Vec<Value>) -> Result<Value> {
    let mut last: Option<TaskHandle> = None;
    loop {
        let action = cx.take(pattern.clone()).await?;
        if let Some(prev) = last.take().filter(TaskHandle::is_running) {
            trace!(task = %prev.id(), "superseding worker");
            cx.run(effect::cancel_with(&prev, CancelReason::superseded()))
                .await?
                .into_unit()?;
        }
        last = Some(cx.fork(worker.clone(), worker_args(&args, action)).await?);
    }
}

async fn leading(cx: Cx, pattern: Pattern, worker: Saga, args: Vec<Value>) -> Result<Value> {
    let mut current: Option<TaskHandle> = None;
    loop {
        let action = cx.take(pattern.clone()).await?;
        if current.as_ref().is_some_and(TaskHandle::is_running) {
            trace!(action = %action.action_type, "worker busy, action ignored");
            continue;
        }
        current = Some(cx.fork(worker.clone(), worker_args(&args, action)).await?);
    }
}
