//! Combinators over tasks.
//!
//! - [`race`](mod@race): first branch to settle wins, the rest are cancelled
//! - [`all`](mod@all): wait for every branch, fail fast on the first failure
//! - [`watch`]: `run_every`, `run_latest`, `run_leading` watcher sagas
//! - [`retry`]: re-issue a failing call with backoff
//!
//! `race` and `all` start one branch task per labeled effect, as children of
//! the calling task, and park the caller on a [`Group`]. The scheduler
//! evaluates a dirty group before it polls the next ready task, so losers
//! never run past the poll that settled the winner. Branches settled by the
//! same poll are ordered by declaration.

pub mod all;
pub mod race;
pub mod retry;
pub mod watch;

pub use retry::{calculate_delay, RetryPolicy};
pub use watch::{run_every, run_latest, run_leading};

use std::collections::HashSet;

use crate::effect::{Labeled, Resume};
use crate::error::{Error, Result};
use crate::runtime::TaskHandle;
use crate::types::{CancelReason, TaskId};

pub(crate) type GroupId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GroupKind {
    Race,
    All,
}

/// Branch tasks owned by one pending `race` or `all`.
#[derive(Debug)]
pub(crate) struct Group {
    pub kind: GroupKind,
    /// The task parked on the group.
    pub owner: TaskId,
    /// Labels with their branch tasks, in declaration order.
    pub branches: Vec<(String, TaskHandle)>,
}

/// What a group evaluation decided.
#[derive(Debug)]
pub(crate) enum Verdict {
    /// Keep waiting.
    Pending,
    /// Resume the owner with `result` after cancelling `losers` with `reason`.
    Settled {
        result: Result<Resume>,
        losers: Vec<TaskId>,
        reason: CancelReason,
    },
}

impl Group {
    pub(crate) fn evaluate(&self) -> Verdict {
        match self.kind {
            GroupKind::Race => race::evaluate(&self.branches),
            GroupKind::All => all::evaluate(&self.branches),
        }
    }
}

/// Rejects duplicate labels. Declaration order is the tie-break, so each
/// label must name exactly one branch.
pub(crate) fn check_labels(effects: &Labeled) -> Result<()> {
    let mut seen = HashSet::with_capacity(effects.len());
    for (label, _) in effects {
        if !seen.insert(label.as_str()) {
            return Err(Error::invalid_argument(format!(
                "duplicate branch label {label:?}"
            )));
        }
    }
    Ok(())
}

/// Branches that have not settled yet.
fn unsettled(branches: &[(String, TaskHandle)]) -> Vec<TaskId> {
    branches
        .iter()
        .filter(|(_, h)| !h.is_terminal())
        .map(|(_, h)| h.id())
        .collect()
}
