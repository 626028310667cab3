//! All evaluation.
//!
//! Fails with the error of the first failed branch in declaration order
//! among those settled so far, cancelling the branches still running with
//! `FailFast`. Completes once every branch has completed, with each label's
//! value in declaration order.

use crate::effect::{AllResult, Resume};
use crate::runtime::TaskHandle;
use crate::types::{CancelReason, Outcome};

use super::{unsettled, Verdict};

pub(crate) fn evaluate(branches: &[(String, TaskHandle)]) -> Verdict {
    let failed = branches.iter().find_map(|(_, h)| match h.outcome() {
        Some(o @ (Outcome::Err(_) | Outcome::Cancelled(_))) => Some(o),
        _ => None,
    });
    if let Some(failure) = failed {
        let result = failure.into_result().map(|_| Resume::Unit);
        return Verdict::Settled {
            result,
            losers: unsettled(branches),
            reason: CancelReason::sibling_failed(),
        };
    }

    let mut entries = Vec::with_capacity(branches.len());
    for (label, handle) in branches {
        match handle.outcome() {
            Some(Outcome::Ok(value)) => entries.push((label.clone(), value)),
            _ => return Verdict::Pending,
        }
    }
    Verdict::Settled {
        result: Ok(Resume::All(AllResult::new(entries))),
        losers: Vec::new(),
        reason: CancelReason::sibling_failed(),
    }
}
