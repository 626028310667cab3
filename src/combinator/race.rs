//! Race evaluation.
//!
//! The first branch in declaration order that has settled wins, whatever its
//! outcome. A winner that errored or was cancelled fails the race with that
//! error. Every branch still running is cancelled with `RaceLost` before the
//! owner resumes.

use crate::effect::{RaceResult, Resume};
use crate::runtime::TaskHandle;
use crate::types::CancelReason;

use super::{unsettled, Verdict};

pub(crate) fn evaluate(branches: &[(String, TaskHandle)]) -> Verdict {
    let Some((label, outcome)) = branches
        .iter()
        .find_map(|(label, h)| h.outcome().map(|o| (label, o)))
    else {
        return Verdict::Pending;
    };
    let result = outcome
        .into_result()
        .map(|value| Resume::Race(RaceResult::new(label.clone(), value)));
    Verdict::Settled {
        result,
        losers: unsettled(branches),
        reason: CancelReason::race_lost(),
    }
}
