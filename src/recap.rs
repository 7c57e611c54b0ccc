//! Recap reconciliation.
//!
//! A pure classification of one node's raw entry sequence into its lifecycle
//! phase. The function borrows, never copies, and never interprets nested
//! child nodes; the renderer recurses into those itself.

use crate::trace::{Checkpoint, TraceEntry};

/// Lifecycle classification of one node's entry sequence.
#[derive(Debug)]
pub enum Recap<'a> {
    /// The sequence is empty or does not begin with a start checkpoint.
    NotStarted,

    /// The call began but its owning call path unwound before finishing.
    Interrupted {
        start: &'a Checkpoint,
        execution: &'a [TraceEntry],
    },

    /// The call ran to completion: a resolution followed by a finish.
    Resolved {
        start: &'a Checkpoint,
        execution: &'a [TraceEntry],
        resolution: &'a Checkpoint,
        finish: &'a Checkpoint,
    },
}

impl Recap<'_> {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Recap::Resolved { .. })
    }
}

/// Classify an entry sequence.
///
/// The rules, in order:
/// - no entries, or the first entry is not a start checkpoint: `NotStarted`;
/// - the last entry is not a finish checkpoint: `Interrupted`, execution is
///   everything after the start;
/// - the entry before the finish is a resolution checkpoint: `Resolved`,
///   execution is everything strictly between the start and the final pair;
/// - otherwise a finish arrived without a resolution, which correct
///   orchestration never produces: classified as `Interrupted` with the
///   trailing finish excluded from execution.
pub fn recap(entries: &[TraceEntry]) -> Recap<'_> {
    let start = match entries.first() {
        Some(TraceEntry::Checkpoint(checkpoint)) if checkpoint.kind.is_start() => checkpoint,
        _ => return Recap::NotStarted,
    };

    let finish = match entries.last() {
        Some(TraceEntry::Checkpoint(checkpoint)) if checkpoint.kind.is_finish() => checkpoint,
        _ => {
            return Recap::Interrupted {
                start,
                execution: &entries[1..],
            }
        }
    };

    let count = entries.len();
    if count >= 3 {
        if let TraceEntry::Checkpoint(resolution) = &entries[count - 2] {
            if resolution.kind.is_resolution() {
                return Recap::Resolved {
                    start,
                    execution: &entries[1..count - 2],
                    resolution,
                    finish,
                };
            }
        }
    }

    Recap::Interrupted {
        start,
        execution: &entries[1..count - 1],
    }
}
