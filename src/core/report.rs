//! Aggregated diagnostic report attached to a deadlock error
//!
//! Attempts are grouped by lock kind and normalized call-site signature, so
//! a hundred threads blocked on the same line show up as one section with a
//! count of one hundred. Group order carries no meaning.

use crate::core::trace::{CapturedTrace, ParsedTrace};
use crate::core::types::LockKind;
use fxhash::FxHashMap;
use serde::Serialize;
use std::fmt;

/// Fixed first line of every report
pub const BANNER: &str = "Deadlock detected";

/// All attempts of one kind that share a call site
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportGroup {
    pub kind: LockKind,
    pub count: usize,
    /// Representative normalized trace of the group
    pub signature: String,
}

/// Attempts that were live on a lock when one of its callers timed out
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeadlockReport {
    pub groups: Vec<ReportGroup>,
}

impl DeadlockReport {
    /// Resolve, parse and group a registry snapshot
    ///
    /// Symbol lookup for every captured trace happens here.
    pub fn build(snapshot: &[(LockKind, CapturedTrace)]) -> Self {
        let mut index: FxHashMap<(LockKind, String), usize> = FxHashMap::default();
        let mut groups: Vec<ReportGroup> = Vec::new();

        for (kind, trace) in snapshot {
            let parsed = ParsedTrace::from_trace(&trace.resolve(), *kind);
            match index.get(&(parsed.kind, parsed.signature.clone())) {
                Some(&i) => groups[i].count += 1,
                None => {
                    index.insert((parsed.kind, parsed.signature.clone()), groups.len());
                    groups.push(ReportGroup {
                        kind: parsed.kind,
                        count: 1,
                        signature: parsed.signature,
                    });
                }
            }
        }

        DeadlockReport { groups }
    }

    /// Find the group for a kind whose signature contains `needle`
    pub fn group(&self, kind: LockKind, needle: &str) -> Option<&ReportGroup> {
        self.groups
            .iter()
            .find(|g| g.kind == kind && g.signature.contains(needle))
    }

    /// Total number of attempts across all groups
    pub fn total(&self) -> usize {
        self.groups.iter().map(|g| g.count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

impl fmt::Display for DeadlockReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(BANNER)?;
        for group in &self.groups {
            let noun = if group.count == 1 { "occurrence" } else { "occurrences" };
            write!(
                f,
                "\n\n* * * * * {} LOCK - {} {} * * * * *\n{}",
                group.kind, group.count, noun, group.signature
            )?;
        }
        Ok(())
    }
}
