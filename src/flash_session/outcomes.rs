//! Outcome of the flashing, per target.

use std::collections::BTreeMap;
use std::fmt;

use log::debug;

// =============================================================================
// Public Interface
// =============================================================================

/// Result of flashing one target.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Outcome {
    /// The device acknowledged the whole image and verified its checksum.
    Success,
    /// The device refused or failed the transfer, or could not be reached.
    Failure,
    /// No terminal state was reached yet.
    Pending,
}
impl Outcome {
    pub fn is_terminal(self) -> bool {
        self != Outcome::Pending
    }
}
impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
            Outcome::Pending => "pending",
        };
        f.write_str(text)
    }
}

/// Final result of a flashing session, handed to the reporting layer.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FlashReport {
    /// One terminal outcome per target. Targets that never reached a terminal
    /// state are reported as [`Outcome::Failure`].
    pub outcomes: BTreeMap<String, Outcome>,
    /// Targets still pending when the session was aborted because the event
    /// loop stalled. Empty when the session ran to completion.
    pub stalled: Vec<String>,
    /// Number of connections opened per target. More than one means the device
    /// rebooted at least once.
    pub connections: BTreeMap<String, u32>,
}
impl FlashReport {
    pub fn outcome(&self, target: &str) -> Option<Outcome> {
        self.outcomes.get(target).copied()
    }

    pub fn all_succeeded(&self) -> bool {
        !self.outcomes.is_empty() && self.outcomes.values().all(|o| *o == Outcome::Success)
    }

    /// `true` when the session was aborted by the multiplexer timeout.
    pub fn aborted(&self) -> bool {
        !self.stalled.is_empty()
    }

    pub fn connections_to(&self, target: &str) -> u32 {
        self.connections.get(target).copied().unwrap_or(0)
    }
}

// =============================================================================
// Crate-Public Interface
// =============================================================================

/// Maps each target to its outcome while the session runs.
///
/// Entries start [`Outcome::Pending`] and are overwritten only by terminal
/// transitions. Only the last recorded value is authoritative.
#[derive(Debug, Default)]
pub(crate) struct OutcomeTable {
    entries: BTreeMap<String, Outcome>,
}
impl OutcomeTable {
    /// Add a target. Returns `false` if the target is already in the table.
    pub fn insert_pending(&mut self, target: &str) -> bool {
        if self.entries.contains_key(target) {
            return false;
        }
        self.entries.insert(target.to_owned(), Outcome::Pending);
        true
    }

    pub fn record(&mut self, target: &str, outcome: Outcome) {
        debug_assert!(outcome.is_terminal());
        if let Some(previous) = self.entries.insert(target.to_owned(), outcome) {
            if previous != Outcome::Pending {
                debug!("{}: outcome {} replaced by {}", target, previous, outcome);
            }
        }
    }

    #[cfg(test)]
    pub fn get(&self, target: &str) -> Option<Outcome> {
        self.entries.get(target).copied()
    }

    pub fn pending(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, outcome)| !outcome.is_terminal())
            .map(|(target, _)| target.clone())
            .collect()
    }

    /// Close the table. Whatever is still pending becomes a failure.
    pub fn finalize(self, stalled: Vec<String>, connections: BTreeMap<String, u32>) -> FlashReport {
        let outcomes = self
            .entries
            .into_iter()
            .map(|(target, outcome)| match outcome {
                Outcome::Pending => (target, Outcome::Failure),
                terminal => (target, terminal),
            })
            .collect();
        FlashReport {
            outcomes,
            stalled,
            connections,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[test]
fn targets_start_pending() {
    let mut table = OutcomeTable::default();
    assert!(table.insert_pending("10.0.0.1"));
    assert_eq!(table.get("10.0.0.1"), Some(Outcome::Pending));
    assert_eq!(table.pending(), vec!["10.0.0.1".to_owned()]);
}

#[test]
fn duplicate_targets_are_refused() {
    let mut table = OutcomeTable::default();
    assert!(table.insert_pending("10.0.0.1"));
    table.record("10.0.0.1", Outcome::Success);
    assert!(!table.insert_pending("10.0.0.1"));
    assert_eq!(table.get("10.0.0.1"), Some(Outcome::Success));
}

#[test]
fn last_recorded_outcome_wins() {
    let mut table = OutcomeTable::default();
    table.insert_pending("a");
    table.record("a", Outcome::Failure);
    table.record("a", Outcome::Success);
    assert_eq!(table.get("a"), Some(Outcome::Success));
}

#[test]
fn finalize_turns_pending_into_failure() {
    let mut table = OutcomeTable::default();
    table.insert_pending("a");
    table.insert_pending("b");
    table.record("a", Outcome::Success);

    let report = table.finalize(vec!["b".to_owned()], BTreeMap::new());
    assert_eq!(report.outcome("a"), Some(Outcome::Success));
    assert_eq!(report.outcome("b"), Some(Outcome::Failure));
    assert!(report.aborted());
    assert!(!report.all_succeeded());
}

#[test]
fn empty_report_is_not_a_success() {
    let report = OutcomeTable::default().finalize(Vec::new(), BTreeMap::new());
    assert!(!report.all_succeeded());
    assert_eq!(report.connections_to("a"), 0);
}
