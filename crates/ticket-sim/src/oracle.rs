use std::collections::BTreeSet;

use anyhow::Result;
use ticket_core::Id;
use ticket_core::snapshot::Snapshot;
use ticket_core::ticket::MergeStatus;

use crate::SimulationResult;
use crate::peer::{Peer, PeerId, PeerView};

// ── Result types ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleResult {
    pub passed: bool,
    pub violations: Vec<InvariantViolation>,
}

impl OracleResult {
    const fn pass() -> Self {
        Self {
            passed: true,
            violations: Vec::new(),
        }
    }

    fn from_violations(violations: Vec<InvariantViolation>) -> Self {
        Self {
            passed: violations.is_empty(),
            violations,
        }
    }

    fn merge(mut self, other: Self) -> Self {
        if !other.passed {
            self.passed = false;
            self.violations.extend(other.violations);
        }
        self
    }
}

// ── Violations ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// Settling ran out of passes while pulls still changed refs.
    Unsettled,

    /// Two peers know different tickets.
    TicketSet {
        peer_a: PeerId,
        peer_b: PeerId,
        only_in_a: Vec<String>,
        only_in_b: Vec<String>,
    },

    /// Two peers compiled the same ticket differently.
    Divergence {
        peer_a: PeerId,
        peer_b: PeerId,
        ticket: String,
        field: &'static str,
    },

    /// Committed operations missing from a peer's replay.
    LostOperations { peer: PeerId, missing: usize },

    /// Pulling again after settling still changed something.
    NotIdempotent {
        peer: PeerId,
        ticket: String,
        status: MergeStatus,
    },
}

impl std::fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unsettled => write!(f, "Unsettled: replicas still changing after the last pass"),
            Self::TicketSet {
                peer_a,
                peer_b,
                only_in_a,
                only_in_b,
            } => write!(
                f,
                "TicketSet: peers {peer_a} and {peer_b} differ \
                 (only_in_a={only_in_a:?}, only_in_b={only_in_b:?})"
            ),
            Self::Divergence {
                peer_a,
                peer_b,
                ticket,
                field,
            } => write!(
                f,
                "Divergence: peers {peer_a} and {peer_b} disagree on {field} of ticket {ticket}"
            ),
            Self::LostOperations { peer, missing } => {
                write!(f, "LostOperations: peer {peer} replays without {missing} committed ops")
            }
            Self::NotIdempotent {
                peer,
                ticket,
                status,
            } => write!(
                f,
                "NotIdempotent: re-pulling ticket {ticket} into peer {peer} gave {status}"
            ),
        }
    }
}

// ── Oracle ────────────────────────────────────────────────────────────────────

/// Checks a finished run for merge convergence.
pub struct ConvergenceOracle;

impl ConvergenceOracle {
    /// Run every check.
    ///
    /// # Errors
    ///
    /// Returns an error if a replica cannot be read while re-pulling.
    pub fn check_all(result: &SimulationResult) -> Result<OracleResult> {
        let settled = if result.settled {
            OracleResult::pass()
        } else {
            OracleResult::from_violations(vec![InvariantViolation::Unsettled])
        };
        Ok(settled
            .merge(Self::check_convergence(&result.views))
            .merge(Self::check_no_lost_operations(&result.views, &result.emitted))
            .merge(Self::check_idempotence(&result.peers)?))
    }

    /// Every peer knows the same tickets and compiles them identically.
    #[must_use]
    pub fn check_convergence(views: &[PeerView]) -> OracleResult {
        let Some(first) = views.first() else {
            return OracleResult::pass();
        };
        let mut violations = Vec::new();
        for (peer, view) in views.iter().enumerate().skip(1) {
            let a: BTreeSet<&Id> = first.tickets.keys().collect();
            let b: BTreeSet<&Id> = view.tickets.keys().collect();
            if a != b {
                violations.push(InvariantViolation::TicketSet {
                    peer_a: 0,
                    peer_b: peer,
                    only_in_a: a.difference(&b).map(|id| id.human().to_string()).collect(),
                    only_in_b: b.difference(&a).map(|id| id.human().to_string()).collect(),
                });
                continue;
            }
            for (id, snap) in &first.tickets {
                let Some(other) = view.tickets.get(id) else {
                    continue;
                };
                if let Some(field) = first_difference(snap, other) {
                    violations.push(InvariantViolation::Divergence {
                        peer_a: 0,
                        peer_b: peer,
                        ticket: id.human().to_string(),
                        field,
                    });
                }
            }
        }
        OracleResult::from_violations(violations)
    }

    /// Every committed operation shows up in every peer's replay.
    #[must_use]
    pub fn check_no_lost_operations(views: &[PeerView], emitted: &BTreeSet<Id>) -> OracleResult {
        let violations = views
            .iter()
            .enumerate()
            .filter_map(|(peer, view)| {
                let replayed: BTreeSet<Id> = view
                    .tickets
                    .values()
                    .flat_map(|s| s.operations.iter().map(ticket_core::Operation::id))
                    .collect();
                let missing = emitted.difference(&replayed).count();
                (missing > 0).then_some(InvariantViolation::LostOperations { peer, missing })
            })
            .collect();
        OracleResult::from_violations(violations)
    }

    /// Once settled, another round of pulls changes nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if a pull fails.
    pub fn check_idempotence(peers: &[Peer]) -> Result<OracleResult> {
        let mut violations = Vec::new();
        for to in peers {
            for from in peers {
                if to.id() == from.id() {
                    continue;
                }
                for r in to.pull_from(from)? {
                    if let Ok(status) = r.outcome {
                        if status != MergeStatus::UpToDate {
                            violations.push(InvariantViolation::NotIdempotent {
                                peer: to.id(),
                                ticket: r.id.human().to_string(),
                                status,
                            });
                        }
                    }
                }
            }
        }
        Ok(OracleResult::from_violations(violations))
    }
}

/// Name of the first field on which two snapshots of one ticket disagree.
fn first_difference(a: &Snapshot, b: &Snapshot) -> Option<&'static str> {
    if a.title != b.title {
        Some("title")
    } else if a.status != b.status {
        Some("status")
    } else if a.labels != b.labels {
        Some("labels")
    } else if a.assignee != b.assignee {
        Some("assignee")
    } else if a.comments != b.comments {
        Some("comments")
    } else if a.operations != b.operations {
        Some("operation order")
    } else if a != b {
        Some("timeline")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SimulationConfig, Simulator};

    #[test]
    fn diverged_titles_are_reported() {
        let a = Snapshot {
            title: "one".to_string(),
            ..Snapshot::default()
        };
        let b = Snapshot {
            title: "two".to_string(),
            ..Snapshot::default()
        };
        let id = ticket_core::Id::derive(b"t");
        let view = |s: Snapshot| PeerView {
            heads: std::collections::BTreeMap::new(),
            tickets: [(id.clone(), s)].into_iter().collect(),
        };
        let result = ConvergenceOracle::check_convergence(&[view(a), view(b)]);
        assert!(!result.passed);
        assert!(matches!(
            result.violations[0],
            InvariantViolation::Divergence { field: "title", .. }
        ));
    }

    #[test]
    fn lost_operations_are_counted() {
        let emitted: BTreeSet<Id> = [Id::derive(b"op")].into_iter().collect();
        let result = ConvergenceOracle::check_no_lost_operations(&[PeerView::default()], &emitted);
        assert_eq!(
            result.violations,
            vec![InvariantViolation::LostOperations { peer: 0, missing: 1 }]
        );
    }

    #[test]
    fn a_faulty_run_still_passes() {
        let config = SimulationConfig {
            seed: 3,
            peer_count: 3,
            rounds: 12,
            ..SimulationConfig::default()
        };
        let result = Simulator::new(config).expect("sim").run().expect("run");
        let oracle = ConvergenceOracle::check_all(&result).expect("oracle");
        assert!(oracle.passed, "{:?}", oracle.violations);
    }
}
