//! ticket-sim library.
//!
//! Drives several replicas of a ticket repository through random concurrent
//! edits, syncs them over a lossy simulated network and checks that they
//! end up agreeing on every ticket.
//!
//! # Conventions
//!
//! - **Errors**: Use `anyhow::Result` for return types.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `debug!`, `trace!`).

pub mod campaign;
pub mod network;
pub mod oracle;
pub mod peer;
pub mod rng;

use std::collections::BTreeSet;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use ticket_core::Id;
use ticket_core::ticket::MergeStatus;
use tracing::{debug, info};

use crate::network::{FaultConfig, SendOutcome, SimulatedNetwork, SyncRequest};
use crate::peer::{EditKind, EditOutcome, Peer, PeerId, PeerView};
use crate::rng::DeterministicRng;

/// Wall time of round zero.
const BASE_UNIX_TIME: i64 = 1_700_000_000;
/// Seconds between rounds.
const ROUND_SECONDS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub seed: u64,
    pub peer_count: usize,
    pub rounds: u64,
    /// Chance per round that a peer edits something.
    pub edit_rate_percent: u8,
    /// Chance that an edit opens a new ticket instead.
    pub create_rate_percent: u8,
    /// Peers told to pull after each edit.
    pub fanout: usize,
    /// Upper bound on all-pairs sync passes after the last round.
    pub settle_passes: usize,
    pub fault: FaultConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            peer_count: 3,
            rounds: 20,
            edit_rate_percent: 60,
            create_rate_percent: 15,
            fanout: 1,
            settle_passes: 8,
            fault: FaultConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraceEventKind {
    Edit {
        peer: PeerId,
        kind: EditKind,
        ticket: String,
    },
    Rejected {
        peer: PeerId,
        kind: EditKind,
        reason: String,
    },
    Dropped {
        from: PeerId,
        to: PeerId,
    },
    Sync {
        from: PeerId,
        to: PeerId,
        merged: usize,
    },
    Partition {
        peer: PeerId,
        isolated: bool,
    },
    Settled {
        passes: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub round: u64,
    pub kind: TraceEventKind,
}

/// Final state of a run.
#[derive(Debug)]
pub struct SimulationResult {
    pub trace: Vec<TraceEvent>,
    /// Ids of every committed operation, across all peers.
    pub emitted: BTreeSet<Id>,
    pub peers: Vec<Peer>,
    pub views: Vec<PeerView>,
    /// Whether settling reached a pass in which nothing changed.
    pub settled: bool,
    /// Whether any pull produced a merge pack, i.e. replicas really diverged.
    pub interesting_state_reached: bool,
}

#[derive(Debug)]
pub struct Simulator {
    config: SimulationConfig,
    rng: DeterministicRng,
    network: SimulatedNetwork,
    peers: Vec<Peer>,
    trace: Vec<TraceEvent>,
    emitted: BTreeSet<Id>,
    merges: usize,
}

impl Simulator {
    /// # Errors
    ///
    /// Returns an error for a configuration with no peers or no rounds.
    pub fn new(config: SimulationConfig) -> Result<Self> {
        if config.peer_count == 0 {
            bail!("peer_count must be > 0");
        }
        if config.rounds == 0 {
            bail!("rounds must be > 0");
        }
        Ok(Self {
            config,
            rng: DeterministicRng::new(config.seed),
            network: SimulatedNetwork::new(config.fault),
            peers: (0..config.peer_count).map(Peer::new).collect(),
            trace: Vec::new(),
            emitted: BTreeSet::new(),
            merges: 0,
        })
    }

    fn record(&mut self, round: u64, kind: TraceEventKind) {
        self.trace.push(TraceEvent { round, kind });
    }

    /// Run every round, then heal the network and sync all pairs until
    /// nothing changes.
    ///
    /// # Errors
    ///
    /// Returns an error if a replica hits a storage or merge failure.
    pub fn run(mut self) -> Result<SimulationResult> {
        info!(seed = self.config.seed, peers = self.config.peer_count, "simulation start");
        for round in 0..self.config.rounds {
            self.maybe_toggle_partition(round);
            for peer in 0..self.peers.len() {
                if self.rng.hit_rate_percent(self.config.edit_rate_percent) {
                    self.edit(round, peer)?;
                }
            }
            for request in self.network.deliver_ready(round, &mut self.rng) {
                self.pull(round, request)?;
            }
        }

        self.network.heal();
        let settled = self.settle()?;
        let views = self
            .peers
            .iter()
            .map(Peer::view)
            .collect::<Result<Vec<_>>>()?;
        info!(
            seed = self.config.seed,
            ops = self.emitted.len(),
            merges = self.merges,
            settled,
            "simulation complete"
        );
        Ok(SimulationResult {
            trace: self.trace,
            emitted: self.emitted,
            peers: self.peers,
            views,
            settled,
            interesting_state_reached: self.merges > 0,
        })
    }

    fn maybe_toggle_partition(&mut self, round: u64) {
        if !self
            .rng
            .hit_rate_percent(self.config.fault.partition_rate_percent)
        {
            return;
        }
        let peer = self.rng.index(self.peers.len());
        let isolated = !self.network.is_partitioned(peer);
        self.network.set_partitioned(peer, isolated);
        self.record(round, TraceEventKind::Partition { peer, isolated });
    }

    fn edit(&mut self, round: u64, peer: PeerId) -> Result<()> {
        let round_time = i64::try_from(round).unwrap_or(i64::MAX / ROUND_SECONDS);
        // Spread peers within a round so their clocks differ.
        let skew = i64::try_from(peer).unwrap_or(0) * 7 % ROUND_SECONDS;
        let unix_time = BASE_UNIX_TIME + round_time * ROUND_SECONDS + skew;

        let peer_count = self.peers.len();
        let create = self.config.create_rate_percent;
        let outcome = self.peers[peer].random_edit(&mut self.rng, unix_time, peer_count, create)?;
        match outcome {
            EditOutcome::Applied { kind, ticket, ops } => {
                self.emitted.extend(ops);
                self.record(
                    round,
                    TraceEventKind::Edit {
                        peer,
                        kind,
                        ticket: ticket.human().to_string(),
                    },
                );
                self.announce(round, peer);
            }
            EditOutcome::Rejected { kind, reason } => {
                self.record(round, TraceEventKind::Rejected { peer, kind, reason });
            }
        }
        Ok(())
    }

    /// Ask `fanout` random other peers to pull from `from`.
    fn announce(&mut self, round: u64, from: PeerId) {
        let others: Vec<PeerId> = (0..self.peers.len()).filter(|p| *p != from).collect();
        for _ in 0..self.config.fanout {
            let Some(&to) = self.rng.pick(&others) else {
                return;
            };
            let request = SyncRequest { from, to };
            if self.network.send(request, round, &mut self.rng) == SendOutcome::Dropped {
                self.record(round, TraceEventKind::Dropped { from, to });
            }
        }
    }

    /// Returns how many tickets changed.
    fn pull(&mut self, round: u64, request: SyncRequest) -> Result<usize> {
        let SyncRequest { from, to } = request;
        if from == to {
            return Ok(0);
        }
        let results = self.peers[to].pull_from(&self.peers[from])?;
        let mut changed = 0;
        for r in &results {
            match r.outcome {
                Ok(MergeStatus::UpToDate) => {}
                Ok(MergeStatus::Merged) => {
                    self.merges += 1;
                    changed += 1;
                }
                Ok(MergeStatus::New | MergeStatus::FastForward) => changed += 1,
                // pull_from already failed on merge errors.
                Err(_) => {}
            }
        }
        debug!(from, to, changed, "pulled");
        self.record(round, TraceEventKind::Sync { from, to, merged: changed });
        Ok(changed)
    }

    fn settle(&mut self) -> Result<bool> {
        let round = self.config.rounds;
        for pass in 1..=self.config.settle_passes {
            let mut changed = 0;
            for to in 0..self.peers.len() {
                for from in 0..self.peers.len() {
                    changed += self.pull(round, SyncRequest { from, to })?;
                }
            }
            if changed == 0 {
                self.record(round, TraceEventKind::Settled { passes: pass });
                return Ok(true);
            }
        }
        Ok(false)
    }
}
