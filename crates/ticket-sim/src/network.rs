use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::peer::PeerId;
use crate::rng::DeterministicRng;

/// Fault injection for the simulated network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultConfig {
    /// Maximum delivery delay in rounds.
    pub max_delay_rounds: u8,
    pub drop_rate_percent: u8,
    pub duplicate_rate_percent: u8,
    /// Chance per delivery tick of delivering ready requests newest first.
    pub reorder_rate_percent: u8,
    /// Chance per round of isolating or reconnecting one peer.
    pub partition_rate_percent: u8,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            max_delay_rounds: 2,
            drop_rate_percent: 5,
            duplicate_rate_percent: 3,
            reorder_rate_percent: 5,
            partition_rate_percent: 2,
        }
    }
}

impl FaultConfig {
    /// A network that delivers everything immediately and in order.
    #[must_use]
    pub const fn reliable() -> Self {
        Self {
            max_delay_rounds: 0,
            drop_rate_percent: 0,
            duplicate_rate_percent: 0,
            reorder_rate_percent: 0,
            partition_rate_percent: 0,
        }
    }
}

/// A request for `to` to pull every ticket ref from `from`.
///
/// Pulls read the sender's repository at delivery time, so a delayed
/// request carries whatever the sender has by then.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    pub from: PeerId,
    pub to: PeerId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Pending {
    deliver_at_round: u64,
    request: SyncRequest,
}

/// What happened to one send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Dropped,
    Queued { delay_rounds: u8, duplicated: bool },
}

/// Deterministic fault-injecting delivery of sync requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedNetwork {
    pending: Vec<Pending>,
    partitioned: BTreeSet<PeerId>,
    fault: FaultConfig,
}

impl SimulatedNetwork {
    #[must_use]
    pub const fn new(fault: FaultConfig) -> Self {
        Self {
            pending: Vec::new(),
            partitioned: BTreeSet::new(),
            fault,
        }
    }

    #[must_use]
    pub const fn fault_config(&self) -> FaultConfig {
        self.fault
    }

    pub fn set_partitioned(&mut self, peer: PeerId, isolated: bool) {
        if isolated {
            self.partitioned.insert(peer);
        } else {
            self.partitioned.remove(&peer);
        }
    }

    #[must_use]
    pub fn is_partitioned(&self, peer: PeerId) -> bool {
        self.partitioned.contains(&peer)
    }

    /// Reconnect every peer.
    pub fn heal(&mut self) {
        self.partitioned.clear();
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Queue `request`, subject to partitions, drops, delay and duplication.
    pub fn send(
        &mut self,
        request: SyncRequest,
        round: u64,
        rng: &mut DeterministicRng,
    ) -> SendOutcome {
        if self.is_partitioned(request.from) || self.is_partitioned(request.to) {
            return SendOutcome::Dropped;
        }
        if rng.hit_rate_percent(self.fault.drop_rate_percent) {
            return SendOutcome::Dropped;
        }

        let bound = u64::from(self.fault.max_delay_rounds) + 1;
        let delay_rounds =
            u8::try_from(rng.next_bounded(bound)).unwrap_or(self.fault.max_delay_rounds);
        let deliver_at_round = round.saturating_add(u64::from(delay_rounds));
        self.pending.push(Pending {
            deliver_at_round,
            request,
        });

        let duplicated = rng.hit_rate_percent(self.fault.duplicate_rate_percent);
        if duplicated {
            self.pending.push(Pending {
                deliver_at_round,
                request,
            });
        }
        SendOutcome::Queued {
            delay_rounds,
            duplicated,
        }
    }

    /// Requests whose delivery round has arrived. Requests touching a
    /// partitioned peer are lost.
    pub fn deliver_ready(&mut self, round: u64, rng: &mut DeterministicRng) -> Vec<SyncRequest> {
        let (ready, future): (Vec<Pending>, Vec<Pending>) = self
            .pending
            .drain(..)
            .partition(|p| p.deliver_at_round <= round);
        self.pending = future;

        let mut ready: Vec<SyncRequest> = ready
            .into_iter()
            .map(|p| p.request)
            .filter(|r| !self.partitioned.contains(&r.from) && !self.partitioned.contains(&r.to))
            .collect();
        if ready.len() > 1 && rng.hit_rate_percent(self.fault.reorder_rate_percent) {
            ready.reverse();
        }
        ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reliable_network_delivers_in_order() {
        let mut net = SimulatedNetwork::new(FaultConfig::reliable());
        let mut rng = DeterministicRng::new(0);
        let a = SyncRequest { from: 0, to: 1 };
        let b = SyncRequest { from: 1, to: 0 };
        assert_eq!(
            net.send(a, 0, &mut rng),
            SendOutcome::Queued {
                delay_rounds: 0,
                duplicated: false
            }
        );
        let _ = net.send(b, 0, &mut rng);
        assert_eq!(net.deliver_ready(0, &mut rng), vec![a, b]);
        assert_eq!(net.pending_len(), 0);
    }

    #[test]
    fn partitions_drop_requests() {
        let mut net = SimulatedNetwork::new(FaultConfig::reliable());
        let mut rng = DeterministicRng::new(0);
        net.set_partitioned(1, true);
        assert_eq!(
            net.send(SyncRequest { from: 0, to: 1 }, 0, &mut rng),
            SendOutcome::Dropped
        );
        net.heal();
        assert!(!net.is_partitioned(1));
    }

    #[test]
    fn delayed_requests_wait_for_their_round() {
        let fault = FaultConfig {
            max_delay_rounds: 5,
            ..FaultConfig::reliable()
        };
        let mut net = SimulatedNetwork::new(fault);
        let mut rng = DeterministicRng::new(11);
        for _ in 0..20 {
            let _ = net.send(SyncRequest { from: 0, to: 1 }, 0, &mut rng);
        }
        let mut delivered = 0;
        for round in 0..=5 {
            delivered += net.deliver_ready(round, &mut rng).len();
        }
        assert_eq!(delivered, 20);
    }
}
