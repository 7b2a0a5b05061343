//! Peer Join Registry.
//!
//! Owns the `Peer -> JoinPhase` mapping for the active join round and
//! enforces phase monotonicity centrally, the same way
//! `address_manager`'s `AddressManager` is the single place connection
//! failure counts get bumped instead of every call site touching the store
//! directly.

use dc_join_core::collab::Peer;
use dc_join_core::types::{JoinPhase, NodeName};
use dc_join_core::{trace, warn};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal join-phase transition: {old} -> {new}")]
pub struct IllegalTransition {
    pub old: JoinPhase,
    pub new: JoinPhase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetPhaseOutcome {
    Unchanged,
    Committed,
}

#[derive(Default)]
pub struct PeerJoinRegistry {
    phases: HashMap<NodeName, JoinPhase>,
}

impl PeerJoinRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets every non-remote peer in `peers` to [`JoinPhase::None`],
    /// dropping phase state for any peer not present in the given set.
    pub fn reset_all(&mut self, peers: &[Peer]) {
        self.phases.clear();
        for peer in peers.iter().filter(|p| !p.is_remote) {
            self.phases.insert(peer.name.clone(), JoinPhase::None);
        }
    }

    /// Attempts to advance `peer`'s phase to `new`. `source` is a free-form
    /// log tag identifying the call site (offer, request, sync callback,
    /// confirm, ...).
    ///
    /// Remote peers are always a no-op. The attempted transition is always
    /// traced before the legality check runs: the log line records what was
    /// asked for regardless of outcome, while only the actual phase map
    /// entry is conditioned on legality.
    pub fn set_phase(&mut self, peer: &Peer, new: JoinPhase, source: &str) -> Result<SetPhaseOutcome, IllegalTransition> {
        if peer.is_remote {
            return Ok(SetPhaseOutcome::Unchanged);
        }

        let old = self.phases.get(&peer.name).copied().unwrap_or(JoinPhase::None);
        trace!("[join-registry] {} attempting {} -> {} (source: {})", peer.name, old, new, source);

        if new == old {
            return Ok(SetPhaseOutcome::Unchanged);
        }

        let legal = new == JoinPhase::None || matches!(new, JoinPhase::Nack | JoinPhase::NackQuiet) || new.is_immediate_successor_of(old);

        if !legal {
            warn!("[join-registry] rejecting illegal transition for {}: {} -> {}", peer.name, old, new);
            return Err(IllegalTransition { old, new });
        }

        self.phases.insert(peer.name.clone(), new);
        Ok(SetPhaseOutcome::Committed)
    }

    pub fn phase_of(&self, name: &NodeName) -> JoinPhase {
        self.phases.get(name).copied().unwrap_or(JoinPhase::None)
    }

    /// Counts peers currently in `phase` (remote peers are never tracked,
    /// so they are excluded automatically).
    pub fn census(&self, phase: JoinPhase) -> usize {
        self.phases.values().filter(|&&p| p == phase).count()
    }

    /// Counts peers currently in any of `phases`.
    pub fn census_any(&self, phases: &[JoinPhase]) -> usize {
        self.phases.values().filter(|p| phases.contains(p)).count()
    }

    pub fn log_phases(&self, level: log::Level) {
        let mut names: Vec<&NodeName> = self.phases.keys().collect();
        names.sort();
        for name in names {
            log::log!(level, "[join-registry] {} = {}", name, self.phases[name]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dc_join_core::types::NodeUuid;

    fn peer(name: &str, is_remote: bool) -> Peer {
        Peer { name: NodeName::new(name), uuid: NodeUuid::new(name), is_remote, is_active: true, had_down_event: false }
    }

    #[test]
    fn legal_chain_advances_one_step_at_a_time() {
        let mut reg = PeerJoinRegistry::new();
        let b = peer("B", false);
        reg.reset_all(&[b.clone()]);

        assert_eq!(reg.set_phase(&b, JoinPhase::Welcomed, "offer").unwrap(), SetPhaseOutcome::Committed);
        assert_eq!(reg.phase_of(&b.name), JoinPhase::Welcomed);
        assert_eq!(reg.set_phase(&b, JoinPhase::Integrated, "request").unwrap(), SetPhaseOutcome::Committed);
        assert_eq!(reg.set_phase(&b, JoinPhase::Finalized, "sync").unwrap(), SetPhaseOutcome::Committed);
        assert_eq!(reg.set_phase(&b, JoinPhase::Confirmed, "ack").unwrap(), SetPhaseOutcome::Committed);
        assert_eq!(reg.phase_of(&b.name), JoinPhase::Confirmed);
    }

    #[test]
    fn skipping_a_step_is_rejected_and_state_is_unchanged() {
        // set_phase(B, Welcomed) while B is already Finalized must not regress it.
        let mut reg = PeerJoinRegistry::new();
        let b = peer("B", false);
        reg.reset_all(&[b.clone()]);
        reg.set_phase(&b, JoinPhase::Welcomed, "offer").unwrap();
        reg.set_phase(&b, JoinPhase::Integrated, "request").unwrap();
        reg.set_phase(&b, JoinPhase::Finalized, "sync").unwrap();

        let err = reg.set_phase(&b, JoinPhase::Welcomed, "regression").unwrap_err();
        assert_eq!(err, IllegalTransition { old: JoinPhase::Finalized, new: JoinPhase::Welcomed });
        assert_eq!(reg.phase_of(&b.name), JoinPhase::Finalized);
    }

    #[test]
    fn jumping_two_steps_at_once_is_also_rejected() {
        let mut reg = PeerJoinRegistry::new();
        let c = peer("C", false);
        reg.reset_all(&[c.clone()]);
        reg.set_phase(&c, JoinPhase::Welcomed, "offer").unwrap();

        dc_join_core::assert_match!(reg.set_phase(&c, JoinPhase::Finalized, "skip"), Err(IllegalTransition { old: JoinPhase::Welcomed, .. }));
        assert_eq!(reg.phase_of(&c.name), JoinPhase::Welcomed);
    }

    #[test]
    fn reset_to_none_and_nack_are_always_legal() {
        let mut reg = PeerJoinRegistry::new();
        let b = peer("B", false);
        reg.reset_all(&[b.clone()]);
        reg.set_phase(&b, JoinPhase::Welcomed, "offer").unwrap();
        reg.set_phase(&b, JoinPhase::Integrated, "request").unwrap();
        assert_eq!(reg.set_phase(&b, JoinPhase::Nack, "reject").unwrap(), SetPhaseOutcome::Committed);
        assert_eq!(reg.phase_of(&b.name), JoinPhase::Nack);
        assert_eq!(reg.set_phase(&b, JoinPhase::None, "reset").unwrap(), SetPhaseOutcome::Committed);
        assert_eq!(reg.phase_of(&b.name), JoinPhase::None);
    }

    #[test]
    fn remote_peers_are_never_tracked() {
        let mut reg = PeerJoinRegistry::new();
        let c = peer("C", true);
        reg.reset_all(&[c.clone()]);
        assert_eq!(reg.census(JoinPhase::None), 0);
        assert_eq!(reg.set_phase(&c, JoinPhase::Welcomed, "offer").unwrap(), SetPhaseOutcome::Unchanged);
        assert_eq!(reg.census(JoinPhase::Welcomed), 0);
    }

    #[test]
    fn census_excludes_other_phases() {
        let mut reg = PeerJoinRegistry::new();
        let (b, c) = (peer("B", false), peer("C", false));
        reg.reset_all(&[b.clone(), c.clone()]);
        reg.set_phase(&b, JoinPhase::Welcomed, "offer").unwrap();
        assert_eq!(reg.census(JoinPhase::Welcomed), 1);
        assert_eq!(reg.census(JoinPhase::None), 1);
        assert_eq!(reg.census_any(&[JoinPhase::Welcomed, JoinPhase::None]), 2);
    }
}
