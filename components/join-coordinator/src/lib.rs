//! Join Coordinator -- the component that actually drives a join round,
//! consuming [`dc_join_registry::PeerJoinRegistry`] for phase bookkeeping,
//! [`dc_generation_comparator`] for best-CIB selection and
//! [`dc_sync_blocklist::SyncFailureBlocklist`] for repeat-offender nacking.
//!
//! `JoinCoordinator` owns its external collaborators as trait objects
//! (`Arc<dyn HostingFsm>`, `Arc<dyn CibClient>`, `Arc<dyn ClusterMessaging>`,
//! `Arc<dyn PeerCache>`) the same way `consensusmanager::ConsensusManager`
//! owns an `Arc<dyn ConsensusFactory>` and drives it through trait calls
//! rather than concrete types. Round state lives behind a single
//! `tokio::sync::Mutex` because every suspension point (a CIB call) needs to
//! hold it across the `.await` -- the exact situation `ConnectionManager`
//! uses `tokio::sync::Mutex` for over `connection_requests`.

use dc_generation_comparator::{offer as gc_offer, Decision};
use dc_join_core::collab::{
    CibClient, CibSection, CibStatusUpdate, CibSyncError, CibUpdateOptions, ClusterMessaging, ExpectedState, FsaErrorClass,
    FsaErrorInput, HostingFsm, HostingFsmState, JoinAckNak, JoinConfirm, JoinOffer, JoinRequest, MessageHeader, MessageTarget, Peer,
    PeerCache,
};
use dc_join_core::types::{FeatureSet, Generation, JoinPhase, NodeName};
use dc_join_core::{debug, error, info, trace, warn};
use dc_join_registry::PeerJoinRegistry;
use dc_sync_blocklist::SyncFailureBlocklist;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Peers below this feature-set version get [`JoinPhase::NackQuiet`] instead
/// of a visible nack, so they do not respawn in a retry loop against a DC
/// that will never admit them.
const MIN_VISIBLE_NACK_FEATURE_SET: FeatureSet = FeatureSet::new(3, 17, 0);

fn nack_kind(feature_set: Option<&FeatureSet>) -> JoinPhase {
    match feature_set {
        Some(fs) if *fs < MIN_VISIBLE_NACK_FEATURE_SET => JoinPhase::NackQuiet,
        _ => JoinPhase::Nack,
    }
}

/// The active round's identity and CIB-selection state.
#[derive(Debug, Clone)]
pub struct JoinRound {
    pub join_id: u32,
    pub membership_id: u64,
    pub best_cib_from: Option<NodeName>,
    pub best_cib_gen: Option<Generation>,
    pub have_cib: bool,
    pub cib_asked: bool,
}

struct RoundState {
    round: JoinRound,
    registry: PeerJoinRegistry,
    blocklist: SyncFailureBlocklist,
    /// Highest membership sequence we have already raised `I_NODE_JOIN` for,
    /// so repeated `check_state` calls do not re-notify the hosting FSM for
    /// a membership change it already knows about.
    last_notified_membership_id: u64,
    next_reference_id: u64,
}

impl RoundState {
    fn new() -> Self {
        Self {
            round: JoinRound { join_id: 0, membership_id: 0, best_cib_from: None, best_cib_gen: None, have_cib: false, cib_asked: false },
            registry: PeerJoinRegistry::new(),
            blocklist: SyncFailureBlocklist::new(),
            last_notified_membership_id: 0,
            next_reference_id: 0,
        }
    }
}

pub struct JoinCoordinator {
    local_name: NodeName,
    our_feature_set: FeatureSet,
    fsm: Arc<dyn HostingFsm>,
    cib: Arc<dyn CibClient>,
    messaging: Arc<dyn ClusterMessaging>,
    peer_cache: Arc<dyn PeerCache>,
    state: Mutex<RoundState>,
}

impl JoinCoordinator {
    pub fn new(
        local_name: NodeName,
        our_feature_set: FeatureSet,
        fsm: Arc<dyn HostingFsm>,
        cib: Arc<dyn CibClient>,
        messaging: Arc<dyn ClusterMessaging>,
        peer_cache: Arc<dyn PeerCache>,
    ) -> Self {
        Self { local_name, our_feature_set, fsm, cib, messaging, peer_cache, state: Mutex::new(RoundState::new()) }
    }

    pub async fn current_join_id(&self) -> u32 {
        self.state.lock().await.round.join_id
    }

    pub async fn current_round(&self) -> JoinRound {
        self.state.lock().await.round.clone()
    }

    pub async fn phase_of(&self, name: &NodeName) -> JoinPhase {
        self.state.lock().await.registry.phase_of(name)
    }

    pub async fn is_blocklisted(&self, name: &NodeName) -> bool {
        self.state.lock().await.blocklist.is_blocked(name)
    }

    fn next_reference_id(&self, state: &mut RoundState) -> u64 {
        state.next_reference_id += 1;
        state.next_reference_id
    }

    /// Logs and surfaces an internal invariant violation (spec §7: "Host-FSM
    /// errors") to the hosting FSM via `register_fsa_error`, without
    /// mutating any round state beyond what the caller already decided not
    /// to do.
    fn report_illegal_transition(&self, err: dc_join_registry::IllegalTransition) {
        warn!("[join-coordinator] {}", err);
        self.fsm.register_fsa_error(FsaErrorClass::FsaInternal, FsaErrorInput::Error);
    }

    // -----------------------------------------------------------------
    // StartRound
    // -----------------------------------------------------------------

    pub async fn start_round(&self) -> u32 {
        let peers = self.peer_cache.peers().await;
        let membership_id = self.peer_cache.membership_id();
        let dc_leaving = self.fsm.shutdown();

        let mut state = self.state.lock().await;
        state.round.join_id += 1;
        let join_id = state.round.join_id;
        state.round.membership_id = membership_id;
        state.round.best_cib_from = None;
        state.round.best_cib_gen = None;
        state.round.have_cib = false;
        state.round.cib_asked = false;
        state.last_notified_membership_id = membership_id;

        state.registry.reset_all(&peers);
        info!("[join-coordinator] round {} started, membership_id={}", join_id, membership_id);

        for peer in peers.iter().filter(|p| !p.is_remote) {
            if peer.is_active {
                self.send_offer(&mut state, peer, join_id, dc_leaving).await;
            } else {
                // The narrow PeerCache contract is write-only for `expected`,
                // so there is no way to check "has no recorded expected" from
                // here; every inactive peer is marked Down at round start.
                self.peer_cache.set_expected(&peer.name, ExpectedState::Down).await;
            }
        }

        join_id
    }

    async fn send_offer(&self, state: &mut RoundState, peer: &Peer, join_id: u32, dc_leaving: bool) {
        let reference_id = self.next_reference_id(state);
        let header = MessageHeader { join_id, host_from: self.local_name.clone(), host_to: MessageTarget::Node(peer.name.clone()), reference_id };
        self.messaging.send_join_offer(JoinOffer { header, feature_set: self.our_feature_set, dc_leaving }).await;

        // An offer always (re-)admits its target to `Welcomed`, whatever
        // phase it was previously in: `start_round`'s peers are already
        // `None` via `reset_all`, but `offer_one`'s re-offer (spec §4.4.2)
        // can target a peer already past `Welcomed` in the active round.
        // Reset to `None` first -- always a legal transition -- so the
        // follow-up `Welcomed` is a legal successor rather than an illegal
        // regression.
        if let Err(err) = state.registry.set_phase(peer, JoinPhase::None, "offer-reset") {
            self.report_illegal_transition(err);
            return;
        }
        if let Err(err) = state.registry.set_phase(peer, JoinPhase::Welcomed, "offer") {
            self.report_illegal_transition(err);
        }
    }

    // -----------------------------------------------------------------
    // OfferOne
    // -----------------------------------------------------------------

    /// A new, previously unknown node appeared. Offers it membership and, if
    /// it is not this DC itself, also re-offers the DC's own entry so the
    /// local CIB stays in contention for best-generation selection.
    pub async fn offer_one(&self, node: &NodeName) {
        self.fsm.abort_transition("Node join");

        let mut state = self.state.lock().await;
        let join_id = state.round.join_id;
        let dc_leaving = self.fsm.shutdown();

        if let Some(peer) = self.peer_cache.peer(node).await {
            self.send_offer(&mut state, &peer, join_id, dc_leaving).await;
        } else {
            warn!("[join-coordinator] offer_one called for unknown node {}", node);
        }

        if node != &self.local_name {
            if let Some(local_peer) = self.peer_cache.peer(&self.local_name).await {
                self.send_offer(&mut state, &local_peer, join_id, dc_leaving).await;
            }
        }

        self.check_state(&mut state).await;
    }

    // -----------------------------------------------------------------
    // process JoinRequest
    // -----------------------------------------------------------------

    pub async fn process_join_request(&self, request: JoinRequest) {
        let mut state = self.state.lock().await;

        let join_from = match request.join_from.clone() {
            Some(name) => name,
            None => {
                error!("[join-coordinator] JoinRequest (reference_id={}) is missing join_from, discarding", request.reference_id);
                return;
            }
        };

        if request.join_id != state.round.join_id {
            trace!(
                "[join-coordinator] discarding JoinRequest from {} for stale round {} (current round is {})",
                join_from, request.join_id, state.round.join_id
            );
            self.check_state(&mut state).await;
            return;
        }

        let peer = match self.peer_cache.peer(&join_from).await {
            Some(peer) => peer,
            None => {
                error!("[join-coordinator] JoinRequest from unknown peer {}, discarding", join_from);
                self.check_state(&mut state).await;
                return;
            }
        };

        if let Some(blocked_round) = state.blocklist.lookup(&join_from) {
            warn!("[join-coordinator] {} is sync-blocklisted since round {}, nacking", join_from, blocked_round);
            self.reject_peer(&mut state, &peer, nack_kind(request.feature_set.as_ref())).await;
            self.check_state(&mut state).await;
            return;
        }

        if !peer.is_active {
            if peer.had_down_event {
                debug!("[join-coordinator] {} requested to join while inactive (known down event)", join_from);
            } else {
                error!("[join-coordinator] {} requested to join while inactive with no recorded down event", join_from);
            }
            self.reject_peer(&mut state, &peer, nack_kind(request.feature_set.as_ref())).await;
            self.check_state(&mut state).await;
            return;
        }

        let generation = match &request.generation {
            Some(generation) => generation.clone(),
            None => {
                warn!("[join-coordinator] {} submitted a JoinRequest with no generation, nacking", join_from);
                self.reject_peer(&mut state, &peer, JoinPhase::Nack).await;
                self.check_state(&mut state).await;
                return;
            }
        };

        let compatible = matches!(&request.feature_set, Some(theirs) if self.our_feature_set.compatible_with(theirs));
        if !compatible {
            warn!("[join-coordinator] {} advertised an incompatible or missing feature set, nacking", join_from);
            self.reject_peer(&mut state, &peer, JoinPhase::Nack).await;
            self.check_state(&mut state).await;
            return;
        }

        let had_best_before = state.round.best_cib_from.is_some();
        let current_best = state.round.best_cib_from.clone().zip(state.round.best_cib_gen.clone());
        let decision = gc_offer(
            &generation,
            &join_from,
            &self.local_name,
            current_best.as_ref().map(|(from, gen)| (gen, from)),
        );

        match decision {
            Decision::Reject => {
                warn!("[join-coordinator] {} submitted a generation with an unknown validation schema, nacking", join_from);
                self.reject_peer(&mut state, &peer, JoinPhase::Nack).await;
            }
            Decision::Replace => {
                state.round.best_cib_from = Some(join_from.clone());
                state.round.best_cib_gen = Some(generation);
                self.accept_peer(&mut state, &peer).await;
            }
            Decision::Accept => {
                // `Accept` covers two outcomes the comparator does not
                // distinguish: installing the very first best generation,
                // and retaining an existing one against a losing candidate.
                // The caller already knows which case it is from whether a
                // best existed before this call.
                if !had_best_before {
                    state.round.best_cib_from = Some(join_from.clone());
                    state.round.best_cib_gen = Some(generation);
                }
                self.accept_peer(&mut state, &peer).await;
            }
        }

        self.check_state(&mut state).await;
    }

    async fn reject_peer(&self, state: &mut RoundState, peer: &Peer, nack: JoinPhase) {
        if let Err(err) = state.registry.set_phase(peer, nack, "process_join_request") {
            self.report_illegal_transition(err);
            return;
        }
        self.peer_cache.set_expected(&peer.name, ExpectedState::Nack).await;
    }

    async fn accept_peer(&self, state: &mut RoundState, peer: &Peer) {
        if let Err(err) = state.registry.set_phase(peer, JoinPhase::Integrated, "process_join_request") {
            self.report_illegal_transition(err);
            return;
        }
        self.peer_cache.set_expected(&peer.name, ExpectedState::Member).await;
    }

    // -----------------------------------------------------------------
    // Finalize and sync callback
    // -----------------------------------------------------------------

    async fn finalize(&self, state: &mut RoundState) {
        if state.registry.census(JoinPhase::Welcomed) != 0 {
            return;
        }
        if state.registry.census_any(&[JoinPhase::Integrated, JoinPhase::Nack, JoinPhase::NackQuiet]) == 0 {
            return;
        }
        if self.fsm.in_transition() {
            return;
        }

        let use_local_cib = match &state.round.best_cib_from {
            None => true,
            Some(from) => *from == self.local_name,
        };

        if use_local_cib {
            // No peer (or only our own submission) ever held the best
            // generation, so the DC's in-memory CIB is already authoritative
            // `have_cib` is set from the local CIB implicitly, with no
            // extra `CibClient::query` call.
            state.round.have_cib = true;
            self.fsm.set_have_cib(true);
            self.send_ack_naks(state).await;
            return;
        }

        let best_cib_from = state.round.best_cib_from.clone().unwrap();
        state.round.cib_asked = true;
        self.fsm.set_cib_asked(true);
        info!("[join-coordinator] round {} syncing CIB from {}", state.round.join_id, best_cib_from);

        let join_id = state.round.join_id;
        let result = self.cib.sync_from(&best_cib_from, false).await;
        self.handle_sync_result(state, join_id, best_cib_from, result).await;
    }

    /// Externally invocable form of the sync callback. Normal operation
    /// reaches the same logic through [`Self::finalize`] awaiting
    /// `cib.sync_from` directly and continuing in place. This entry point
    /// exists for callers that already have a completed result in hand
    /// (e.g. tests driving the callback directly).
    pub async fn on_sync_result(&self, join_id: u32, from: NodeName, result: Result<(), CibSyncError>) {
        let mut state = self.state.lock().await;
        self.handle_sync_result(&mut state, join_id, from, result).await;
    }

    async fn handle_sync_result(&self, state: &mut RoundState, join_id: u32, from: NodeName, result: Result<(), CibSyncError>) {
        if join_id != state.round.join_id {
            debug!("[join-coordinator] dropping sync result for stale round {} (current round is {})", join_id, state.round.join_id);
            return;
        }

        state.round.cib_asked = false;
        self.fsm.set_cib_asked(false);

        match result {
            Ok(()) => {
                if self.fsm.current_state() != HostingFsmState::FinalizeJoin {
                    debug!("[join-coordinator] sync from {} completed after we left FinalizeJoin, dropping", from);
                    return;
                }
                state.round.have_cib = true;
                self.fsm.set_have_cib(true);
                self.send_ack_naks(state).await;
            }
            Err(CibSyncError::OldData) => {
                warn!("[join-coordinator] sync from {} returned stale data, restarting round via election", from);
                self.fsm.input_election_dc();
            }
            Err(err) => {
                warn!("[join-coordinator] sync from {} failed ({}), blocklisting and restarting round via election", from, err);
                state.blocklist.record(from, join_id);
                self.fsm.input_election_dc();
            }
        }

        self.check_state(state).await;
    }

    /// Acks every `Integrated` peer (advancing it to `Finalized`) and nacks
    /// every `Nack` peer; `NackQuiet` peers get no message at all. Only
    /// reachable once `have_cib` is true, which structurally guarantees no
    /// `JoinAckNak` is ever sent while the round has no CIB yet.
    async fn send_ack_naks(&self, state: &mut RoundState) {
        let peers = self.peer_cache.peers().await;
        let join_id = state.round.join_id;

        for peer in peers.iter().filter(|p| !p.is_remote) {
            match state.registry.phase_of(&peer.name) {
                JoinPhase::Integrated => {
                    let reference_id = self.next_reference_id(state);
                    let header =
                        MessageHeader { join_id, host_from: self.local_name.clone(), host_to: MessageTarget::Node(peer.name.clone()), reference_id };
                    self.messaging.send_join_ack_nak(JoinAckNak { header, ack: true }).await;
                    if let Err(err) = state.registry.set_phase(peer, JoinPhase::Finalized, "sync_callback") {
                        self.report_illegal_transition(err);
                        continue;
                    }
                    self.peer_cache.set_expected(&peer.name, ExpectedState::Member).await;
                }
                JoinPhase::Nack => {
                    let reference_id = self.next_reference_id(state);
                    let header =
                        MessageHeader { join_id, host_from: self.local_name.clone(), host_to: MessageTarget::Node(peer.name.clone()), reference_id };
                    self.messaging.send_join_ack_nak(JoinAckNak { header, ack: false }).await;
                }
                _ => {}
            }
        }
    }

    // -----------------------------------------------------------------
    // ProcessAck / JoinConfirm handling
    // -----------------------------------------------------------------

    pub async fn process_join_confirm(&self, confirm: JoinConfirm) {
        let mut state = self.state.lock().await;

        let join_from = match confirm.join_from.clone() {
            Some(name) => name,
            None => {
                error!("[join-coordinator] JoinConfirm (reference_id={}) is missing join_from, discarding", confirm.reference_id);
                return;
            }
        };

        if confirm.join_id != state.round.join_id {
            trace!(
                "[join-coordinator] discarding JoinConfirm from {} for stale round {} (current round is {})",
                join_from, confirm.join_id, state.round.join_id
            );
            self.check_state(&mut state).await;
            return;
        }

        if state.registry.phase_of(&join_from) != JoinPhase::Finalized {
            warn!("[join-coordinator] {} sent JoinConfirm while not in Finalized phase, discarding", join_from);
            self.check_state(&mut state).await;
            return;
        }

        let peer = match self.peer_cache.peer(&join_from).await {
            Some(peer) => peer,
            None => {
                error!("[join-coordinator] JoinConfirm from unknown peer {}, discarding", join_from);
                self.check_state(&mut state).await;
                return;
            }
        };

        let exclude_locked = self.fsm.shutdown();
        if let Err(err) = self
            .cib
            .update(CibSection::Status, CibStatusUpdate::DeleteLrmHistory { node: join_from.clone(), exclude_locked }, CibUpdateOptions::default())
            .await
        {
            error!("[join-coordinator] failed to delete LRM history for {}: {}", join_from, err);
        }

        let status_update = if join_from == self.local_name {
            match self.cib.query(true).await {
                Ok(payload) => CibStatusUpdate::ApplyExecutorState { node: join_from.clone(), payload },
                Err(err) => {
                    error!("[join-coordinator] failed to query local executor state for {}: {}", join_from, err);
                    self.check_state(&mut state).await;
                    return;
                }
            }
        } else {
            CibStatusUpdate::ApplyExecutorState { node: join_from.clone(), payload: confirm.executor_state.clone() }
        };

        if let Err(err) = self.cib.update(CibSection::Status, status_update, CibUpdateOptions::default()).await {
            error!("[join-coordinator] failed to apply executor state for {}: {}", join_from, err);
            self.check_state(&mut state).await;
            return;
        }

        if let Err(err) = state.registry.set_phase(&peer, JoinPhase::Confirmed, "process_join_confirm") {
            self.report_illegal_transition(err);
        }

        self.check_state(&mut state).await;
    }

    // -----------------------------------------------------------------
    // check_state
    // -----------------------------------------------------------------

    async fn check_state(&self, state: &mut RoundState) {
        let current_membership_id = self.peer_cache.membership_id();
        if current_membership_id != state.last_notified_membership_id {
            state.last_notified_membership_id = current_membership_id;
            self.fsm.input_node_join();
        }

        match self.fsm.current_state() {
            HostingFsmState::Integration => {
                if state.registry.census(JoinPhase::Welcomed) == 0 {
                    self.fsm.input_integrated();
                    self.finalize(state).await;
                }
            }
            HostingFsmState::FinalizeJoin => {
                if state.round.have_cib {
                    let remaining = state.registry.census_any(&[JoinPhase::Welcomed, JoinPhase::Integrated, JoinPhase::Finalized]);
                    if remaining == 0 {
                        self.fsm.input_finalized();
                        self.join_final(state).await;
                    }
                }
            }
            _ => {}
        }
    }

    // -----------------------------------------------------------------
    // Final hook
    // -----------------------------------------------------------------

    /// Re-publishes quorum and DC identity for the scheduler to consume.
    /// The scheduler itself sits outside this workspace, so this is the
    /// boundary log line a real scheduler trigger would replace.
    async fn join_final(&self, state: &RoundState) {
        info!(
            "[join-coordinator] round {} finalized, DC={}, confirmed={}",
            state.round.join_id,
            self.local_name,
            state.registry.census(JoinPhase::Confirmed)
        );
    }
}
