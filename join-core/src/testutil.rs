//! In-memory stand-ins for the join protocol's external collaborators.
//!
//! These let the join-coordinator's own test suite -- and the `dc-joind`
//! binary's demo wiring -- exercise full rounds without a real cluster
//! stack.

use crate::collab::{
    CibClient, CibClientError, CibSection, CibStatusUpdate, CibSyncError, CibUpdateOptions, ClusterMessaging, ExpectedState,
    FsaErrorClass, FsaErrorInput, HostingFsm, HostingFsmState, JoinAckNak, JoinOffer, Peer, PeerCache,
};
use crate::types::NodeName;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

/// A peer cache seeded up front and mutated only through [`PeerCache::set_expected`]
/// and [`InMemoryPeerCache::bump_membership`].
pub struct InMemoryPeerCache {
    peers: Mutex<HashMap<NodeName, Peer>>,
    expected: Mutex<HashMap<NodeName, ExpectedState>>,
    membership_id: Mutex<u64>,
}

impl InMemoryPeerCache {
    pub fn new(peers: impl IntoIterator<Item = Peer>) -> Self {
        let peers = peers.into_iter().map(|p| (p.name.clone(), p)).collect();
        Self { peers: Mutex::new(peers), expected: Mutex::new(HashMap::new()), membership_id: Mutex::new(0) }
    }

    pub fn expected_of(&self, name: &NodeName) -> Option<ExpectedState> {
        self.expected.lock().get(name).copied()
    }

    pub fn bump_membership(&self) {
        *self.membership_id.lock() += 1;
    }

    pub fn set_active(&self, name: &NodeName, is_active: bool) {
        if let Some(peer) = self.peers.lock().get_mut(name) {
            peer.is_active = is_active;
        }
    }

    pub fn insert(&self, peer: Peer) {
        self.peers.lock().insert(peer.name.clone(), peer);
    }
}

#[async_trait]
impl PeerCache for InMemoryPeerCache {
    async fn peers(&self) -> Vec<Peer> {
        self.peers.lock().values().cloned().collect()
    }

    async fn peer(&self, name: &NodeName) -> Option<Peer> {
        self.peers.lock().get(name).cloned()
    }

    async fn set_expected(&self, name: &NodeName, expected: ExpectedState) {
        self.expected.lock().insert(name.clone(), expected);
    }

    fn membership_id(&self) -> u64 {
        *self.membership_id.lock()
    }
}

/// Records every outbound message instead of putting anything on a wire.
#[derive(Default)]
pub struct ChannelClusterMessaging {
    offers: Mutex<Vec<JoinOffer>>,
    ack_naks: Mutex<Vec<JoinAckNak>>,
}

impl ChannelClusterMessaging {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offers(&self) -> Vec<JoinOffer> {
        self.offers.lock().clone()
    }

    pub fn ack_naks(&self) -> Vec<JoinAckNak> {
        self.ack_naks.lock().clone()
    }
}

#[async_trait]
impl ClusterMessaging for ChannelClusterMessaging {
    async fn send_join_offer(&self, offer: JoinOffer) {
        self.offers.lock().push(offer);
    }

    async fn send_join_ack_nak(&self, msg: JoinAckNak) {
        self.ack_naks.lock().push(msg);
    }
}

/// Scripted CIB client: `sync_from` answers are queued per-call, `query` and
/// `update` always succeed and record what they were asked to do.
#[derive(Default)]
pub struct InMemoryCibClient {
    sync_results: Mutex<HashMap<NodeName, Vec<Result<(), CibSyncError>>>>,
    updates: Mutex<Vec<(CibSection, CibStatusUpdate, CibUpdateOptions)>>,
}

impl InMemoryCibClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the next `sync_from(node, _)` result (FIFO per node).
    pub fn push_sync_result(&self, node: NodeName, result: Result<(), CibSyncError>) {
        self.sync_results.lock().entry(node).or_default().push(result);
    }

    pub fn updates(&self) -> Vec<(CibSection, CibStatusUpdate, CibUpdateOptions)> {
        self.updates.lock().clone()
    }
}

#[async_trait]
impl CibClient for InMemoryCibClient {
    async fn query(&self, _scope_local: bool) -> Result<Vec<u8>, CibClientError> {
        Ok(Vec::new())
    }

    async fn sync_from(&self, node: &NodeName, _quorum_override: bool) -> Result<(), CibSyncError> {
        let mut results = self.sync_results.lock();
        match results.get_mut(node).and_then(|queue| if queue.is_empty() { None } else { Some(queue.remove(0)) }) {
            Some(result) => result,
            None => Ok(()),
        }
    }

    async fn update(&self, section: CibSection, update: CibStatusUpdate, options: CibUpdateOptions) -> Result<(), CibClientError> {
        self.updates.lock().push((section, update, options));
        Ok(())
    }
}

/// Records every input raised against the hosting FSM and lets tests drive
/// `R_SHUTDOWN`/`R_IN_TRANSITION` and the coordinator's own role.
pub struct RecordingHostingFsm {
    state: Mutex<HostingFsmState>,
    shutdown: Mutex<bool>,
    in_transition: Mutex<bool>,
    have_cib: Mutex<bool>,
    cib_asked: Mutex<bool>,
    inputs: Mutex<Vec<&'static str>>,
    aborts: Mutex<Vec<String>>,
    fsa_errors: Mutex<Vec<(FsaErrorClass, FsaErrorInput)>>,
}

impl RecordingHostingFsm {
    pub fn new(state: HostingFsmState) -> Self {
        Self {
            state: Mutex::new(state),
            shutdown: Mutex::new(false),
            in_transition: Mutex::new(false),
            have_cib: Mutex::new(false),
            cib_asked: Mutex::new(false),
            inputs: Mutex::new(Vec::new()),
            aborts: Mutex::new(Vec::new()),
            fsa_errors: Mutex::new(Vec::new()),
        }
    }

    pub fn set_state(&self, state: HostingFsmState) {
        *self.state.lock() = state;
    }

    pub fn set_shutdown(&self, value: bool) {
        *self.shutdown.lock() = value;
    }

    pub fn set_in_transition(&self, value: bool) {
        *self.in_transition.lock() = value;
    }

    pub fn have_cib(&self) -> bool {
        *self.have_cib.lock()
    }

    pub fn cib_asked(&self) -> bool {
        *self.cib_asked.lock()
    }

    pub fn inputs(&self) -> Vec<&'static str> {
        self.inputs.lock().clone()
    }

    pub fn aborts(&self) -> Vec<String> {
        self.aborts.lock().clone()
    }

    pub fn fsa_errors(&self) -> Vec<(FsaErrorClass, FsaErrorInput)> {
        self.fsa_errors.lock().clone()
    }
}

impl HostingFsm for RecordingHostingFsm {
    fn current_state(&self) -> HostingFsmState {
        *self.state.lock()
    }

    fn shutdown(&self) -> bool {
        *self.shutdown.lock()
    }

    fn in_transition(&self) -> bool {
        *self.in_transition.lock()
    }

    fn set_have_cib(&self, value: bool) {
        *self.have_cib.lock() = value;
    }

    fn set_cib_asked(&self, value: bool) {
        *self.cib_asked.lock() = value;
    }

    fn abort_transition(&self, reason: &str) {
        self.aborts.lock().push(reason.to_string());
    }

    fn input_node_join(&self) {
        self.inputs.lock().push("I_NODE_JOIN");
    }

    fn input_integrated(&self) {
        self.inputs.lock().push("I_INTEGRATED");
        *self.state.lock() = HostingFsmState::FinalizeJoin;
    }

    fn input_finalized(&self) {
        self.inputs.lock().push("I_FINALIZED");
        *self.state.lock() = HostingFsmState::Idle;
    }

    fn input_election_dc(&self) {
        self.inputs.lock().push("I_ELECTION_DC");
    }

    fn input_fail(&self) {
        self.inputs.lock().push("I_FAIL");
    }

    fn register_fsa_error(&self, class: FsaErrorClass, input: FsaErrorInput) {
        self.fsa_errors.lock().push((class, input));
    }
}
