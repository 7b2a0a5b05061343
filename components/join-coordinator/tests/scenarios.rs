//! End-to-end join-round scenarios (literal cases).
//!
//! Each test drives a `JoinCoordinator` against the in-memory collaborators
//! from `dc_join_core::testutil`, simulating the DC's own peer-cache entry
//! and every other peer's `JoinRequest`/`JoinConfirm` replies by hand --
//! there is no real cluster-messaging transport here, so "peer behavior" is
//! just the next handler call a real peer's daemon would have triggered.

use dc_join_core::collab::{CibSyncError, HostingFsmState, JoinConfirm, JoinRequest, MessageTarget, Peer};
use dc_join_core::testutil::{ChannelClusterMessaging, InMemoryCibClient, InMemoryPeerCache, RecordingHostingFsm};
use dc_join_core::types::{FeatureSet, Generation, JoinPhase, NodeName, NodeUuid};
use dc_join_coordinator::JoinCoordinator;
use std::sync::Arc;

fn peer(name: &str) -> Peer {
    Peer { name: NodeName::new(name), uuid: NodeUuid::new(name), is_remote: false, is_active: true, had_down_event: false }
}

struct Harness {
    jc: Arc<JoinCoordinator>,
    fsm: Arc<RecordingHostingFsm>,
    cib: Arc<InMemoryCibClient>,
    messaging: Arc<ChannelClusterMessaging>,
    #[allow(dead_code)]
    peer_cache: Arc<InMemoryPeerCache>,
    local: NodeName,
}

impl Harness {
    fn new(local: &str, peers: Vec<Peer>) -> Self {
        let fsm = Arc::new(RecordingHostingFsm::new(HostingFsmState::Elected));
        let cib = Arc::new(InMemoryCibClient::new());
        let messaging = Arc::new(ChannelClusterMessaging::new());
        let peer_cache = Arc::new(InMemoryPeerCache::new(peers));
        let jc = Arc::new(JoinCoordinator::new(
            NodeName::new(local),
            FeatureSet::new(3, 19, 0),
            fsm.clone(),
            cib.clone(),
            messaging.clone(),
            peer_cache.clone(),
        ));
        Self { jc, fsm, cib, messaging, peer_cache, local: NodeName::new(local) }
    }

    async fn request(&self, join_id: u32, from: &str, gen: Generation, feature_set: FeatureSet) {
        self.jc
            .process_join_request(JoinRequest {
                join_id,
                join_from: Some(NodeName::new(from)),
                feature_set: Some(feature_set),
                generation: Some(gen),
                reference_id: 0,
            })
            .await;
    }

    async fn confirm(&self, join_id: u32, from: &str) {
        self.jc
            .process_join_confirm(JoinConfirm { join_id, join_from: Some(NodeName::new(from)), executor_state: vec![1, 2, 3], reference_id: 0 })
            .await;
    }
}

const OURS: FeatureSet = FeatureSet::new(3, 19, 0);

#[tokio::test]
async fn happy_path_three_peers_equal_generations() {
    let h = Harness::new("A", vec![peer("A"), peer("B"), peer("C")]);
    let join_id = h.jc.start_round().await;
    h.fsm.set_state(HostingFsmState::Integration);

    // B and C answer first, then the DC submits its own generation last so
    // the tie-break lands on A.
    h.request(join_id, "B", Generation::new(0, 5, 0, "pacemaker-3.0"), OURS).await;
    h.request(join_id, "C", Generation::new(0, 5, 0, "pacemaker-3.0"), OURS).await;
    h.request(join_id, "A", Generation::new(0, 5, 0, "pacemaker-3.0"), OURS).await;

    let round = h.jc.current_round().await;
    assert_eq!(round.best_cib_from, Some(h.local.clone()));
    assert!(round.have_cib);
    assert!(h.fsm.inputs().contains(&"I_INTEGRATED"));

    assert_eq!(h.jc.phase_of(&NodeName::new("B")).await, JoinPhase::Finalized);
    assert_eq!(h.jc.phase_of(&NodeName::new("C")).await, JoinPhase::Finalized);
    assert_eq!(h.jc.phase_of(&NodeName::new("A")).await, JoinPhase::Finalized);

    h.confirm(join_id, "B").await;
    h.confirm(join_id, "C").await;
    h.confirm(join_id, "A").await;

    assert_eq!(h.jc.phase_of(&NodeName::new("A")).await, JoinPhase::Confirmed);
    assert_eq!(h.jc.phase_of(&NodeName::new("B")).await, JoinPhase::Confirmed);
    assert_eq!(h.jc.phase_of(&NodeName::new("C")).await, JoinPhase::Confirmed);
    assert!(h.fsm.inputs().contains(&"I_FINALIZED"));
}

#[tokio::test]
async fn b_has_a_newer_cib_and_is_synced_from() {
    let h = Harness::new("A", vec![peer("A"), peer("B"), peer("C")]);
    let join_id = h.jc.start_round().await;
    h.fsm.set_state(HostingFsmState::Integration);

    h.request(join_id, "A", Generation::new(0, 5, 0, "pacemaker-3.0"), OURS).await;
    h.request(join_id, "B", Generation::new(0, 5, 3, "pacemaker-3.0"), OURS).await;
    h.request(join_id, "C", Generation::new(0, 5, 0, "pacemaker-3.0"), OURS).await;

    let round = h.jc.current_round().await;
    assert_eq!(round.best_cib_from, Some(NodeName::new("B")));
    assert!(round.have_cib);

    let ack_naks = h.messaging.ack_naks();
    assert!(ack_naks.iter().any(|m| m.header.host_to == MessageTarget::Node(NodeName::new("B")) && m.ack));
    assert!(ack_naks.iter().any(|m| m.header.host_to == MessageTarget::Node(NodeName::new("C")) && m.ack));
}

#[tokio::test]
async fn sync_failure_blocklists_and_restart_nacks_the_source() {
    let h = Harness::new("A", vec![peer("A"), peer("B"), peer("C")]);
    h.cib.push_sync_result(NodeName::new("B"), Err(CibSyncError::Transport));

    let round1 = h.jc.start_round().await;
    h.fsm.set_state(HostingFsmState::Integration);

    h.request(round1, "A", Generation::new(0, 5, 0, "pacemaker-3.0"), OURS).await;
    h.request(round1, "B", Generation::new(0, 5, 3, "pacemaker-3.0"), OURS).await;
    h.request(round1, "C", Generation::new(0, 5, 0, "pacemaker-3.0"), OURS).await;

    assert!(h.jc.is_blocklisted(&NodeName::new("B")).await);
    assert!(h.fsm.inputs().contains(&"I_ELECTION_DC"));
    assert!(!h.jc.current_round().await.have_cib);

    // Round restarts (e.g. the hosting controller re-elects this node DC).
    h.fsm.set_state(HostingFsmState::Elected);
    let round2 = h.jc.start_round().await;
    assert!(round2 > round1);
    h.fsm.set_state(HostingFsmState::Integration);

    h.request(round2, "B", Generation::new(0, 5, 3, "pacemaker-3.0"), OURS).await;
    assert_eq!(h.jc.phase_of(&NodeName::new("B")).await, JoinPhase::Nack);
}

#[tokio::test]
async fn incompatible_feature_set_is_nacked_others_integrate() {
    let h = Harness::new("A", vec![peer("A"), peer("B"), peer("C")]);
    let join_id = h.jc.start_round().await;
    h.fsm.set_state(HostingFsmState::Integration);

    h.request(join_id, "A", Generation::new(0, 5, 0, "pacemaker-3.0"), OURS).await;
    h.request(join_id, "B", Generation::new(0, 5, 0, "pacemaker-3.0"), OURS).await;
    h.request(join_id, "C", Generation::new(0, 5, 0, "pacemaker-3.0"), FeatureSet::new(2, 9, 0)).await;

    assert_eq!(h.jc.phase_of(&NodeName::new("C")).await, JoinPhase::Nack);

    h.confirm(join_id, "A").await;
    h.confirm(join_id, "B").await;

    assert_eq!(h.jc.phase_of(&NodeName::new("A")).await, JoinPhase::Confirmed);
    assert_eq!(h.jc.phase_of(&NodeName::new("B")).await, JoinPhase::Confirmed);
    assert_eq!(h.jc.phase_of(&NodeName::new("C")).await, JoinPhase::Nack);
}

#[tokio::test]
async fn late_message_from_a_stale_round_is_discarded() {
    let h = Harness::new("A", vec![peer("A"), peer("B"), peer("C"), peer("D")]);
    h.jc.start_round().await; // round 1, membership doesn't include D being ready yet
    let round2 = h.jc.start_round().await; // round 2 active now

    // A late JoinRequest from D still carrying the old round id.
    h.request(round2 - 1, "D", Generation::new(0, 5, 0, "pacemaker-3.0"), OURS).await;

    // D was Welcomed by round 2's own offer; the stale message must not
    // touch its phase.
    assert_eq!(h.jc.phase_of(&NodeName::new("D")).await, JoinPhase::Welcomed);
    assert!(h.jc.current_round().await.best_cib_from.is_none());
}
