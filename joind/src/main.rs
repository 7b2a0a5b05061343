//! `dc-joind` -- a demo binary that runs a single join round against an
//! in-memory cluster, wiring `JoinCoordinator` to the `testutil` collaborator
//! doubles.
//!
//! There is no real transport here; this binary exists to exercise the
//! wiring end to end and to give operators a way to sanity-check a
//! feature-set string or peer list against the protocol's own rules without
//! standing up a cluster.

mod args;

use args::Args;
use dc_join_core::collab::{HostingFsmState, Peer};
use dc_join_core::testutil::{ChannelClusterMessaging, InMemoryCibClient, InMemoryPeerCache, RecordingHostingFsm};
use dc_join_core::types::{FeatureSet, NodeName, NodeUuid};
use dc_join_coordinator::JoinCoordinator;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;

fn main() -> ExitCode {
    let args = Args::parse();
    dc_join_core::log::init_logger(args.log_dir.as_deref(), &args.log_level);

    let our_feature_set = match FeatureSet::from_str(&args.feature_set) {
        Ok(fs) => fs,
        Err(e) => {
            dc_join_core::error!("invalid --our-feature-set {:?}: {}", args.feature_set, e);
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            dc_join_core::error!("failed to start tokio runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(run(args.node_name, args.peers, our_feature_set));
    ExitCode::SUCCESS
}

async fn run(local_name: String, peer_names: Vec<String>, our_feature_set: FeatureSet) {
    let local = NodeName::new(local_name.clone());

    let mut peers = vec![Peer { name: local.clone(), uuid: NodeUuid::new(local_name.clone()), is_remote: false, is_active: true, had_down_event: false }];
    peers.extend(peer_names.iter().map(|name| Peer { name: NodeName::new(name.clone()), uuid: NodeUuid::new(name.clone()), is_remote: false, is_active: true, had_down_event: false }));

    dc_join_core::info!("starting join round as {} (feature set {}), peers={:?}", local, our_feature_set, peer_names);

    let fsm = Arc::new(RecordingHostingFsm::new(HostingFsmState::Elected));
    let cib = Arc::new(InMemoryCibClient::new());
    let messaging = Arc::new(ChannelClusterMessaging::new());
    let peer_cache = Arc::new(InMemoryPeerCache::new(peers));

    let jc = Arc::new(JoinCoordinator::new(local.clone(), our_feature_set, fsm.clone(), cib, messaging, peer_cache));

    let join_id = jc.start_round().await;
    dc_join_core::info!("round {} started, {} peer(s) welcomed", join_id, peer_names.len());

    fsm.set_state(HostingFsmState::Integration);
    for name in &peer_names {
        dc_join_core::debug!("demo: no real peer replies configured for {}, leaving it Welcomed", name);
    }

    let round = jc.current_round().await;
    dc_join_core::info!(
        "round {} snapshot: have_cib={} best_cib_from={:?} fsm_inputs={:?}",
        round.join_id,
        round.have_cib,
        round.best_cib_from,
        fsm.inputs()
    );
}
