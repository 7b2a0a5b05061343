//! External-collaborator contracts.
//!
//! Everything in this module is a narrow trait the Join Coordinator calls
//! through -- cluster messaging, the CIB client, the peer cache and the
//! hosting controller FSM. None of their internals are in scope here; the
//! join-coordinator crate is tested against the in-memory stand-ins the
//! `dc-joind` binary crate provides, instead of a real cluster stack.

use crate::types::{FeatureSet, Generation, NodeName, NodeUuid};
use async_trait::async_trait;
use thiserror::Error;

pub use crate::types::ExpectedState;

// ---------------------------------------------------------------------
// Cluster messages
// ---------------------------------------------------------------------

/// Every message carries the round id and a DC-leaving flag, plus routing
/// and log-correlation metadata common to the whole wire protocol.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageHeader {
    pub join_id: u32,
    pub host_from: NodeName,
    pub host_to: MessageTarget,
    pub reference_id: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageTarget {
    Node(NodeName),
    Broadcast,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JoinOffer {
    pub header: MessageHeader,
    pub feature_set: FeatureSet,
    pub dc_leaving: bool,
}

/// Inbound request from a peer. `join_from`/`feature_set`/`generation` are
/// `Option` because a malformed wire message can omit any of them -- the
/// `XmlCodec` boundary collaborator parses what it can and leaves the rest
/// `None`, and the join coordinator nacks/discards on exactly those
/// absences.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JoinRequest {
    pub join_id: u32,
    pub join_from: Option<NodeName>,
    pub feature_set: Option<FeatureSet>,
    pub generation: Option<Generation>,
    pub reference_id: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JoinAckNak {
    pub header: MessageHeader,
    pub ack: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JoinConfirm {
    pub join_id: u32,
    pub join_from: Option<NodeName>,
    /// The peer's local-resource-manager state snapshot, handed unexamined
    /// to the CIB client at confirm time.
    pub executor_state: Vec<u8>,
    pub reference_id: u64,
}

// ---------------------------------------------------------------------
// Cluster messaging client (send side)
// ---------------------------------------------------------------------

#[async_trait]
pub trait ClusterMessaging: Send + Sync {
    async fn send_join_offer(&self, offer: JoinOffer);
    async fn send_join_ack_nak(&self, msg: JoinAckNak);
}

// ---------------------------------------------------------------------
// CIB client
// ---------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum CibSyncError {
    #[error("remote CIB generation is stale")]
    OldData,
    #[error("CIB diff application failed")]
    DiffFailed,
    #[error("CIB diff requires a full resync")]
    DiffResync,
    #[error("transport error contacting CIB peer")]
    Transport,
}

#[derive(Clone, Debug, Error)]
pub enum CibClientError {
    #[error("CIB transport error: {0}")]
    Transport(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CibSection {
    Status,
}

/// The status-section update shape the join coordinator's confirm handler
/// needs. The real `XmlCodec` boundary collaborator would render these as
/// XML; here they are handed to [`CibClient::update`] as already-encoded
/// opaque payloads.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CibStatusUpdate {
    DeleteLrmHistory { node: NodeName, exclude_locked: bool },
    ApplyExecutorState { node: NodeName, payload: Vec<u8> },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct CibUpdateOptions {
    pub scope_local: bool,
    pub quorum_override: bool,
    pub can_create: bool,
}

#[async_trait]
pub trait CibClient: Send + Sync {
    async fn query(&self, scope_local: bool) -> Result<Vec<u8>, CibClientError>;
    async fn sync_from(&self, node: &NodeName, quorum_override: bool) -> Result<(), CibSyncError>;
    async fn update(&self, section: CibSection, update: CibStatusUpdate, options: CibUpdateOptions) -> Result<(), CibClientError>;
}

// ---------------------------------------------------------------------
// Peer cache
// ---------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Peer {
    pub name: NodeName,
    pub uuid: NodeUuid,
    pub is_remote: bool,
    pub is_active: bool,
    /// True if the membership layer's last known state for this node was
    /// "lost"/down -- used to pick debug vs. error log level on a nack for
    /// an inactive peer.
    pub had_down_event: bool,
}

#[async_trait]
pub trait PeerCache: Send + Sync {
    async fn peers(&self) -> Vec<Peer>;
    async fn peer(&self, name: &NodeName) -> Option<Peer>;
    async fn set_expected(&self, name: &NodeName, expected: ExpectedState);

    /// Monotonic id of the current membership view. The join coordinator
    /// compares this against the value captured at round start to detect
    /// churn.
    fn membership_id(&self) -> u64;
}

// ---------------------------------------------------------------------
// Hosting FSM
// ---------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostingFsmState {
    Elected,
    Integration,
    FinalizeJoin,
    AckNack,
    Idle,
    Other,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FsaErrorClass {
    FsaInternal,
}

pub trait HostingFsm: Send + Sync {
    fn current_state(&self) -> HostingFsmState;
    fn shutdown(&self) -> bool;
    fn in_transition(&self) -> bool;
    fn set_have_cib(&self, value: bool);
    fn set_cib_asked(&self, value: bool);
    fn abort_transition(&self, reason: &str);
    fn input_node_join(&self);
    fn input_integrated(&self);
    fn input_finalized(&self);
    fn input_election_dc(&self);
    fn input_fail(&self);
    fn register_fsa_error(&self, class: FsaErrorClass, input: FsaErrorInput);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FsaErrorInput {
    Error,
    Fail,
}
