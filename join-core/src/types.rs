//! Core domain vocabulary shared by every join-protocol component.
//!
//! Kept deliberately small and dependency-light: one crate every component
//! depends on instead of each redefining the same handful of wire-adjacent
//! types.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A cluster node's stable name, as advertised by the membership layer.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeName(String);

impl NodeName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for NodeName {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// A cluster node's membership-layer identity (corosync/cluster-engine uuid).
/// Not an RFC4122 UUID in general -- the source cluster stack hands these out
/// as opaque stable strings, so we keep the same shape here.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeUuid(String);

impl NodeUuid {
    pub fn new(uuid: impl Into<String>) -> Self {
        Self(uuid.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeUuid {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// The CIB validation-schema name carried alongside a [`Generation`].
pub type SchemaName = String;

/// A versioning tuple that totally orders CIB snapshots.
///
/// `admin_epoch`/`epoch`/`num_updates` arrive from the wire as optional
/// signed 64-bit integers; a missing or malformed field is treated as `-1`
/// by the comparator (never here -- this type only stores what was already
/// parsed by the `XmlCodec` boundary collaborator).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Generation {
    pub admin_epoch: Option<i64>,
    pub epoch: Option<i64>,
    pub num_updates: Option<i64>,
    pub validation_schema: Option<SchemaName>,
    /// Opaque CIB payload carried with the join request, handed unexamined
    /// to [`crate::collab::CibClient`].
    pub cib_payload: Vec<u8>,
}

impl Generation {
    pub fn new(admin_epoch: i64, epoch: i64, num_updates: i64, validation_schema: impl Into<String>) -> Self {
        Self {
            admin_epoch: Some(admin_epoch),
            epoch: Some(epoch),
            num_updates: Some(num_updates),
            validation_schema: Some(validation_schema.into()),
            cib_payload: Vec::new(),
        }
    }
}

/// A peer's advertised protocol capability, `"major.minor.patch"`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeatureSet {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl FeatureSet {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }

    /// True iff `self` and `other` share a major version and `other` is not
    /// newer than `self` (compatible iff major equal and theirs <= ours
    /// within known minor/patch).
    pub fn compatible_with(&self, theirs: &FeatureSet) -> bool {
        self.major == theirs.major && (theirs.minor, theirs.patch) <= (self.minor, self.patch)
    }
}

impl PartialOrd for FeatureSet {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FeatureSet {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch).cmp(&(other.major, other.minor, other.patch))
    }
}

impl fmt::Display for FeatureSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureSetParseError;

impl fmt::Display for FeatureSetParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("feature-set version must have the form \"major.minor.patch\"")
    }
}

impl std::error::Error for FeatureSetParseError {}

impl FromStr for FeatureSet {
    type Err = FeatureSetParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('.');
        let (major, minor, patch) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(a), Some(b), Some(c), None) => (a, b, c),
            _ => return Err(FeatureSetParseError),
        };
        let major = major.parse().map_err(|_| FeatureSetParseError)?;
        let minor = minor.parse().map_err(|_| FeatureSetParseError)?;
        let patch = patch.parse().map_err(|_| FeatureSetParseError)?;
        Ok(Self { major, minor, patch })
    }
}

/// Ordered join phase. `Nack`/`NackQuiet` are terminal and unordered with
/// respect to the `None < Welcomed < ... < Confirmed` chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JoinPhase {
    None,
    Welcomed,
    Integrated,
    Finalized,
    Confirmed,
    Nack,
    NackQuiet,
}

impl JoinPhase {
    /// Ordinal used to test successor-ness along the ordered chain. `Nack`
    /// and `NackQuiet` have no ordinal -- they are reachable from anywhere
    /// but never a "successor" of anything.
    fn ordinal(self) -> Option<u8> {
        match self {
            JoinPhase::None => Some(0),
            JoinPhase::Welcomed => Some(1),
            JoinPhase::Integrated => Some(2),
            JoinPhase::Finalized => Some(3),
            JoinPhase::Confirmed => Some(4),
            JoinPhase::Nack | JoinPhase::NackQuiet => None,
        }
    }

    /// True iff `self` is exactly one step ahead of `old` in the ordered
    /// chain.
    pub fn is_immediate_successor_of(self, old: JoinPhase) -> bool {
        match (old.ordinal(), self.ordinal()) {
            (Some(o), Some(n)) => n == o + 1,
            _ => false,
        }
    }
}

impl fmt::Display for JoinPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JoinPhase::None => "None",
            JoinPhase::Welcomed => "Welcomed",
            JoinPhase::Integrated => "Integrated",
            JoinPhase::Finalized => "Finalized",
            JoinPhase::Confirmed => "Confirmed",
            JoinPhase::Nack => "Nack",
            JoinPhase::NackQuiet => "NackQuiet",
        };
        f.write_str(s)
    }
}

/// What the join subsystem expects the cluster layer to treat a peer as,
/// written by the join coordinator and read by external collaborators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExpectedState {
    Down,
    Member,
    Nack,
}
