//! Partition-group domain types: identity, addressing, descriptors, and
//! membership records.
//!
//! Wire-shaped data (plain public fields) is kept separate from the
//! invariants that guard it (validating constructors); a *group* here is a
//! named, typed collection of members (system or data).

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::GroupError;

// ---------------------------------------------------------------------------
// MemberId
// ---------------------------------------------------------------------------

/// Opaque cluster member identifier: an id, optionally qualified by a
/// namespace. Equality and hashing are over the full (namespace, id) pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberId {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    namespace: Option<String>,
    id: String,
}

impl MemberId {
    /// Creates an unnamespaced member id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            namespace: None,
            id: id.into(),
        }
    }

    /// Creates a namespaced member id.
    pub fn namespaced(namespace: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            id: id.into(),
        }
    }

    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{ns}:{}", self.id),
            None => write!(f, "{}", self.id),
        }
    }
}

// ---------------------------------------------------------------------------
// Address
// ---------------------------------------------------------------------------

/// Network address of a cluster member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

// ---------------------------------------------------------------------------
// ClusterMember
// ---------------------------------------------------------------------------

/// A member of the surrounding cluster, as reported by the cluster
/// membership service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterMember {
    pub id: MemberId,
    pub address: Address,
}

/// Membership change notification emitted by the cluster membership service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberEvent {
    pub kind: MemberEventKind,
    pub member: ClusterMember,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberEventKind {
    Added,
    Removed,
}

// ---------------------------------------------------------------------------
// GroupConfig
// ---------------------------------------------------------------------------

/// Immutable configuration for a single partition group: its name, the
/// group-type tag, and an opaque type-specific config blob understood by the
/// group-type registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupConfig {
    name: String,
    type_name: String,
    config: Vec<u8>,
}

impl GroupConfig {
    /// Creates a group descriptor. The group name must be non-empty; it
    /// uniquely identifies a group across the cluster.
    pub fn new(
        name: impl Into<String>,
        type_name: impl Into<String>,
        config: Vec<u8>,
    ) -> Result<Self, GroupError> {
        let name = name.into();
        if name.is_empty() {
            return Err(GroupError::EmptyGroupName);
        }
        Ok(Self {
            name,
            type_name: type_name.into(),
            config,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    #[must_use]
    pub fn config_bytes(&self) -> &[u8] {
        &self.config
    }
}

// ---------------------------------------------------------------------------
// GroupMembership
// ---------------------------------------------------------------------------

/// A group's descriptor plus the set of members currently participating.
///
/// Members are kept in a `BTreeSet` rather than a hash set so that encoding
/// is deterministic for identical content without a separate
/// wire/domain type split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMembership {
    config: GroupConfig,
    members: BTreeSet<MemberId>,
    is_system: bool,
}

impl GroupMembership {
    /// Seeds a new record with exactly the given members (typically just
    /// the local member, at `start`).
    pub fn seed(config: GroupConfig, is_system: bool, members: impl IntoIterator<Item = MemberId>) -> Self {
        Self {
            config,
            members: members.into_iter().collect(),
            is_system,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.config.name()
    }

    #[must_use]
    pub fn type_name(&self) -> &str {
        self.config.type_name()
    }

    #[must_use]
    pub fn config(&self) -> &GroupConfig {
        &self.config
    }

    #[must_use]
    pub fn members(&self) -> &BTreeSet<MemberId> {
        &self.members
    }

    #[must_use]
    pub fn is_system(&self) -> bool {
        self.is_system
    }

    /// Returns a copy of this record with a replaced member set. The
    /// descriptor and system flag are carried over unchanged: neither is
    /// ever allowed to change in place.
    #[must_use]
    pub fn with_members(&self, members: BTreeSet<MemberId>) -> Self {
        Self {
            config: self.config.clone(),
            members,
            is_system: self.is_system,
        }
    }
}
