//! Wire envelope and codec for the bootstrap RPC.
//!
//! `PartitionGroupInfo` is the only type ever placed on the wire. It is
//! encoded with `rmp_serde` and relies on `GroupMembership`'s
//! `BTreeSet<MemberId>` member storage for deterministic encoding of
//! identical content.

use serde::{Deserialize, Serialize};

use super::error::MessagingError;
use super::types::{GroupMembership, MemberId};

/// Subject literal for the bootstrap RPC. Stable across the cluster.
pub const BOOTSTRAP_SUBJECT: &str = "partition-group-bootstrap";

/// The request/reply envelope exchanged between peers during bootstrap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionGroupInfo {
    pub sender_id: MemberId,
    pub system_group: Option<GroupMembership>,
    pub other_groups: Vec<GroupMembership>,
}

impl PartitionGroupInfo {
    #[must_use]
    pub fn new(
        sender_id: MemberId,
        system_group: Option<GroupMembership>,
        other_groups: Vec<GroupMembership>,
    ) -> Self {
        Self {
            sender_id,
            system_group,
            other_groups,
        }
    }

    /// Encodes this envelope as MsgPack bytes.
    ///
    /// # Errors
    ///
    /// Returns [`MessagingError::Decoding`] only in the encode direction if
    /// the value itself cannot be represented; in practice this never fails
    /// for well-formed `PartitionGroupInfo` values, but the signature stays
    /// fallible to match `rmp_serde`'s own API.
    pub fn encode(&self) -> Result<Vec<u8>, MessagingError> {
        rmp_serde::to_vec_named(self).map_err(|e| MessagingError::Decoding(e.to_string()))
    }

    /// Decodes a `PartitionGroupInfo` from MsgPack bytes.
    ///
    /// # Errors
    ///
    /// Returns [`MessagingError::Decoding`] if `bytes` is not a valid
    /// encoding of this type.
    pub fn decode(bytes: &[u8]) -> Result<Self, MessagingError> {
        rmp_serde::from_slice(bytes).map_err(|e| MessagingError::Decoding(e.to_string()))
    }
}
