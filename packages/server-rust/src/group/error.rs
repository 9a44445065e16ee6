//! Error types for the partition-group membership subsystem.
//!
//! A small `thiserror` enum covers domain-distinguishable failures; `anyhow`
//! is reserved for the outer boundary. Transport-level failures belong to
//! the messaging service's own error type, not to `GroupError` -- the
//! manager consumes them internally and never surfaces them through the
//! public contract.

use thiserror::Error;

/// Errors returned from the public `GroupMembershipService` contract.
#[derive(Debug, Error)]
pub enum GroupError {
    #[error("group name must not be empty")]
    EmptyGroupName,

    #[error(
        "configuration conflict for group '{group}': existing type '{existing_type}' \
         does not match requested type '{requested_type}'"
    )]
    ConfigurationConflict {
        group: String,
        existing_type: String,
        requested_type: String,
    },

    #[error("{operation} is not valid in the current lifecycle state ({state})")]
    LifecycleMisuse {
        operation: &'static str,
        state: &'static str,
    },
}

/// Errors surfaced by the `ClusterMessagingService` collaborator.
///
/// Split into recoverable (retry the same peer again later) and fatal (the
/// peer's endpoint is permanently gone, e.g. the peer itself reports the
/// subject is unrecognized).
#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("transport error talking to peer: {0}")]
    Recoverable(String),

    #[error("fatal transport error talking to peer: {0}")]
    Fatal(String),

    #[error("failed to decode message body: {0}")]
    Decoding(String),
}

impl MessagingError {
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, MessagingError::Recoverable(_))
    }
}
