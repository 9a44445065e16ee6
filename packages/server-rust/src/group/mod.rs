//! Partition-group membership: the protocol and state machine by which
//! cluster peers converge on a shared view of a system management group and
//! a set of named data groups.
//!
//! Flat re-exports expose the public surface; the bottom of this file
//! carries cross-module integration tests exercising the manager end to end
//! over the in-memory harness.

mod codec;
mod config;
mod error;
mod events;
mod manager;
#[cfg(test)]
pub mod testing;
mod traits;
mod types;

pub use codec::{PartitionGroupInfo, BOOTSTRAP_SUBJECT};
pub use config::PartitionGroupsConfig;
pub use error::{GroupError, MessagingError};
pub use events::{EventBus, Listener, ListenerHandle, PartitionGroupMembershipEvent};
pub use manager::{backoff_seconds, GroupMembershipHealth, PartitionGroupMembershipManager};
pub use traits::{
    BootstrapHandler, BoxFuture, ClusterMembershipService, ClusterMessagingService,
    GroupMembershipService,
};
pub use types::{
    Address, ClusterMember, GroupConfig, GroupMembership, MemberEvent, MemberEventKind, MemberId,
};
