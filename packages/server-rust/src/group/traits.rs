//! Collaborator traits the partition-group membership manager consumes
//! and the public contract it exposes.
//!
//! Every async collaborator boundary uses `#[async_trait]`; plain sync
//! traits are reserved for calls with no suspension point.

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::config::PartitionGroupsConfig;
use super::error::{GroupError, MessagingError};
use super::events::{Listener, ListenerHandle};
use super::types::{ClusterMember, GroupMembership, MemberEvent, MemberId};

/// Boxed future alias used where `async_trait` is not itself in play (the
/// bootstrap RPC handler closure). Hand-rolled rather than pulled from the
/// `futures` crate since `server-rust` only depends on `futures-util`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Cluster membership service consumed by the manager.
///
/// `subscribe` hands back a receiver rather than taking a listener callback:
/// the manager drains it on its own serialized context, which keeps the
/// collaborator boundary channel-shaped like every other inter-component
/// link in this crate.
#[async_trait]
pub trait ClusterMembershipService: Send + Sync {
    fn local_member(&self) -> ClusterMember;

    fn members(&self) -> Vec<ClusterMember>;

    fn member(&self, id: &MemberId) -> Option<ClusterMember>;

    /// Registers for `MemberEvent` notifications. Each call yields an
    /// independent receiver; events are broadcast to every live receiver.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<MemberEvent>;
}

/// Cluster messaging service consumed by the manager.
///
/// Bodies cross this boundary as opaque bytes: the manager is the only
/// caller, and it owns encoding/decoding via `PartitionGroupInfo::encode`/
/// `PartitionGroupInfo::decode`. The service itself stays a generic
/// request/response substrate rather than one specialized to this payload
/// type.
#[async_trait]
pub trait ClusterMessagingService: Send + Sync {
    /// Registers a handler for `subject`. Replaces any existing handler for
    /// the same subject.
    fn subscribe(
        &self,
        subject: &str,
        handler: BootstrapHandler,
    ) -> Result<(), MessagingError>;

    fn unsubscribe(&self, subject: &str);

    /// Sends `payload` to `target` on `subject`, awaiting the reply.
    ///
    /// # Errors
    ///
    /// Returns [`MessagingError::Recoverable`] for no-remote-handler and
    /// timeout conditions, [`MessagingError::Fatal`]
    /// for any other transport failure.
    async fn send(
        &self,
        subject: &str,
        payload: Vec<u8>,
        target: &MemberId,
    ) -> Result<Vec<u8>, MessagingError>;
}

/// Handler registered for the bootstrap RPC subject. Takes
/// the sender's id and raw request bytes, returns raw reply bytes.
pub type BootstrapHandler =
    Box<dyn Fn(MemberId, Vec<u8>) -> BoxFuture<'static, Result<Vec<u8>, MessagingError>> + Send + Sync>;

/// The public contract exposed by the partition-group membership manager.
#[async_trait]
pub trait GroupMembershipService: Send + Sync {
    /// Seeds local state from `config`, subscribes to cluster membership
    /// events and the bootstrap RPC subject, then runs the bootstrap loop.
    /// Resolves once bootstrap terminates, or immediately if `stop`
    /// is invoked first. Never fails because no system group was found; the
    /// only failure mode is calling `start` a second time.
    ///
    /// # Errors
    ///
    /// Returns [`GroupError::LifecycleMisuse`] if already started.
    async fn start(&self, config: PartitionGroupsConfig) -> Result<(), GroupError>;

    /// Unsubscribes and tears down the manager context. Idempotent.
    async fn stop(&self);

    fn system_membership(&self) -> Option<GroupMembership>;

    /// Returns the named group, or the system group if `name` matches it.
    fn membership(&self, name: &str) -> Option<GroupMembership>;

    fn memberships(&self) -> Vec<GroupMembership>;

    fn add_listener(&self, listener: Listener) -> ListenerHandle;

    fn remove_listener(&self, handle: ListenerHandle);
}
