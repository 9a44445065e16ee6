//! In-memory test harness for the partition-group membership subsystem.
//!
//! A single [`InMemoryNetwork`] backs any number of [`InMemoryNode`] handles,
//! routing bootstrap RPCs and membership events through shared, lock-guarded
//! state instead of real transport, for deterministic, socket-free tests.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::error::MessagingError;
use super::traits::{BootstrapHandler, ClusterMembershipService, ClusterMessagingService};
use super::types::{Address, ClusterMember, MemberEvent, MemberEventKind, MemberId};

type HandlerMap = BTreeMap<String, Arc<dyn Fn(MemberId, Vec<u8>) -> super::traits::BoxFuture<'static, Result<Vec<u8>, MessagingError>> + Send + Sync>>;

#[derive(Default)]
struct Shared {
    members: BTreeMap<MemberId, ClusterMember>,
    member_listeners: Vec<mpsc::UnboundedSender<MemberEvent>>,
    handlers: BTreeMap<MemberId, HandlerMap>,
}

/// A shared in-memory cluster. Each `join` call adds a node and broadcasts
/// an `Added` event to every listener already registered by other nodes.
#[derive(Clone)]
pub struct InMemoryNetwork {
    shared: Arc<Mutex<Shared>>,
}

impl InMemoryNetwork {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared::default())),
        }
    }

    /// Adds a node named `id` to the network, returning its handle. Every
    /// listener already registered by another node observes an `Added` event
    /// for the new member.
    #[must_use]
    pub fn join(&self, id: &str) -> InMemoryNode {
        let member_id = MemberId::new(id);
        let member = ClusterMember {
            id: member_id.clone(),
            address: Address {
                host: id.to_string(),
                port: 0,
            },
        };

        let mut shared = self.shared.lock().unwrap();
        shared.members.insert(member_id.clone(), member.clone());
        shared.member_listeners.retain(|tx| {
            tx.send(MemberEvent {
                kind: MemberEventKind::Added,
                member: member.clone(),
            })
            .is_ok()
        });

        InMemoryNode {
            id: member_id,
            shared: self.shared.clone(),
        }
    }

    /// Removes a node from the network, broadcasting a `Removed` event to
    /// every registered listener.
    pub fn leave(&self, id: &str) {
        let member_id = MemberId::new(id);
        let mut shared = self.shared.lock().unwrap();
        if let Some(member) = shared.members.remove(&member_id) {
            shared.member_listeners.retain(|tx| {
                tx.send(MemberEvent {
                    kind: MemberEventKind::Removed,
                    member: member.clone(),
                })
                .is_ok()
            });
        }
    }
}

impl Default for InMemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

/// A node's view of an [`InMemoryNetwork`]: implements both collaborator
/// traits the manager consumes, so the same handle can back both the
/// `ClusterMembershipService` and `ClusterMessagingService` fields of a
/// manager under test.
#[derive(Clone)]
pub struct InMemoryNode {
    id: MemberId,
    shared: Arc<Mutex<Shared>>,
}

#[async_trait]
impl ClusterMembershipService for InMemoryNode {
    fn local_member(&self) -> ClusterMember {
        self.shared
            .lock()
            .unwrap()
            .members
            .get(&self.id)
            .cloned()
            .expect("node must be registered with its own network")
    }

    fn members(&self) -> Vec<ClusterMember> {
        self.shared.lock().unwrap().members.values().cloned().collect()
    }

    fn member(&self, id: &MemberId) -> Option<ClusterMember> {
        self.shared.lock().unwrap().members.get(id).cloned()
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<MemberEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.lock().unwrap().member_listeners.push(tx);
        rx
    }
}

#[async_trait]
impl ClusterMessagingService for InMemoryNode {
    fn subscribe(&self, subject: &str, handler: BootstrapHandler) -> Result<(), MessagingError> {
        self.shared
            .lock()
            .unwrap()
            .handlers
            .entry(self.id.clone())
            .or_default()
            .insert(subject.to_string(), Arc::from(handler));
        Ok(())
    }

    fn unsubscribe(&self, subject: &str) {
        if let Some(map) = self.shared.lock().unwrap().handlers.get_mut(&self.id) {
            map.remove(subject);
        }
    }

    async fn send(
        &self,
        subject: &str,
        payload: Vec<u8>,
        target: &MemberId,
    ) -> Result<Vec<u8>, MessagingError> {
        let handler = {
            let shared = self.shared.lock().unwrap();
            shared
                .handlers
                .get(target)
                .and_then(|subjects| subjects.get(subject))
                .cloned()
        };
        match handler {
            Some(handler) => handler(self.id.clone(), payload).await,
            None => Err(MessagingError::Recoverable(format!(
                "no handler registered for '{subject}' on {target}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn join_broadcasts_added_event_to_existing_listeners() {
        let network = InMemoryNetwork::new();
        let a = network.join("a");
        let mut events = ClusterMembershipService::subscribe(&a);

        let _b = network.join("b");

        let event = events.recv().await.unwrap();
        assert_eq!(event.kind, MemberEventKind::Added);
        assert_eq!(event.member.id, MemberId::new("b"));
    }

    #[tokio::test]
    async fn leave_broadcasts_removed_event() {
        let network = InMemoryNetwork::new();
        let a = network.join("a");
        let _b = network.join("b");
        let mut events = ClusterMembershipService::subscribe(&a);

        network.leave("b");

        let event = events.recv().await.unwrap();
        assert_eq!(event.kind, MemberEventKind::Removed);
        assert_eq!(event.member.id, MemberId::new("b"));
    }

    #[tokio::test]
    async fn send_without_registered_handler_is_recoverable() {
        let network = InMemoryNetwork::new();
        let a = network.join("a");
        let _b = network.join("b");

        let err = ClusterMessagingService::send(&a, "some-subject", vec![], &MemberId::new("b"))
            .await
            .unwrap_err();
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn send_routes_to_registered_handler() {
        let network = InMemoryNetwork::new();
        let a = network.join("a");
        let b = network.join("b");

        ClusterMessagingService::subscribe(
            &b,
            "echo",
            Box::new(|_sender, payload| Box::pin(async move { Ok(payload) })),
        )
        .unwrap();

        let reply = ClusterMessagingService::send(&a, "echo", vec![1, 2, 3], &MemberId::new("b"))
            .await
            .unwrap();
        assert_eq!(reply, vec![1, 2, 3]);
    }
}
