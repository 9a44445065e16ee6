//! `Atomix` server core: the partition-group membership subsystem.
//!
//! The distributed-primitive API surface (maps, sets, locks, counters,
//! leader-election groups, topics, queues), the Raft replication engine, the
//! transport layer, and node identity/TLS all live outside this crate's
//! scope — they are external collaborators this subsystem talks to through
//! the [`group::ClusterMembershipService`] and [`group::ClusterMessagingService`]
//! traits.

pub mod group;
pub mod service;

pub use group::{
    Address, BootstrapHandler, ClusterMember, ClusterMembershipService, ClusterMessagingService,
    EventBus, GroupConfig, GroupError, GroupMembership, GroupMembershipHealth,
    GroupMembershipService, Listener, ListenerHandle, MemberEvent, MemberEventKind, MemberId,
    MessagingError, PartitionGroupInfo, PartitionGroupMembershipManager, PartitionGroupMembershipEvent,
    PartitionGroupsConfig, BOOTSTRAP_SUBJECT,
};
pub use service::{ManagedService, ServerConfig, ServiceContext, ServiceRegistry};


/// Integration test wiring the membership manager into the service registry
/// the way a real server would at startup.
#[cfg(test)]
mod integration_tests {
    use std::sync::Arc;

    use crate::group::testing::InMemoryNetwork;
    use crate::group::{
        ClusterMembershipService, ClusterMessagingService, GroupConfig, PartitionGroupMembershipManager,
        PartitionGroupsConfig,
    };
    use crate::service::{ManagedService, ServerConfig, ServiceContext, ServiceRegistry};

    #[tokio::test(start_paused = true)]
    async fn membership_manager_runs_through_service_registry() {
        let network = InMemoryNetwork::new();
        let node = network.join("a");
        let cluster: Arc<dyn ClusterMembershipService> = Arc::new(node.clone());
        let messaging: Arc<dyn ClusterMessagingService> = Arc::new(node);

        let config = PartitionGroupsConfig::new()
            .with_system_group(GroupConfig::new("system", "raft", vec![]).unwrap());
        let manager = PartitionGroupMembershipManager::new(cluster, messaging, config);

        let registry = ServiceRegistry::new();
        registry.register(manager.clone());

        let ctx = ServiceContext {
            config: Arc::new(ServerConfig::default()),
        };
        registry.init_all(&ctx).await.unwrap();

        assert!(manager.system_membership().is_some());
        assert!(registry.get::<PartitionGroupMembershipManager>().is_some());

        registry.shutdown_all(false).await.unwrap();
    }
}
