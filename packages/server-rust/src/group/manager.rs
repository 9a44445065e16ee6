//! The partition-group membership manager: seeds local state, runs the
//! bootstrap loop, merges in peer views, and reacts to membership changes in
//! the surrounding cluster.
//!
//! Mutation of group state is serialized through a single `tokio::sync::Mutex`
//! (the manager context); lock-free reads are served from an
//! `ArcSwap`-published snapshot, so readers never contend with the writer. A
//! `watch::Sender<bool>` stop signal lets any pending backoff sleep or
//! per-peer retry observe `stop()` immediately.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use futures_util::future::join_all;
use tokio::sync::{watch, Mutex};
use tokio::time::Duration;
use tracing::{debug, info, warn};

use crate::service::registry::{ManagedService, ServiceContext};

use super::codec::{PartitionGroupInfo, BOOTSTRAP_SUBJECT};
use super::config::PartitionGroupsConfig;
use super::error::{GroupError, MessagingError};
use super::events::{EventBus, Listener, ListenerHandle, PartitionGroupMembershipEvent};
use super::traits::{
    BootstrapHandler, ClusterMembershipService, ClusterMessagingService, GroupMembershipService,
};
use super::types::{ClusterMember, GroupMembership, MemberEventKind, MemberId};

/// Data-group bootstrap gives up after this many failed rounds, letting a
/// node with only a system group still start.
const MAX_PARTITION_GROUP_ATTEMPTS: u32 = 5;

/// Fibonacci backoff schedule in whole seconds: `{1, 1, 2, 3, 5}`, holding at
/// `5` for every attempt beyond the fourth.
#[must_use]
pub fn backoff_seconds(attempt: u32) -> u64 {
    const SCHEDULE: [u64; 5] = [1, 1, 2, 3, 5];
    SCHEDULE[attempt.min(4) as usize]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    NotStarted,
    Running,
    Stopped,
}

fn lifecycle_name(lifecycle: Lifecycle) -> &'static str {
    match lifecycle {
        Lifecycle::NotStarted => "not-started",
        Lifecycle::Running => "running",
        Lifecycle::Stopped => "stopped",
    }
}

#[derive(Clone, Default)]
struct Snapshot {
    system_group: Option<GroupMembership>,
    groups: BTreeMap<String, GroupMembership>,
}

struct State {
    lifecycle: Lifecycle,
    system_group: Option<GroupMembership>,
    groups: BTreeMap<String, GroupMembership>,
}

struct Inner {
    local_member: MemberId,
    cluster: Arc<dyn ClusterMembershipService>,
    messaging: Arc<dyn ClusterMessagingService>,
    initial_config: PartitionGroupsConfig,
    state: Mutex<State>,
    published: ArcSwap<Snapshot>,
    event_bus: EventBus,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
    attempt_counter: AtomicU32,
}

/// Read-only diagnostics snapshot of the manager's current state.
#[derive(Debug, Clone)]
pub struct GroupMembershipHealth {
    pub group_count: usize,
    pub system_group_known: bool,
    pub total_distinct_members: usize,
    pub outstanding_bootstrap_attempts: u32,
}

/// The partition-group membership manager.
///
/// Cheaply `Clone`: it is a thin handle around an `Arc<Inner>`, the usual
/// shape for a service handle shared across tasks.
#[derive(Clone)]
pub struct PartitionGroupMembershipManager(Arc<Inner>);

impl PartitionGroupMembershipManager {
    #[must_use]
    pub fn new(
        cluster: Arc<dyn ClusterMembershipService>,
        messaging: Arc<dyn ClusterMessagingService>,
        initial_config: PartitionGroupsConfig,
    ) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let local_member = cluster.local_member().id;
        Self(Arc::new(Inner {
            local_member,
            cluster,
            messaging,
            initial_config,
            state: Mutex::new(State {
                lifecycle: Lifecycle::NotStarted,
                system_group: None,
                groups: BTreeMap::new(),
            }),
            published: ArcSwap::from_pointee(Snapshot::default()),
            event_bus: EventBus::new(),
            stop_tx,
            stop_rx,
            attempt_counter: AtomicU32::new(0),
        }))
    }

    #[must_use]
    pub fn health(&self) -> GroupMembershipHealth {
        let snapshot = self.0.published.load();
        let mut distinct = BTreeSet::new();
        if let Some(system) = &snapshot.system_group {
            distinct.extend(system.members().iter().cloned());
        }
        for group in snapshot.groups.values() {
            distinct.extend(group.members().iter().cloned());
        }
        GroupMembershipHealth {
            group_count: snapshot.groups.len(),
            system_group_known: snapshot.system_group.is_some(),
            total_distinct_members: distinct.len(),
            outstanding_bootstrap_attempts: self.0.attempt_counter.load(Ordering::Relaxed),
        }
    }
}

fn publish(inner: &Inner, state: &State) {
    inner.published.store(Arc::new(Snapshot {
        system_group: state.system_group.clone(),
        groups: state.groups.clone(),
    }));
}

fn is_stopped(inner: &Inner) -> bool {
    *inner.stop_rx.borrow()
}

/// Races `duration` against the stop signal. Returns `true` if interrupted.
async fn sleep_or_stop(inner: &Inner, duration: Duration) -> bool {
    let mut stop_rx = inner.stop_rx.clone();
    if *stop_rx.borrow() {
        return true;
    }
    tokio::select! {
        () = tokio::time::sleep(duration) => false,
        _ = stop_rx.changed() => true,
    }
}

fn build_outbound(inner: &Inner) -> PartitionGroupInfo {
    let snapshot = inner.published.load();
    PartitionGroupInfo::new(
        inner.local_member.clone(),
        snapshot.system_group.clone(),
        snapshot.groups.values().cloned().collect(),
    )
}

/// Applies union-then-filter merge semantics under the manager's lock,
/// then posts one event per group whose membership actually changed.
async fn merge(inner: &Inner, info: PartitionGroupInfo) {
    let live: BTreeSet<MemberId> = inner.cluster.members().into_iter().map(|m| m.id).collect();
    let mut state = inner.state.lock().await;
    if state.lifecycle == Lifecycle::Stopped {
        return;
    }

    let mut changed = Vec::new();

    let local_system = state.system_group.clone();
    match (local_system, info.system_group) {
        (None, Some(peer_record)) => {
            info!(group = %peer_record.name(), "adopting system group from peer");
            // Adoption is how this node joins the group it just learned about,
            // so the local member is folded in alongside whatever the peer reported.
            let mut members = peer_record.members().clone();
            members.insert(inner.local_member.clone());
            let adopted = peer_record.with_members(members);
            state.system_group = Some(adopted.clone());
            changed.push(adopted);
        }
        (Some(local), Some(peer_record)) => {
            if local.name() != peer_record.name() || local.type_name() != peer_record.type_name() {
                let conflict = GroupError::ConfigurationConflict {
                    group: local.name().to_string(),
                    existing_type: local.type_name().to_string(),
                    requested_type: peer_record.type_name().to_string(),
                };
                warn!(error = %conflict, peer_name = %peer_record.name(), "rejecting system group update");
            } else {
                let union: BTreeSet<MemberId> =
                    local.members().union(peer_record.members()).cloned().collect();
                let filtered: BTreeSet<MemberId> =
                    union.into_iter().filter(|m| live.contains(m)).collect();
                if filtered.difference(local.members()).next().is_some() {
                    let updated = local.with_members(filtered);
                    state.system_group = Some(updated.clone());
                    changed.push(updated);
                }
            }
        }
        (_, None) => {}
    }

    for peer_group in info.other_groups {
        let existing = state.groups.get(peer_group.name()).cloned();
        match existing {
            None => {
                info!(group = %peer_group.name(), "adopting new data group from peer");
                let mut members = peer_group.members().clone();
                members.insert(inner.local_member.clone());
                let adopted = peer_group.with_members(members);
                state.groups.insert(adopted.name().to_string(), adopted.clone());
                changed.push(adopted);
            }
            Some(local) => {
                if local.type_name() != peer_group.type_name() {
                    let conflict = GroupError::ConfigurationConflict {
                        group: local.name().to_string(),
                        existing_type: local.type_name().to_string(),
                        requested_type: peer_group.type_name().to_string(),
                    };
                    warn!(error = %conflict, "rejecting data group update");
                    continue;
                }
                let union: BTreeSet<MemberId> =
                    local.members().union(peer_group.members()).cloned().collect();
                let filtered: BTreeSet<MemberId> =
                    union.into_iter().filter(|m| live.contains(m)).collect();
                if filtered.difference(local.members()).next().is_some() {
                    let updated = local.with_members(filtered);
                    state.groups.insert(updated.name().to_string(), updated.clone());
                    changed.push(updated);
                }
            }
        }
    }

    publish(inner, &state);

    // Posted while still holding `state`: posting is synchronous (no
    // `.await`), and keeping the lock serializes this round's posts against
    // every other task mutating state, so per-listener delivery order
    // matches the linearization of merges/removals, not task-wakeup order.
    for membership in changed {
        inner.event_bus.post(PartitionGroupMembershipEvent { membership });
    }
    drop(state);
}

/// Reacts to a cluster departure: shrinks every group `member`
/// belonged to and posts one event per group actually affected.
async fn handle_member_removed(inner: &Inner, member: MemberId) {
    let mut state = inner.state.lock().await;
    if state.lifecycle == Lifecycle::Stopped {
        return;
    }

    let mut changed = Vec::new();

    if let Some(system) = &state.system_group {
        if system.members().contains(&member) {
            let mut members = system.members().clone();
            members.remove(&member);
            let updated = system.with_members(members);
            state.system_group = Some(updated.clone());
            changed.push(updated);
        }
    }

    let affected_names: Vec<String> = state
        .groups
        .iter()
        .filter(|(_, group)| group.members().contains(&member))
        .map(|(name, _)| name.clone())
        .collect();
    for name in affected_names {
        if let Some(group) = state.groups.get(&name) {
            let mut members = group.members().clone();
            members.remove(&member);
            let updated = group.with_members(members);
            state.groups.insert(name, updated.clone());
            changed.push(updated);
        }
    }

    publish(inner, &state);

    // See the matching comment in `merge`: held across the posts on purpose.
    for membership in changed {
        inner.event_bus.post(PartitionGroupMembershipEvent { membership });
    }
    drop(state);
}

async fn attempt_peer_once(
    inner: &Inner,
    peer: &ClusterMember,
    payload: Vec<u8>,
) -> Result<PartitionGroupInfo, MessagingError> {
    let bytes = inner.messaging.send(BOOTSTRAP_SUBJECT, payload, &peer.id).await?;
    PartitionGroupInfo::decode(&bytes)
}

/// Indefinite 1-second-cadence retry for one peer whose round attempt failed
/// with a recoverable transport error.
fn spawn_peer_retry(inner: Arc<Inner>, peer: ClusterMember) {
    tokio::spawn(async move {
        loop {
            if sleep_or_stop(&inner, Duration::from_secs(1)).await {
                return;
            }
            if is_stopped(&inner) {
                return;
            }
            let payload = match build_outbound(&inner).encode() {
                Ok(bytes) => bytes,
                Err(_) => return,
            };
            match attempt_peer_once(&inner, &peer, payload).await {
                Ok(info) => {
                    merge(&inner, info).await;
                    return;
                }
                Err(MessagingError::Recoverable(reason)) => {
                    debug!(peer = %peer.id, reason, "peer still unreachable, retrying");
                }
                Err(MessagingError::Fatal(reason)) => {
                    debug!(peer = %peer.id, reason, "peer retry abandoned after fatal error");
                    return;
                }
                Err(MessagingError::Decoding(reason)) => {
                    warn!(peer = %peer.id, reason, "malformed reply during peer retry");
                    return;
                }
            }
        }
    });
}

/// One attempt to reach a newly-arrived peer. Unlike the
/// round-level bootstrap loop, an arrival is not itself retried: the next
/// round of the loop (or a future arrival/removal event) will pick up any
/// remaining divergence.
async fn bootstrap_new_peer(inner: Arc<Inner>, peer: ClusterMember) {
    let payload = match build_outbound(&inner).encode() {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(peer = %peer.id, error = %e, "failed to encode bootstrap request for new peer");
            return;
        }
    };
    match attempt_peer_once(&inner, &peer, payload).await {
        Ok(info) => merge(&inner, info).await,
        Err(MessagingError::Recoverable(reason)) => {
            debug!(peer = %peer.id, reason, "new peer unreachable on first attempt");
        }
        Err(MessagingError::Fatal(reason)) => {
            debug!(peer = %peer.id, reason, "new peer bootstrap failed");
        }
        Err(MessagingError::Decoding(reason)) => {
            warn!(peer = %peer.id, reason, "malformed reply from new peer");
        }
    }
}

fn spawn_membership_listener(inner: Arc<Inner>) {
    let mut events = inner.cluster.subscribe();
    let mut stop_rx = inner.stop_rx.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        return;
                    }
                }
                maybe_event = events.recv() => {
                    let Some(event) = maybe_event else { return };
                    match event.kind {
                        MemberEventKind::Added => {
                            let member = event.member;
                            let inner = inner.clone();
                            tokio::spawn(async move { bootstrap_new_peer(inner, member).await; });
                        }
                        MemberEventKind::Removed => {
                            handle_member_removed(&inner, event.member.id).await;
                        }
                    }
                }
            }
        }
    });
}

fn install_bootstrap_handler(inner: &Arc<Inner>) {
    let handler_inner = inner.clone();
    let handler: BootstrapHandler = Box::new(move |_sender, bytes| {
        let inner = handler_inner.clone();
        Box::pin(async move {
            let info = PartitionGroupInfo::decode(&bytes).map_err(|e| {
                warn!(error = %e, "malformed bootstrap request");
                e
            })?;
            merge(&inner, info).await;
            build_outbound(&inner).encode()
        })
    });
    if let Err(e) = inner.messaging.subscribe(BOOTSTRAP_SUBJECT, handler) {
        warn!(error = %e, "failed to subscribe to bootstrap subject");
    }
}

async fn run_bootstrap_loop(inner: Arc<Inner>) {
    let mut attempt: u32 = 0;
    loop {
        if is_stopped(&inner) {
            return;
        }

        let peers: Vec<ClusterMember> = inner
            .cluster
            .members()
            .into_iter()
            .filter(|m| m.id != inner.local_member)
            .collect();

        let payload = match build_outbound(&inner).encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "failed to encode outbound bootstrap request, aborting bootstrap loop");
                return;
            }
        };

        let results = join_all(peers.iter().map(|peer| {
            let inner = &inner;
            let payload = payload.clone();
            async move { (peer.clone(), attempt_peer_once(inner, peer, payload).await) }
        }))
        .await;

        for (peer, result) in results {
            match result {
                Ok(info) => merge(&inner, info).await,
                Err(MessagingError::Recoverable(reason)) => {
                    debug!(peer = %peer.id, reason, "scheduling per-peer bootstrap retry");
                    spawn_peer_retry(inner.clone(), peer);
                }
                Err(MessagingError::Fatal(reason)) => {
                    debug!(peer = %peer.id, reason, "dropping peer contribution this round");
                }
                Err(MessagingError::Decoding(reason)) => {
                    warn!(peer = %peer.id, reason, "malformed bootstrap reply");
                }
            }
        }

        if is_stopped(&inner) {
            return;
        }

        inner.attempt_counter.store(attempt, Ordering::Relaxed);
        let snapshot = inner.published.load();
        let system_known = snapshot.system_group.is_some();
        let groups_empty = snapshot.groups.is_empty();
        drop(snapshot);

        if !system_known {
            let delay = backoff_seconds(attempt);
            debug!(attempt, delay, "no system group yet, scheduling retry");
            if sleep_or_stop(&inner, Duration::from_secs(delay)).await {
                return;
            }
            attempt += 1;
            continue;
        }

        if groups_empty && attempt < MAX_PARTITION_GROUP_ATTEMPTS {
            let delay = backoff_seconds(attempt);
            debug!(attempt, delay, "no data groups yet, scheduling retry");
            if sleep_or_stop(&inner, Duration::from_secs(delay)).await {
                return;
            }
            attempt += 1;
            continue;
        }

        info!(attempt, "bootstrap loop converged");
        return;
    }
}

#[async_trait]
impl GroupMembershipService for PartitionGroupMembershipManager {
    async fn start(&self, config: PartitionGroupsConfig) -> Result<(), GroupError> {
        {
            let mut state = self.0.state.lock().await;
            if state.lifecycle != Lifecycle::NotStarted {
                return Err(GroupError::LifecycleMisuse {
                    operation: "start",
                    state: lifecycle_name(state.lifecycle),
                });
            }
            state.lifecycle = Lifecycle::Running;

            let local = self.0.local_member.clone();
            if let Some(system_config) = config.system_group {
                state.system_group = Some(GroupMembership::seed(system_config, true, [local.clone()]));
            }
            for (name, group_config) in config.groups {
                state
                    .groups
                    .insert(name, GroupMembership::seed(group_config, false, [local.clone()]));
            }
            publish(&self.0, &state);
        }

        {
            let snapshot = self.0.published.load();
            if let Some(system) = &snapshot.system_group {
                self.0.event_bus.post(PartitionGroupMembershipEvent {
                    membership: system.clone(),
                });
            }
            for group in snapshot.groups.values() {
                self.0.event_bus.post(PartitionGroupMembershipEvent {
                    membership: group.clone(),
                });
            }
        }

        info!(member = %self.0.local_member, "starting partition-group membership manager");

        install_bootstrap_handler(&self.0);
        spawn_membership_listener(self.0.clone());

        run_bootstrap_loop(self.0.clone()).await;

        Ok(())
    }

    async fn stop(&self) {
        {
            let mut state = self.0.state.lock().await;
            if state.lifecycle == Lifecycle::Stopped {
                return;
            }
            state.lifecycle = Lifecycle::Stopped;
        }
        let _ = self.0.stop_tx.send(true);
        self.0.messaging.unsubscribe(BOOTSTRAP_SUBJECT);
        info!(member = %self.0.local_member, "stopped partition-group membership manager");
    }

    fn system_membership(&self) -> Option<GroupMembership> {
        self.0.published.load().system_group.clone()
    }

    fn membership(&self, name: &str) -> Option<GroupMembership> {
        let snapshot = self.0.published.load();
        if let Some(system) = &snapshot.system_group {
            if system.name() == name {
                return Some(system.clone());
            }
        }
        snapshot.groups.get(name).cloned()
    }

    fn memberships(&self) -> Vec<GroupMembership> {
        self.0.published.load().groups.values().cloned().collect()
    }

    fn add_listener(&self, listener: Listener) -> ListenerHandle {
        self.0.event_bus.add_listener(listener)
    }

    fn remove_listener(&self, handle: ListenerHandle) {
        self.0.event_bus.remove_listener(handle);
    }
}

#[async_trait]
impl ManagedService for PartitionGroupMembershipManager {
    fn name(&self) -> &'static str {
        "partition-group-membership"
    }

    async fn init(&self, _ctx: &ServiceContext) -> anyhow::Result<()> {
        let config = self.0.initial_config.clone();
        GroupMembershipService::start(self, config).await?;
        Ok(())
    }

    async fn reset(&self) -> anyhow::Result<()> {
        Err(GroupError::LifecycleMisuse {
            operation: "reset",
            state: "n/a",
        }
        .into())
    }

    async fn shutdown(&self, _terminate: bool) -> anyhow::Result<()> {
        GroupMembershipService::stop(self).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_schedule_matches_fibonacci_then_holds() {
        let delays: Vec<u64> = (0..8).map(backoff_seconds).collect();
        assert_eq!(delays, vec![1, 1, 2, 3, 5, 5, 5, 5]);
    }

    #[tokio::test]
    async fn sleep_or_stop_returns_false_on_natural_timeout() {
        let (stop_tx, stop_rx) = watch::channel(false);
        let inner = Inner {
            local_member: MemberId::new("a"),
            cluster: Arc::new(crate::group::testing::InMemoryNetwork::new().join("a")),
            messaging: Arc::new(crate::group::testing::InMemoryNetwork::new().join("a")),
            initial_config: PartitionGroupsConfig::default(),
            state: Mutex::new(State {
                lifecycle: Lifecycle::NotStarted,
                system_group: None,
                groups: BTreeMap::new(),
            }),
            published: ArcSwap::from_pointee(Snapshot::default()),
            event_bus: EventBus::new(),
            stop_tx,
            stop_rx,
            attempt_counter: AtomicU32::new(0),
        };
        let interrupted = sleep_or_stop(&inner, Duration::from_millis(5)).await;
        assert!(!interrupted);
    }

    #[tokio::test]
    async fn sleep_or_stop_is_interrupted_by_stop_signal() {
        let (stop_tx, stop_rx) = watch::channel(false);
        let inner = Arc::new(Inner {
            local_member: MemberId::new("a"),
            cluster: Arc::new(crate::group::testing::InMemoryNetwork::new().join("a")),
            messaging: Arc::new(crate::group::testing::InMemoryNetwork::new().join("a")),
            initial_config: PartitionGroupsConfig::default(),
            state: Mutex::new(State {
                lifecycle: Lifecycle::NotStarted,
                system_group: None,
                groups: BTreeMap::new(),
            }),
            published: ArcSwap::from_pointee(Snapshot::default()),
            event_bus: EventBus::new(),
            stop_tx,
            stop_rx,
            attempt_counter: AtomicU32::new(0),
        });

        let waiter = {
            let inner = inner.clone();
            tokio::spawn(async move { sleep_or_stop(&inner, Duration::from_secs(60)).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        let _ = inner.stop_tx.send(true);

        let interrupted = waiter.await.unwrap();
        assert!(interrupted);
    }
}
