//! Listener registration and dispatch for membership-change events.
//!
//! Uses a copy-on-write `ArcSwap<Vec<Entry>>` under a single writer so reads
//! (dispatch) never block on registration or removal.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;

use super::types::GroupMembership;

/// Event emitted whenever a group's membership changes. Never carries a
/// no-op diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionGroupMembershipEvent {
    pub membership: GroupMembership,
}

/// A boxed listener callback, invoked once per posted event.
pub type Listener = Arc<dyn Fn(&PartitionGroupMembershipEvent) + Send + Sync>;

/// Opaque handle returned by [`EventBus::add_listener`], used to remove the
/// listener later without the caller needing to retain the closure itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerHandle(u64);

struct Entry {
    handle: ListenerHandle,
    listener: Listener,
}

/// Copy-on-write listener registry with registration-order delivery.
///
/// `post` takes a snapshot of the registered listeners up front (so a
/// listener added mid-dispatch never observes the event in progress) and
/// re-checks each listener's continued presence in the *current* list
/// immediately before invoking it (so a listener removed mid-dispatch never
/// receives it), all without holding a lock across listener invocations.
pub struct EventBus {
    listeners: ArcSwap<Vec<Entry>>,
    next_handle: AtomicU64,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self {
            listeners: ArcSwap::from_pointee(Vec::new()),
            next_handle: AtomicU64::new(0),
        }
    }

    /// Registers a listener, returning a handle usable with
    /// [`EventBus::remove_listener`].
    pub fn add_listener(&self, listener: Listener) -> ListenerHandle {
        let handle = ListenerHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.listeners.rcu(|current| {
            let mut next = (**current).clone_entries();
            next.push(Entry {
                handle,
                listener: listener.clone(),
            });
            next
        });
        handle
    }

    /// Deregisters a previously-registered listener. No-op if the handle is
    /// unknown (already removed, or never registered).
    pub fn remove_listener(&self, handle: ListenerHandle) {
        self.listeners.rcu(|current| {
            current
                .iter()
                .filter(|entry| entry.handle != handle)
                .map(|entry| Entry {
                    handle: entry.handle,
                    listener: entry.listener.clone(),
                })
                .collect::<Vec<_>>()
        });
    }

    /// Posts an event to every listener registered at the time of the call,
    /// in registration order, skipping any that were concurrently removed.
    pub fn post(&self, event: PartitionGroupMembershipEvent) {
        let snapshot = self.listeners.load();
        for entry in snapshot.iter() {
            let still_present = self
                .listeners
                .load()
                .iter()
                .any(|current| current.handle == entry.handle);
            if still_present {
                (entry.listener)(&event);
            }
        }
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.load().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

trait CloneEntries {
    fn clone_entries(&self) -> Vec<Entry>;
}

impl CloneEntries for Vec<Entry> {
    fn clone_entries(&self) -> Vec<Entry> {
        self.iter()
            .map(|entry| Entry {
                handle: entry.handle,
                listener: entry.listener.clone(),
            })
            .collect()
    }
}
