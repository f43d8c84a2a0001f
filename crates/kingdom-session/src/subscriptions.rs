//! Key-scoped listeners for action metadata.
//!
//! Listeners register for one `(action id, params)` pair and receive a fresh
//! [`MetadataSnapshot`] whenever the owner emits for that key. The registry
//! never caches snapshots itself; it reads them through the reader it was
//! built with, so a notification always reflects the cache at emit time.
//!
//! ## Re-entrancy
//!
//! No lock is held while a listener runs. Listeners may subscribe or
//! unsubscribe from inside a callback:
//!
//! - a listener unsubscribed during an emission is not invoked later in that
//!   emission
//! - a listener added during an emission is not part of it (it already got
//!   its immediate snapshot on subscribe)
//!
//! A panicking listener is logged and skipped; the remaining listeners are
//! still notified.

use kingdom_core::{ActionParams, MetadataKey, MetadataSnapshot, create_metadata_key};
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Callback invoked with the current snapshot for a key.
pub type MetadataListener = Arc<dyn Fn(&MetadataSnapshot) + Send + Sync>;

/// Reads the current snapshot for an `(action id, params)` pair.
pub type MetadataReader = Arc<dyn Fn(&str, &ActionParams) -> MetadataSnapshot + Send + Sync>;

type ListenerId = u64;

struct SubscriptionTarget {
    action_id: String,
    params: ActionParams,
}

#[derive(Default)]
struct SubscriptionState {
    next_id: ListenerId,
    /// Listeners per key in registration order. A key is present only while
    /// it has at least one listener.
    listeners: HashMap<MetadataKey, Vec<(ListenerId, MetadataListener)>>,
    /// What to read when emitting for a key. Same key set as `listeners`.
    targets: HashMap<MetadataKey, SubscriptionTarget>,
}

impl SubscriptionState {
    fn contains(&self, key: &MetadataKey, id: ListenerId) -> bool {
        self.listeners
            .get(key)
            .is_some_and(|list| list.iter().any(|(lid, _)| *lid == id))
    }

    fn remove(&mut self, key: &MetadataKey, id: ListenerId) -> bool {
        let Some(list) = self.listeners.get_mut(key) else {
            return false;
        };
        let before = list.len();
        list.retain(|(lid, _)| *lid != id);
        let removed = list.len() != before;

        if list.is_empty() {
            self.listeners.remove(key);
            self.targets.remove(key);
        }
        removed
    }
}

fn lock(state: &Mutex<SubscriptionState>) -> MutexGuard<'_, SubscriptionState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Registry of metadata listeners for one session.
pub struct ActionMetadataSubscriptions {
    state: Arc<Mutex<SubscriptionState>>,
    reader: MetadataReader,
}

impl ActionMetadataSubscriptions {
    /// Create a registry that reads snapshots through `reader`.
    pub fn new(reader: MetadataReader) -> Self {
        Self {
            state: Arc::new(Mutex::new(SubscriptionState::default())),
            reader,
        }
    }

    /// Register `listener` for `(action_id, params)`.
    ///
    /// The listener is invoked once, synchronously, with the current snapshot
    /// before this returns. Dropping the returned handle unsubscribes.
    pub fn subscribe<F>(
        &self,
        action_id: &str,
        params: Option<&Value>,
        listener: F,
    ) -> MetadataSubscription
    where
        F: Fn(&MetadataSnapshot) + Send + Sync + 'static,
    {
        let key = create_metadata_key(action_id, params);
        let params = params.cloned().map(ActionParams::from).unwrap_or_default();
        let listener: MetadataListener = Arc::new(listener);

        let id = {
            let mut state = lock(&self.state);
            let id = state.next_id;
            state.next_id += 1;

            state
                .targets
                .entry(key.clone())
                .or_insert_with(|| SubscriptionTarget {
                    action_id: action_id.to_string(),
                    params: params.clone(),
                });
            state
                .listeners
                .entry(key.clone())
                .or_default()
                .push((id, Arc::clone(&listener)));
            id
        };

        tracing::debug!(key = %key, listener = id, "Subscribed to action metadata");

        let snapshot = (self.reader)(action_id, &params);
        invoke(&key, &listener, &snapshot);

        MetadataSubscription {
            state: Arc::downgrade(&self.state),
            key,
            id,
            active: true,
        }
    }

    /// Notify every listener registered for `key`. No-op for unknown keys.
    pub fn emit_for_key(&self, key: &MetadataKey) {
        let (action_id, params, listeners) = {
            let state = lock(&self.state);
            let (Some(target), Some(list)) = (state.targets.get(key), state.listeners.get(key))
            else {
                return;
            };
            (
                target.action_id.clone(),
                target.params.clone(),
                list.clone(),
            )
        };

        let snapshot = (self.reader)(&action_id, &params);
        tracing::debug!(key = %key, listeners = listeners.len(), "Emitting action metadata");

        for (id, listener) in listeners {
            if !lock(&self.state).contains(key, id) {
                continue;
            }
            invoke(key, &listener, &snapshot);
        }
    }

    /// Notify listeners of every parameter variant of `action_id`.
    pub fn emit_all(&self, action_id: &str) {
        for key in self.keys_for_action(action_id) {
            self.emit_for_key(&key);
        }
    }

    /// Subscribed keys of every parameter variant of `action_id`.
    pub fn keys_for_action(&self, action_id: &str) -> Vec<MetadataKey> {
        lock(&self.state)
            .targets
            .iter()
            .filter(|(_, target)| target.action_id == action_id)
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Number of listeners registered for `key`.
    pub fn listener_count(&self, key: &MetadataKey) -> usize {
        lock(&self.state).listeners.get(key).map_or(0, Vec::len)
    }

    /// Keys that currently have at least one listener.
    pub fn active_keys(&self) -> Vec<MetadataKey> {
        lock(&self.state).listeners.keys().cloned().collect()
    }
}

fn invoke(key: &MetadataKey, listener: &MetadataListener, snapshot: &MetadataSnapshot) {
    if catch_unwind(AssertUnwindSafe(|| listener(snapshot))).is_err() {
        tracing::warn!(key = %key, "Action metadata listener panicked");
    }
}

/// Handle for one registered listener.
///
/// Unsubscribes when dropped or when [`MetadataSubscription::unsubscribe`]
/// is called.
#[must_use = "dropping the subscription unsubscribes the listener"]
pub struct MetadataSubscription {
    state: Weak<Mutex<SubscriptionState>>,
    key: MetadataKey,
    id: ListenerId,
    active: bool,
}

impl MetadataSubscription {
    /// Key this listener is registered for.
    pub fn key(&self) -> &MetadataKey {
        &self.key
    }

    /// Remove the listener. Removing the last listener for a key drops the
    /// key from the registry.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;

        // Registry already gone: nothing left to clean up.
        let Some(state) = self.state.upgrade() else {
            return;
        };
        if lock(&state).remove(&self.key, self.id) {
            tracing::debug!(key = %self.key, listener = self.id, "Unsubscribed from action metadata");
        }
    }
}

impl Drop for MetadataSubscription {
    fn drop(&mut self) {
        self.release();
    }
}
