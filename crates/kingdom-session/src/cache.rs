//! Per-session action metadata cache.
//!
//! Three independent stores hold costs, requirement failures and option
//! groups. Costs and requirements vary with action parameters and are keyed
//! by the full `(action id, params)` key; option groups describe the
//! sub-choices of an action as a whole and are keyed by action id only.
//!
//! The cache owns its values: writes take ownership of the payload and reads
//! hand out clones, so callers can never alias cached state.

use kingdom_core::{
    ActionCosts, ActionEffectGroup, MetadataKey, MetadataSnapshot, RequirementFailure,
    create_metadata_key,
};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

struct OptionsEntry {
    action_id: String,
    groups: Vec<ActionEffectGroup>,
}

#[derive(Default)]
struct CacheStores {
    /// Bumped by every `clear`.
    epoch: u64,
    costs: HashMap<MetadataKey, ActionCosts>,
    requirements: HashMap<MetadataKey, Vec<RequirementFailure>>,
    options: HashMap<MetadataKey, OptionsEntry>,
}

/// What a [`ActionMetadataCache::clear`] removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClearedMetadata {
    /// Every key that held a value in any store, without duplicates.
    pub keys: Vec<MetadataKey>,
    /// Actions whose option groups were removed. Option groups are visible
    /// from every parameter variant of their action.
    pub option_actions: Vec<String>,
}

impl ClearedMetadata {
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Key → metadata store for a single session.
#[derive(Default)]
pub struct ActionMetadataCache {
    stores: RwLock<CacheStores>,
}

impl ActionMetadataCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock cannot leave a map half-written, so a
    // poisoned lock is still safe to use.
    fn read(&self) -> RwLockReadGuard<'_, CacheStores> {
        self.stores.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheStores> {
        self.stores.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current clear count. Pass it to the `*_at` writers to drop a value
    /// that was fetched before the cache was last cleared.
    pub fn epoch(&self) -> u64 {
        self.read().epoch
    }

    /// Write under the lock unless the cache has been cleared since `epoch`.
    fn store(
        &self,
        epoch: u64,
        key: MetadataKey,
        insert: impl FnOnce(&mut CacheStores, MetadataKey),
    ) -> Option<MetadataKey> {
        let mut stores = self.write();
        if epoch != stores.epoch {
            tracing::debug!(key = %key, "Dropping metadata fetched before the last clear");
            return None;
        }
        insert(&mut *stores, key.clone());
        Some(key)
    }

    /// Store costs for `(action_id, params)` and return the key written.
    pub fn cache_action_costs(
        &self,
        action_id: &str,
        costs: ActionCosts,
        params: Option<&Value>,
    ) -> MetadataKey {
        let key = create_metadata_key(action_id, params);
        tracing::debug!(key = %key, resources = costs.len(), "Caching action costs");
        self.write().costs.insert(key.clone(), costs);
        key
    }

    /// Store costs only if the cache has not been cleared since `epoch`.
    pub fn cache_action_costs_at(
        &self,
        epoch: u64,
        action_id: &str,
        costs: ActionCosts,
        params: Option<&Value>,
    ) -> Option<MetadataKey> {
        let key = create_metadata_key(action_id, params);
        self.store(epoch, key, |stores, key| {
            stores.costs.insert(key, costs);
        })
    }

    /// Store requirement failures for `(action_id, params)` and return the key written.
    pub fn cache_action_requirements(
        &self,
        action_id: &str,
        requirements: Vec<RequirementFailure>,
        params: Option<&Value>,
    ) -> MetadataKey {
        let key = create_metadata_key(action_id, params);
        tracing::debug!(key = %key, failures = requirements.len(), "Caching action requirements");
        self.write().requirements.insert(key.clone(), requirements);
        key
    }

    /// Store requirement failures only if the cache has not been cleared since `epoch`.
    pub fn cache_action_requirements_at(
        &self,
        epoch: u64,
        action_id: &str,
        requirements: Vec<RequirementFailure>,
        params: Option<&Value>,
    ) -> Option<MetadataKey> {
        let key = create_metadata_key(action_id, params);
        self.store(epoch, key, |stores, key| {
            stores.requirements.insert(key, requirements);
        })
    }

    /// Store option groups for `action_id` and return the key written.
    pub fn cache_action_options(
        &self,
        action_id: &str,
        groups: Vec<ActionEffectGroup>,
    ) -> MetadataKey {
        tracing::debug!(action_id, groups = groups.len(), "Caching action options");
        let key = create_metadata_key(action_id, None);
        self.write().options.insert(
            key.clone(),
            OptionsEntry {
                action_id: action_id.to_string(),
                groups,
            },
        );
        key
    }

    /// Store option groups only if the cache has not been cleared since `epoch`.
    pub fn cache_action_options_at(
        &self,
        epoch: u64,
        action_id: &str,
        groups: Vec<ActionEffectGroup>,
    ) -> Option<MetadataKey> {
        let key = create_metadata_key(action_id, None);
        self.store(epoch, key, |stores, key| {
            let entry = OptionsEntry {
                action_id: action_id.to_string(),
                groups,
            };
            stores.options.insert(key, entry);
        })
    }

    /// Cached costs, or an empty map when nothing is cached.
    pub fn get_action_costs(&self, action_id: &str, params: Option<&Value>) -> ActionCosts {
        let key = create_metadata_key(action_id, params);
        self.read().costs.get(&key).cloned().unwrap_or_default()
    }

    /// Cached requirement failures, or an empty list when nothing is cached.
    pub fn get_action_requirements(
        &self,
        action_id: &str,
        params: Option<&Value>,
    ) -> Vec<RequirementFailure> {
        let key = create_metadata_key(action_id, params);
        self.read().requirements.get(&key).cloned().unwrap_or_default()
    }

    /// Cached option groups, or an empty list when nothing is cached.
    pub fn get_action_options(&self, action_id: &str) -> Vec<ActionEffectGroup> {
        let key = create_metadata_key(action_id, None);
        self.read()
            .options
            .get(&key)
            .map(|entry| entry.groups.clone())
            .unwrap_or_default()
    }

    /// Assemble a snapshot from all three stores.
    ///
    /// Each field is present only when its store has an entry, which keeps
    /// "not loaded" distinguishable from "loaded and empty".
    pub fn read_action_metadata(&self, action_id: &str, params: Option<&Value>) -> MetadataSnapshot {
        let key = create_metadata_key(action_id, params);
        let options_key = create_metadata_key(action_id, None);
        let stores = self.read();

        MetadataSnapshot {
            costs: stores.costs.get(&key).cloned(),
            requirements: stores.requirements.get(&key).cloned(),
            groups: stores.options.get(&options_key).map(|entry| entry.groups.clone()),
        }
    }

    /// Empty every store and advance the epoch.
    ///
    /// Reports each key that held a value in any store just before clearing,
    /// plus the actions whose option groups were dropped, so callers can
    /// notify every affected subscription.
    pub fn clear(&self) -> ClearedMetadata {
        let mut guard = self.write();
        let stores = &mut *guard;
        stores.epoch += 1;

        let mut option_actions = Vec::new();
        let mut drained: Vec<MetadataKey> = stores
            .costs
            .drain()
            .map(|(k, _)| k)
            .chain(stores.requirements.drain().map(|(k, _)| k))
            .collect();
        for (key, entry) in stores.options.drain() {
            option_actions.push(entry.action_id);
            drained.push(key);
        }

        let mut seen = HashSet::new();
        let keys: Vec<MetadataKey> = drained
            .into_iter()
            .filter(|key| seen.insert(key.clone()))
            .collect();

        tracing::debug!(
            keys = keys.len(),
            option_actions = option_actions.len(),
            epoch = stores.epoch,
            "Cleared action metadata cache"
        );
        ClearedMetadata {
            keys,
            option_actions,
        }
    }

    /// Total number of cached entries across all stores.
    pub fn len(&self) -> usize {
        let stores = self.read();
        stores.costs.len() + stores.requirements.len() + stores.options.len()
    }

    /// True when no store holds an entry.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kingdom_core::{ActionEffectGroupOption, ActionParams, Requirement};
    use serde_json::json;

    fn costs(entries: &[(&str, f64)]) -> ActionCosts {
        entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn failure(message: &str) -> RequirementFailure {
        RequirementFailure {
            requirement: Requirement {
                kind: "resource.at_least".to_string(),
                params: json!({"resource": "gold", "amount": 5}),
            },
            message: message.to_string(),
        }
    }

    fn group(id: &str) -> ActionEffectGroup {
        ActionEffectGroup {
            id: id.to_string(),
            title: None,
            options: vec![ActionEffectGroupOption {
                id: "farm".to_string(),
                label: Some("Farm".to_string()),
                action_id: "build_farm".to_string(),
                params: ActionParams::empty(),
            }],
        }
    }

    #[test]
    fn test_miss_returns_defaults() {
        let cache = ActionMetadataCache::new();
        assert!(cache.get_action_costs("build", None).is_empty());
        assert!(cache.get_action_requirements("build", None).is_empty());
        assert!(cache.get_action_options("build").is_empty());
        assert!(cache.read_action_metadata("build", None).is_empty());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cache_returns_key_for_notification() {
        let cache = ActionMetadataCache::new();
        let params = json!({"landId": "L1"});

        let key = cache.cache_action_costs("build", costs(&[("gold", 3.0)]), Some(&params));
        assert_eq!(key, create_metadata_key("build", Some(&params)));

        let options_key = cache.cache_action_options("build", vec![group("target")]);
        assert_eq!(options_key.as_str(), "build:{}");
    }

    #[test]
    fn test_clone_isolation() {
        let cache = ActionMetadataCache::new();
        let mut input = costs(&[("gold", 5.0)]);
        cache.cache_action_costs("a", input.clone(), None);

        input.insert("gold".to_string(), 99.0);
        assert_eq!(cache.get_action_costs("a", None), costs(&[("gold", 5.0)]));

        let mut returned = cache.get_action_costs("a", None);
        returned.insert("wood".to_string(), 1.0);
        assert_eq!(cache.get_action_costs("a", None), costs(&[("gold", 5.0)]));
    }

    #[test]
    fn test_snapshot_field_independence() {
        let cache = ActionMetadataCache::new();
        let params = json!({"landId": "L1"});
        cache.cache_action_costs("build", costs(&[("gold", 3.0)]), Some(&params));

        let snapshot = cache.read_action_metadata("build", Some(&params));
        assert_eq!(snapshot.costs, Some(costs(&[("gold", 3.0)])));
        assert_eq!(snapshot.requirements, None);
        assert_eq!(snapshot.groups, None);
        assert_eq!(
            serde_json::to_value(&snapshot).unwrap(),
            json!({"costs": {"gold": 3.0}})
        );
    }

    #[test]
    fn test_loaded_empty_is_present() {
        let cache = ActionMetadataCache::new();
        cache.cache_action_requirements("build", Vec::new(), None);

        let snapshot = cache.read_action_metadata("build", None);
        assert_eq!(snapshot.requirements, Some(Vec::new()));
    }

    #[test]
    fn test_options_ignore_params() {
        let cache = ActionMetadataCache::new();
        cache.cache_action_options("build", vec![group("target")]);

        let l1 = cache.read_action_metadata("build", Some(&json!({"landId": "L1"})));
        let l2 = cache.read_action_metadata("build", Some(&json!({"landId": "L2"})));
        assert_eq!(l1.groups, Some(vec![group("target")]));
        assert_eq!(l1.groups, l2.groups);
        assert_eq!(l1.costs, None);
    }

    #[test]
    fn test_params_scope_costs() {
        let cache = ActionMetadataCache::new();
        let l1 = json!({"landId": "L1"});
        let l2 = json!({"landId": "L2"});
        cache.cache_action_costs("build", costs(&[("gold", 3.0)]), Some(&l1));
        cache.cache_action_costs("build", costs(&[("gold", 7.0)]), Some(&l2));

        assert_eq!(cache.get_action_costs("build", Some(&l1)), costs(&[("gold", 3.0)]));
        assert_eq!(cache.get_action_costs("build", Some(&l2)), costs(&[("gold", 7.0)]));
        assert!(cache.get_action_costs("build", None).is_empty());
    }

    #[test]
    fn test_clear_returns_deduplicated_keys() {
        let cache = ActionMetadataCache::new();
        let params = json!({"landId": "L1"});
        cache.cache_action_costs("build", costs(&[("gold", 3.0)]), Some(&params));
        cache.cache_action_requirements("build", vec![failure("Need gold")], Some(&params));
        cache.cache_action_costs("build", costs(&[("gold", 1.0)]), None);
        cache.cache_action_options("build", vec![group("target")]);

        let cleared = cache.clear();
        let mut keys = cleared.keys;
        keys.sort();

        let mut expected = vec![
            create_metadata_key("build", Some(&params)),
            create_metadata_key("build", None),
        ];
        expected.sort();
        assert_eq!(keys, expected);
        assert_eq!(cleared.option_actions, vec!["build".to_string()]);
        assert!(cache.is_empty());
        assert!(cache.read_action_metadata("build", Some(&params)).is_empty());
    }

    #[test]
    fn test_write_at_stale_epoch_is_dropped() {
        let cache = ActionMetadataCache::new();
        let before = cache.epoch();
        cache.clear();

        assert_eq!(cache.cache_action_costs_at(before, "build", costs(&[("gold", 3.0)]), None), None);
        assert_eq!(cache.cache_action_options_at(before, "build", vec![group("target")]), None);
        assert!(cache.is_empty());

        let current = cache.epoch();
        let key = cache.cache_action_requirements_at(current, "build", vec![failure("Need gold")], None);
        assert_eq!(key, Some(create_metadata_key("build", None)));
        assert_eq!(cache.get_action_requirements("build", None).len(), 1);
    }

    #[test]
    fn test_clear_on_empty_cache() {
        let cache = ActionMetadataCache::new();
        let cleared = cache.clear();
        assert!(cleared.is_empty());
        assert!(cleared.option_actions.is_empty());
    }
}
