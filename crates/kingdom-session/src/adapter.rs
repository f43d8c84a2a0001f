//! Remote session adapter.
//!
//! The adapter is what the UI layer holds for one session. It binds the
//! session id to its own metadata cache and subscription registry, routes
//! mutating operations through the shared task queue, and delegates game
//! rules to the engine collaborators.
//!
//! ## Write, then notify
//!
//! Every metadata setter writes the cache first and only then emits to
//! subscribers. A listener therefore never observes a key whose cache entry
//! has not been updated yet.
//!
//! ## Queue position
//!
//! The mutating operations are plain functions returning a future. They take
//! their place in the session queue when called, so two operations started in
//! a given order run in that order however their futures are later polled.

use crate::cache::ActionMetadataCache;
use crate::engine::EngineHandles;
use crate::error::SessionError;
use crate::queue::SessionTaskQueue;
use crate::subscriptions::{ActionMetadataSubscriptions, MetadataSubscription};
use kingdom_core::{
    ActionCosts, ActionEffectGroup, ActionOutcome, ActionParams, MetadataSnapshot,
    RequirementFailure, SessionConfig, SessionSnapshot, SimulationResult,
};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

/// Session-scoped facade over cache, subscriptions, queue and engine.
pub struct RemoteSessionAdapter {
    session_id: String,
    config: SessionConfig,
    cache: Arc<ActionMetadataCache>,
    subscriptions: ActionMetadataSubscriptions,
    queue: SessionTaskQueue,
    engine: EngineHandles,
    simulations: RwLock<SimulationCache>,
}

impl std::fmt::Debug for RemoteSessionAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSessionAdapter")
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct SimulationCache {
    /// Bumped whenever the cached results are replaced or dropped. A
    /// computation started under an older generation is not cached.
    generation: u64,
    /// Player id → last simulation.
    results: HashMap<String, SimulationResult>,
}

impl RemoteSessionAdapter {
    /// Create an adapter for `session_id`.
    ///
    /// `queue` is usually shared between all adapters of a registry; it keys
    /// work by session id, so sharing never serializes different sessions.
    pub fn new(
        session_id: impl Into<String>,
        engine: EngineHandles,
        queue: SessionTaskQueue,
        config: SessionConfig,
    ) -> Self {
        let cache = Arc::new(ActionMetadataCache::new());
        let reader_cache = Arc::clone(&cache);
        let subscriptions = ActionMetadataSubscriptions::new(Arc::new(move |action_id, params| {
            reader_cache.read_action_metadata(action_id, Some(params.as_value()))
        }));

        Self {
            session_id: session_id.into(),
            config,
            cache,
            subscriptions,
            queue,
            engine,
            simulations: RwLock::new(SimulationCache::default()),
        }
    }

    /// The session this adapter is bound to.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Current game state.
    ///
    /// Fails with [`SessionError::MissingSession`] when the session was torn
    /// down or never initialized.
    pub fn get_snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        self.engine
            .store
            .snapshot(&self.session_id)
            .ok_or_else(|| SessionError::missing(&self.session_id))
    }

    // Metadata reads

    /// Cached costs for `(action_id, params)`, empty when not loaded.
    pub fn get_action_costs(&self, action_id: &str, params: Option<&Value>) -> ActionCosts {
        self.cache.get_action_costs(action_id, params)
    }

    /// Cached requirement failures for `(action_id, params)`, empty when not loaded.
    pub fn get_action_requirements(
        &self,
        action_id: &str,
        params: Option<&Value>,
    ) -> Vec<RequirementFailure> {
        self.cache.get_action_requirements(action_id, params)
    }

    /// Cached option groups for `action_id`, empty when not loaded.
    pub fn get_action_options(&self, action_id: &str) -> Vec<ActionEffectGroup> {
        self.cache.get_action_options(action_id)
    }

    /// Everything cached for `(action_id, params)`; absent fields were never loaded.
    pub fn read_action_metadata(&self, action_id: &str, params: Option<&Value>) -> MetadataSnapshot {
        self.cache.read_action_metadata(action_id, params)
    }

    /// Register a listener for `(action_id, params)`; it is called once
    /// immediately and again after every change to that key.
    pub fn subscribe_action_metadata<F>(
        &self,
        action_id: &str,
        params: Option<&Value>,
        listener: F,
    ) -> MetadataSubscription
    where
        F: Fn(&MetadataSnapshot) + Send + Sync + 'static,
    {
        self.subscriptions.subscribe(action_id, params, listener)
    }

    // Metadata writes

    pub fn set_action_costs(&self, action_id: &str, costs: ActionCosts, params: Option<&Value>) {
        let key = self.cache.cache_action_costs(action_id, costs, params);
        self.subscriptions.emit_for_key(&key);
    }

    pub fn set_action_requirements(
        &self,
        action_id: &str,
        requirements: Vec<RequirementFailure>,
        params: Option<&Value>,
    ) {
        let key = self
            .cache
            .cache_action_requirements(action_id, requirements, params);
        self.subscriptions.emit_for_key(&key);
    }

    /// Option groups apply to every parameter variant of the action, so every
    /// subscriber of `action_id` is notified.
    pub fn set_action_options(&self, action_id: &str, groups: Vec<ActionEffectGroup>) {
        self.cache.cache_action_options(action_id, groups);
        self.subscriptions.emit_all(action_id);
    }

    /// Current cache epoch. A value fetched under this epoch can be stored
    /// with the `*_at` setters, which drop it if a reset happened meanwhile.
    pub fn metadata_epoch(&self) -> u64 {
        self.cache.epoch()
    }

    /// Store costs fetched under `epoch` and notify. Returns false, without
    /// notifying, when the metadata was reset since.
    pub fn set_action_costs_at(
        &self,
        epoch: u64,
        action_id: &str,
        costs: ActionCosts,
        params: Option<&Value>,
    ) -> bool {
        let Some(key) = self.cache.cache_action_costs_at(epoch, action_id, costs, params) else {
            return false;
        };
        self.subscriptions.emit_for_key(&key);
        true
    }

    /// Store requirement failures fetched under `epoch` and notify.
    pub fn set_action_requirements_at(
        &self,
        epoch: u64,
        action_id: &str,
        requirements: Vec<RequirementFailure>,
        params: Option<&Value>,
    ) -> bool {
        let Some(key) =
            self.cache
                .cache_action_requirements_at(epoch, action_id, requirements, params)
        else {
            return false;
        };
        self.subscriptions.emit_for_key(&key);
        true
    }

    /// Store option groups fetched under `epoch` and notify every variant.
    pub fn set_action_options_at(
        &self,
        epoch: u64,
        action_id: &str,
        groups: Vec<ActionEffectGroup>,
    ) -> bool {
        if self.cache.cache_action_options_at(epoch, action_id, groups).is_none() {
            return false;
        }
        self.subscriptions.emit_all(action_id);
        true
    }

    /// Drop all cached metadata and notify every key whose snapshot changed:
    /// each key that held a value, plus every subscribed variant of an action
    /// whose option groups were dropped.
    pub fn reset_action_metadata(&self) {
        let cleared = self.cache.clear();

        let mut seen = HashSet::new();
        let mut keys = Vec::new();
        let option_variants = cleared
            .option_actions
            .iter()
            .flat_map(|action_id| self.subscriptions.keys_for_action(action_id));
        for key in cleared.keys.into_iter().chain(option_variants) {
            if seen.insert(key.clone()) {
                keys.push(key);
            }
        }

        tracing::debug!(
            session_id = %self.session_id,
            keys = keys.len(),
            "Resetting action metadata"
        );
        for key in &keys {
            self.subscriptions.emit_for_key(key);
        }
    }

    // Serialized session work

    /// Run `task` after all work previously queued for this session.
    pub fn enqueue<F, T>(&self, task: F) -> impl Future<Output = T> + use<F, T>
    where
        F: Future<Output = T>,
    {
        self.queue.enqueue(&self.session_id, task)
    }

    /// Perform an action through the engine.
    pub fn perform_action<'a>(
        &'a self,
        action_id: &str,
        params: Option<&Value>,
    ) -> impl Future<Output = Result<ActionOutcome, SessionError>> + use<'a> {
        let action_id = action_id.to_string();
        let params = params.cloned().map(ActionParams::from).unwrap_or_default();

        self.enqueue(async move {
            tracing::info!(session_id = %self.session_id, action_id = %action_id, "Performing action");
            let outcome = self
                .engine
                .store
                .perform_action(&self.session_id, &action_id, &params)
                .await?;
            self.after_mutation();
            Ok(outcome)
        })
    }

    /// Move the session to its next phase.
    pub fn advance_phase(&self) -> impl Future<Output = Result<SessionSnapshot, SessionError>> {
        self.enqueue(async move {
            let snapshot = self.engine.advancer.advance_phase(&self.session_id).await?;
            tracing::info!(
                session_id = %self.session_id,
                turn = snapshot.turn,
                phase = %snapshot.phase,
                "Advanced phase"
            );
            self.after_mutation();
            Ok(snapshot)
        })
    }

    /// Toggle developer mode.
    pub fn set_dev_mode(
        &self,
        enabled: bool,
    ) -> impl Future<Output = Result<SessionSnapshot, SessionError>> {
        self.enqueue(async move {
            let snapshot = self
                .engine
                .store
                .set_dev_mode(&self.session_id, enabled)
                .await?;
            tracing::info!(session_id = %self.session_id, enabled, "Set dev mode");
            self.after_mutation();
            Ok(snapshot)
        })
    }

    /// Let the AI play for `player_id`. Resolves to whether it acted.
    pub fn run_ai_turn<'a>(
        &'a self,
        player_id: &str,
    ) -> impl Future<Output = Result<bool, SessionError>> + use<'a> {
        let player_id = player_id.to_string();

        self.enqueue(async move {
            let acted = self
                .engine
                .ai
                .run_ai_turn(&self.session_id, &player_id)
                .await?;
            tracing::info!(session_id = %self.session_id, player_id = %player_id, acted, "Ran AI turn");
            if acted {
                self.after_mutation();
            }
            Ok(acted)
        })
    }

    // Simulation

    /// Projection of the next phases for `player_id`, served from the
    /// simulation cache when available.
    ///
    /// A result whose computation overlapped a mutation is returned to the
    /// caller but not cached.
    pub async fn simulate_upcoming_phases(
        &self,
        player_id: &str,
    ) -> Result<SimulationResult, SessionError> {
        let generation = {
            let simulations = self.simulations.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(cached) = simulations.results.get(player_id) {
                return Ok(cached.clone());
            }
            simulations.generation
        };

        let result = self
            .engine
            .simulator
            .simulate_upcoming_phases(&self.session_id, player_id)
            .await?;

        let mut simulations = self.simulations.write().unwrap_or_else(PoisonError::into_inner);
        if simulations.generation == generation {
            simulations
                .results
                .insert(player_id.to_string(), result.clone());
        } else {
            tracing::debug!(
                session_id = %self.session_id,
                player_id,
                "Discarding simulation computed before the last change"
            );
        }
        Ok(result)
    }

    /// Store a simulation computed elsewhere.
    pub fn cache_simulation(&self, player_id: &str, result: SimulationResult) {
        let mut simulations = self.simulations.write().unwrap_or_else(PoisonError::into_inner);
        simulations.generation += 1;
        simulations.results.insert(player_id.to_string(), result);
    }

    /// Forget every cached simulation.
    pub fn clear_simulations(&self) {
        let mut simulations = self.simulations.write().unwrap_or_else(PoisonError::into_inner);
        simulations.generation += 1;
        simulations.results.clear();
    }

    fn after_mutation(&self) {
        if self.config.reset_metadata_on_mutation {
            self.clear_simulations();
            self.reset_action_metadata();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::PhaseSimulator;
    use crate::memory::InMemoryEngine;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    fn adapter_with(config: SessionConfig) -> (Arc<InMemoryEngine>, RemoteSessionAdapter) {
        let engine = Arc::new(InMemoryEngine::default());
        engine.create_session("s-1");
        let adapter = RemoteSessionAdapter::new(
            "s-1",
            EngineHandles::from_engine(Arc::clone(&engine)),
            SessionTaskQueue::new(),
            config,
        );
        (engine, adapter)
    }

    fn adapter() -> (Arc<InMemoryEngine>, RemoteSessionAdapter) {
        adapter_with(SessionConfig::default())
    }

    fn gold(amount: f64) -> ActionCosts {
        [("gold".to_string(), amount)].into_iter().collect()
    }

    #[test]
    fn test_get_snapshot_missing_session() {
        let (engine, adapter) = adapter();
        assert_eq!(adapter.get_snapshot().unwrap().turn, 1);

        engine.remove_session("s-1");
        let err = adapter.get_snapshot().unwrap_err();
        assert!(err.is_missing_session());
    }

    #[test]
    fn test_listener_sees_new_value_on_write() {
        let (_engine, adapter) = adapter();
        let params = json!({"landId": "L1"});
        adapter.set_action_costs("build", gold(1.0), Some(&params));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = adapter.subscribe_action_metadata("build", Some(&params), move |snapshot| {
            sink.lock().unwrap().push(snapshot.costs.clone());
        });

        adapter.set_action_costs("build", gold(2.0), Some(&params));

        assert_eq!(
            *seen.lock().unwrap(),
            vec![Some(gold(1.0)), Some(gold(2.0))]
        );
    }

    #[test]
    fn test_set_options_notifies_every_variant() {
        let (_engine, adapter) = adapter();
        let counts = Arc::new(Mutex::new(0usize));

        let c1 = Arc::clone(&counts);
        let _a = adapter.subscribe_action_metadata("build", Some(&json!({"landId": "L1"})), move |_| {
            *c1.lock().unwrap() += 1;
        });
        let c2 = Arc::clone(&counts);
        let _b = adapter.subscribe_action_metadata("build", Some(&json!({"landId": "L2"})), move |_| {
            *c2.lock().unwrap() += 1;
        });

        adapter.set_action_options("build", Vec::new());
        assert_eq!(*counts.lock().unwrap(), 4);
        assert_eq!(
            adapter.read_action_metadata("build", Some(&json!({"landId": "L2"}))).groups,
            Some(Vec::new())
        );
    }

    #[tokio::test]
    async fn test_mutation_resets_metadata() {
        let (_engine, adapter) = adapter();
        adapter.set_action_costs("build", gold(3.0), None);

        let outcome = adapter.perform_action("build", None).await.unwrap();
        assert_eq!(outcome.snapshot.action_log, vec!["build"]);
        assert!(adapter.read_action_metadata("build", None).is_empty());
    }

    #[tokio::test]
    async fn test_mutation_keeps_metadata_when_disabled() {
        let (_engine, adapter) = adapter_with(SessionConfig {
            reset_metadata_on_mutation: false,
            ..Default::default()
        });
        adapter.set_action_costs("build", gold(3.0), None);

        adapter.advance_phase().await.unwrap();
        assert_eq!(adapter.get_action_costs("build", None), gold(3.0));
    }

    #[tokio::test]
    async fn test_rejected_action_propagates() {
        let (engine, adapter) = adapter();
        engine.block_action("raid", "at peace");
        adapter.set_action_costs("raid", gold(3.0), None);

        let err = adapter.perform_action("raid", None).await.unwrap_err();
        assert!(matches!(err, SessionError::ActionRejected { .. }));
        // Nothing changed, so the cache is untouched.
        assert_eq!(adapter.get_action_costs("raid", None), gold(3.0));
    }

    #[tokio::test]
    async fn test_simulation_is_cached_until_mutation() {
        let (_engine, adapter) = adapter();

        let first = adapter.simulate_upcoming_phases("player-1").await.unwrap();
        let second = adapter.simulate_upcoming_phases("player-1").await.unwrap();
        assert_eq!(first, second);

        adapter.set_dev_mode(true).await.unwrap();
        let third = adapter.simulate_upcoming_phases("player-1").await.unwrap();
        assert!(third.computed_at >= first.computed_at);
        assert!(adapter.get_snapshot().unwrap().dev_mode);
    }

    #[tokio::test]
    async fn test_cache_simulation_is_served() {
        let (_engine, adapter) = adapter();
        let injected = SimulationResult {
            player_id: "player-2".to_string(),
            phases: Vec::new(),
            computed_at: chrono::Utc::now(),
        };
        adapter.cache_simulation("player-2", injected.clone());

        let served = adapter.simulate_upcoming_phases("player-2").await.unwrap();
        assert_eq!(served, injected);
    }

    #[tokio::test]
    async fn test_ai_turn_that_does_nothing_keeps_metadata() {
        let (_engine, adapter) = adapter();
        adapter.set_action_costs("build", gold(3.0), None);

        assert!(!adapter.run_ai_turn("ghost").await.unwrap());
        assert_eq!(adapter.get_action_costs("build", None), gold(3.0));

        assert!(adapter.run_ai_turn("player-1").await.unwrap());
        assert!(adapter.get_action_costs("build", None).is_empty());
    }

    #[test]
    fn test_reset_notifies_variants_that_saw_options() {
        let (_engine, adapter) = adapter();
        let params = json!({"landId": "L1"});

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = adapter.subscribe_action_metadata("build", Some(&params), move |snapshot| {
            sink.lock().unwrap().push(snapshot.groups.clone());
        });

        adapter.set_action_options("build", Vec::new());
        adapter.reset_action_metadata();

        assert_eq!(*seen.lock().unwrap(), vec![None, Some(Vec::new()), None]);
    }

    #[test]
    fn test_stale_epoch_write_is_dropped_silently() {
        let (_engine, adapter) = adapter();
        let calls = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&calls);
        let _sub = adapter.subscribe_action_metadata("build", None, move |_| {
            *counter.lock().unwrap() += 1;
        });

        let epoch = adapter.metadata_epoch();
        adapter.reset_action_metadata();
        assert!(!adapter.set_action_costs_at(epoch, "build", gold(2.0), None));
        assert!(!adapter.set_action_options_at(epoch, "build", Vec::new()));
        assert!(adapter.read_action_metadata("build", None).is_empty());
        assert_eq!(*calls.lock().unwrap(), 1);

        assert!(adapter.set_action_costs_at(adapter.metadata_epoch(), "build", gold(2.0), None));
        assert_eq!(*calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_mutations_run_in_call_order() {
        let (_engine, adapter) = adapter();

        let advance = adapter.advance_phase();
        let act = adapter.perform_action("build", None);
        let (outcome, advanced) = tokio::join!(act, advance);

        assert_eq!(outcome.unwrap().snapshot.phase, "upkeep");
        assert!(advanced.unwrap().action_log.is_empty());
    }

    /// Computes immediately, then takes a while to answer.
    struct SlowSimulator(Arc<InMemoryEngine>);

    #[async_trait]
    impl PhaseSimulator for SlowSimulator {
        async fn simulate_upcoming_phases(
            &self,
            session_id: &str,
            player_id: &str,
        ) -> Result<SimulationResult, SessionError> {
            let result = self.0.simulate_upcoming_phases(session_id, player_id).await;
            tokio::time::sleep(Duration::from_millis(50)).await;
            result
        }
    }

    #[tokio::test]
    async fn test_simulation_overlapping_mutation_is_not_cached() {
        let engine = Arc::new(InMemoryEngine::default());
        engine.create_session("s-1");
        let handles = EngineHandles {
            simulator: Arc::new(SlowSimulator(Arc::clone(&engine))),
            ..EngineHandles::from_engine(Arc::clone(&engine))
        };
        let adapter = RemoteSessionAdapter::new(
            "s-1",
            handles,
            SessionTaskQueue::new(),
            SessionConfig::default(),
        );

        let (stale, advanced) = tokio::join!(adapter.simulate_upcoming_phases("player-1"), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            adapter.advance_phase().await
        });
        assert_eq!(stale.unwrap().phases[0].phase, "upkeep");
        assert_eq!(advanced.unwrap().phase, "upkeep");

        let fresh = adapter.simulate_upcoming_phases("player-1").await.unwrap();
        assert_eq!(fresh.phases[0].phase, "main");
    }
}
