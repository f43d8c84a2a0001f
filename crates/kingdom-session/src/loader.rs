//! Fetch action metadata and write it into a session adapter.
//!
//! Two requests for the same metadata may overlap, and the older one can
//! resolve last. Calling a `load_*` method takes a generation number for its
//! `(kind, key)` and the adapter's metadata epoch; when the fetch resolves,
//! the result is written only if no newer load for the same `(kind, key)`
//! has been started and the metadata has not been reset since. Anything else
//! is discarded and reported as [`LoadOutcome::Superseded`].
//!
//! Both are taken when the method is called, not when its future is first
//! polled. Cancelling a load is done by dropping its future.

use crate::adapter::RemoteSessionAdapter;
use crate::error::SessionError;
use async_trait::async_trait;
use kingdom_core::{
    ActionCosts, ActionEffectGroup, ActionParams, MetadataKey, MetadataKind, RequirementFailure,
    create_metadata_key,
};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Where metadata comes from, typically the HTTP client of the game server.
#[async_trait]
pub trait ActionMetadataSource: Send + Sync {
    async fn fetch_costs(
        &self,
        session_id: &str,
        action_id: &str,
        params: &ActionParams,
    ) -> Result<ActionCosts, SessionError>;

    async fn fetch_requirements(
        &self,
        session_id: &str,
        action_id: &str,
        params: &ActionParams,
    ) -> Result<Vec<RequirementFailure>, SessionError>;

    async fn fetch_options(
        &self,
        session_id: &str,
        action_id: &str,
    ) -> Result<Vec<ActionEffectGroup>, SessionError>;
}

/// Result of a load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The fetched value was written under this key.
    Applied(MetadataKey),
    /// A newer load for the same metadata was started, or the metadata was
    /// reset, before the response arrived; the value was dropped.
    Superseded,
}

#[derive(Default)]
struct LoadState {
    next_generation: u64,
    /// Latest generation per `(kind, key)` with a load in flight.
    latest: HashMap<(MetadataKind, MetadataKey), u64>,
}

/// Loads metadata for one adapter, discarding stale responses.
pub struct ActionMetadataLoader {
    adapter: Arc<RemoteSessionAdapter>,
    source: Arc<dyn ActionMetadataSource>,
    state: Mutex<LoadState>,
}

impl ActionMetadataLoader {
    pub fn new(adapter: Arc<RemoteSessionAdapter>, source: Arc<dyn ActionMetadataSource>) -> Self {
        Self {
            adapter,
            source,
            state: Mutex::new(LoadState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LoadState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin(&self, kind: MetadataKind, key: MetadataKey) -> LoadTicket<'_> {
        let generation = {
            let mut state = self.lock();
            state.next_generation += 1;
            let generation = state.next_generation;
            state.latest.insert((kind, key.clone()), generation);
            generation
        };

        LoadTicket {
            loader: self,
            kind,
            key,
            generation,
            epoch: self.adapter.metadata_epoch(),
        }
    }

    /// Number of `(kind, key)` pairs with a load in flight.
    pub fn pending_loads(&self) -> usize {
        self.lock().latest.len()
    }

    fn superseded(&self, ticket: &LoadTicket<'_>) -> LoadOutcome {
        tracing::warn!(
            session_id = self.adapter.session_id(),
            kind = %ticket.kind,
            key = %ticket.key,
            "Discarding superseded metadata response"
        );
        LoadOutcome::Superseded
    }

    /// Fetch and cache costs for `(action_id, params)`.
    pub fn load_costs<'a>(
        &'a self,
        action_id: &str,
        params: Option<&Value>,
    ) -> impl Future<Output = Result<LoadOutcome, SessionError>> + use<'a> {
        let action_id = action_id.to_string();
        let params = params.cloned();
        let ticket = self.begin(
            MetadataKind::Costs,
            create_metadata_key(&action_id, params.as_ref()),
        );

        async move {
            let request = params.clone().map(ActionParams::from).unwrap_or_default();
            let costs = self
                .source
                .fetch_costs(self.adapter.session_id(), &action_id, &request)
                .await?;

            if !ticket.is_current()
                || !self
                    .adapter
                    .set_action_costs_at(ticket.epoch, &action_id, costs, params.as_ref())
            {
                return Ok(self.superseded(&ticket));
            }
            Ok(LoadOutcome::Applied(ticket.key.clone()))
        }
    }

    /// Fetch and cache requirement failures for `(action_id, params)`.
    pub fn load_requirements<'a>(
        &'a self,
        action_id: &str,
        params: Option<&Value>,
    ) -> impl Future<Output = Result<LoadOutcome, SessionError>> + use<'a> {
        let action_id = action_id.to_string();
        let params = params.cloned();
        let ticket = self.begin(
            MetadataKind::Requirements,
            create_metadata_key(&action_id, params.as_ref()),
        );

        async move {
            let request = params.clone().map(ActionParams::from).unwrap_or_default();
            let requirements = self
                .source
                .fetch_requirements(self.adapter.session_id(), &action_id, &request)
                .await?;

            if !ticket.is_current()
                || !self.adapter.set_action_requirements_at(
                    ticket.epoch,
                    &action_id,
                    requirements,
                    params.as_ref(),
                )
            {
                return Ok(self.superseded(&ticket));
            }
            Ok(LoadOutcome::Applied(ticket.key.clone()))
        }
    }

    /// Fetch and cache option groups for `action_id`.
    pub fn load_options<'a>(
        &'a self,
        action_id: &str,
    ) -> impl Future<Output = Result<LoadOutcome, SessionError>> + use<'a> {
        let action_id = action_id.to_string();
        let ticket = self.begin(MetadataKind::Options, create_metadata_key(&action_id, None));

        async move {
            let groups = self
                .source
                .fetch_options(self.adapter.session_id(), &action_id)
                .await?;

            if !ticket.is_current()
                || !self
                    .adapter
                    .set_action_options_at(ticket.epoch, &action_id, groups)
            {
                return Ok(self.superseded(&ticket));
            }
            Ok(LoadOutcome::Applied(ticket.key.clone()))
        }
    }
}

/// One load's claim on its `(kind, key)`.
///
/// Dropping it, however the load ended, forgets the pair unless a newer load
/// has claimed it since.
struct LoadTicket<'a> {
    loader: &'a ActionMetadataLoader,
    kind: MetadataKind,
    key: MetadataKey,
    generation: u64,
    epoch: u64,
}

impl LoadTicket<'_> {
    fn is_current(&self) -> bool {
        self.loader
            .lock()
            .latest
            .get(&(self.kind, self.key.clone()))
            .is_some_and(|latest| *latest == self.generation)
    }
}

impl Drop for LoadTicket<'_> {
    fn drop(&mut self) {
        let mut state = self.loader.lock();
        let slot = (self.kind, self.key.clone());
        if state.latest.get(&slot) == Some(&self.generation) {
            state.latest.remove(&slot);
        }
    }
}
