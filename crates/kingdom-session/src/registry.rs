//! Explicit session registry.
//!
//! Owns one [`RemoteSessionAdapter`] per live session and the task queue they
//! share. Applications create one registry and pass it to whatever needs
//! session access; adapters are created and disposed explicitly.

use crate::adapter::RemoteSessionAdapter;
use crate::engine::EngineHandles;
use crate::error::SessionError;
use crate::queue::SessionTaskQueue;
use kingdom_core::SessionConfig;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

/// Registry of live session adapters.
pub struct SessionRegistry {
    adapters: RwLock<HashMap<String, Arc<RemoteSessionAdapter>>>,
    queue: SessionTaskQueue,
    engine: EngineHandles,
    config: SessionConfig,
}

impl SessionRegistry {
    /// Create an empty registry backed by `engine`.
    pub fn new(engine: EngineHandles, config: SessionConfig) -> Self {
        Self {
            adapters: RwLock::new(HashMap::new()),
            queue: SessionTaskQueue::new(),
            engine,
            config,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<RemoteSessionAdapter>>> {
        self.adapters.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<RemoteSessionAdapter>>> {
        self.adapters.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert_new(
        &self,
        adapters: &mut HashMap<String, Arc<RemoteSessionAdapter>>,
        session_id: &str,
    ) -> Result<Arc<RemoteSessionAdapter>, SessionError> {
        if let Some(limit) = self.config.max_sessions
            && adapters.len() >= limit
        {
            return Err(SessionError::SessionLimitReached { limit });
        }

        let adapter = Arc::new(RemoteSessionAdapter::new(
            session_id,
            self.engine.clone(),
            self.queue.clone(),
            self.config.clone(),
        ));
        adapters.insert(session_id.to_string(), Arc::clone(&adapter));
        tracing::info!(session_id, sessions = adapters.len(), "Registered session adapter");
        Ok(adapter)
    }

    /// Register an adapter for `session_id`.
    pub fn create(&self, session_id: &str) -> Result<Arc<RemoteSessionAdapter>, SessionError> {
        let mut adapters = self.write();
        if adapters.contains_key(session_id) {
            return Err(SessionError::SessionExists {
                session_id: session_id.to_string(),
            });
        }
        self.insert_new(&mut adapters, session_id)
    }

    /// Register an adapter under a fresh random session id.
    pub fn create_with_generated_id(&self) -> Result<Arc<RemoteSessionAdapter>, SessionError> {
        self.create(&Uuid::new_v4().to_string())
    }

    /// Adapter for `session_id`, if registered.
    pub fn get(&self, session_id: &str) -> Option<Arc<RemoteSessionAdapter>> {
        self.read().get(session_id).cloned()
    }

    /// Adapter for `session_id`, creating it when missing.
    pub fn get_or_create(
        &self,
        session_id: &str,
    ) -> Result<Arc<RemoteSessionAdapter>, SessionError> {
        let mut adapters = self.write();
        if let Some(existing) = adapters.get(session_id) {
            return Ok(Arc::clone(existing));
        }
        self.insert_new(&mut adapters, session_id)
    }

    /// Remove the adapter for `session_id`.
    ///
    /// Cached metadata is reset first so live subscribers learn their data is
    /// gone. Returns `false` if no adapter was registered.
    pub fn dispose(&self, session_id: &str) -> bool {
        let removed = self.write().remove(session_id);
        match removed {
            Some(adapter) => {
                adapter.reset_action_metadata();
                adapter.clear_simulations();
                tracing::info!(session_id, "Disposed session adapter");
                true
            }
            None => false,
        }
    }

    /// Ids of all registered sessions.
    pub fn session_ids(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
