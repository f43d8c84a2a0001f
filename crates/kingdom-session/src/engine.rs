//! Game engine collaborators.
//!
//! The session layer does not implement game rules. It delegates to these
//! traits, which a remote engine client (or [`crate::memory::InMemoryEngine`]
//! during development) implements.

use crate::error::SessionError;
use async_trait::async_trait;
use kingdom_core::{ActionOutcome, ActionParams, SessionSnapshot, SimulationResult};
use std::sync::Arc;

/// Source of truth for session game state.
#[async_trait]
pub trait SessionStateStore: Send + Sync {
    /// Current snapshot, or `None` when the session record does not exist.
    fn snapshot(&self, session_id: &str) -> Option<SessionSnapshot>;

    /// Apply an action to the session.
    async fn perform_action(
        &self,
        session_id: &str,
        action_id: &str,
        params: &ActionParams,
    ) -> Result<ActionOutcome, SessionError>;

    /// Toggle developer mode.
    async fn set_dev_mode(
        &self,
        session_id: &str,
        enabled: bool,
    ) -> Result<SessionSnapshot, SessionError>;
}

/// Moves a session to its next phase.
#[async_trait]
pub trait PhaseAdvancer: Send + Sync {
    async fn advance_phase(&self, session_id: &str) -> Result<SessionSnapshot, SessionError>;
}

/// Plays a turn on behalf of an AI-controlled player.
#[async_trait]
pub trait AiTurnRunner: Send + Sync {
    /// Returns `true` when the AI took at least one action.
    async fn run_ai_turn(&self, session_id: &str, player_id: &str) -> Result<bool, SessionError>;
}

/// Projects upcoming phases without mutating the session.
#[async_trait]
pub trait PhaseSimulator: Send + Sync {
    async fn simulate_upcoming_phases(
        &self,
        session_id: &str,
        player_id: &str,
    ) -> Result<SimulationResult, SessionError>;
}

/// Bundle of engine collaborators shared by every adapter in a registry.
#[derive(Clone)]
pub struct EngineHandles {
    pub store: Arc<dyn SessionStateStore>,
    pub advancer: Arc<dyn PhaseAdvancer>,
    pub ai: Arc<dyn AiTurnRunner>,
    pub simulator: Arc<dyn PhaseSimulator>,
}

impl EngineHandles {
    /// Use one value for every collaborator role.
    pub fn from_engine<E>(engine: Arc<E>) -> Self
    where
        E: SessionStateStore + PhaseAdvancer + AiTurnRunner + PhaseSimulator + 'static,
    {
        Self {
            store: engine.clone(),
            advancer: engine.clone(),
            ai: engine.clone(),
            simulator: engine,
        }
    }
}
