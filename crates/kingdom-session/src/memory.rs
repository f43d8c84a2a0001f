//! In-memory game engine for development and tests.
//!
//! Implements every engine collaborator with a deliberately tiny rule set:
//! sessions cycle through the configured phases, the active player rotates
//! each turn, and actions are appended to a log. Nothing is persisted.

use crate::engine::{AiTurnRunner, PhaseAdvancer, PhaseSimulator, SessionStateStore};
use crate::error::SessionError;
use async_trait::async_trait;
use chrono::Utc;
use kingdom_core::{
    ActionOutcome, ActionParams, EngineConfig, PhaseProjection, SessionSnapshot,
    SimulationResult, canonical_json,
};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

struct MemorySession {
    snapshot: SessionSnapshot,
    phase_index: usize,
}

/// Engine that keeps every session in process memory.
pub struct InMemoryEngine {
    config: EngineConfig,
    sessions: RwLock<HashMap<String, MemorySession>>,
    /// Action id → rejection reason.
    blocked_actions: RwLock<HashMap<String, String>>,
}

impl InMemoryEngine {
    /// Create an engine with the given phase and player setup.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            sessions: RwLock::new(HashMap::new()),
            blocked_actions: RwLock::new(HashMap::new()),
        }
    }

    fn sessions(&self) -> RwLockReadGuard<'_, HashMap<String, MemorySession>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn sessions_mut(&self) -> RwLockWriteGuard<'_, HashMap<String, MemorySession>> {
        self.sessions.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn phase_name(&self, index: usize) -> String {
        self.config
            .phases
            .get(index)
            .cloned()
            .unwrap_or_else(|| "main".to_string())
    }

    fn player_for_turn(&self, turn: u32) -> Option<String> {
        if self.config.players.is_empty() {
            return None;
        }
        let seat = (turn.saturating_sub(1) as usize) % self.config.players.len();
        Some(self.config.players[seat].clone())
    }

    /// Start a session at turn 1, first phase. Replaces any existing record.
    pub fn create_session(&self, session_id: &str) -> SessionSnapshot {
        let snapshot = SessionSnapshot {
            session_id: session_id.to_string(),
            turn: 1,
            phase: self.phase_name(0),
            active_player_id: self.player_for_turn(1),
            dev_mode: false,
            action_log: Vec::new(),
            updated_at: Utc::now(),
        };
        self.sessions_mut().insert(
            session_id.to_string(),
            MemorySession {
                snapshot: snapshot.clone(),
                phase_index: 0,
            },
        );
        tracing::debug!(session_id, "Created in-memory session");
        snapshot
    }

    /// Drop a session record. Returns `false` if it did not exist.
    pub fn remove_session(&self, session_id: &str) -> bool {
        self.sessions_mut().remove(session_id).is_some()
    }

    /// Make every future `perform_action` for `action_id` fail.
    pub fn block_action(&self, action_id: impl Into<String>, reason: impl Into<String>) {
        self.blocked_actions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(action_id.into(), reason.into());
    }

    fn with_session<R>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut MemorySession) -> R,
    ) -> Result<R, SessionError> {
        let mut sessions = self.sessions_mut();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::missing(session_id))?;
        session.snapshot.updated_at = Utc::now();
        Ok(f(session))
    }

    fn project(&self, snapshot: &SessionSnapshot, phase_index: usize) -> Vec<PhaseProjection> {
        let phase_count = self.config.phases.len().max(1);
        let mut turn = snapshot.turn;
        let mut index = phase_index;

        (0..self.config.simulation_depth)
            .map(|_| {
                index += 1;
                if index >= phase_count {
                    index = 0;
                    turn += 1;
                }
                let mut notes = Vec::new();
                if index == 0
                    && let Some(player) = self.player_for_turn(turn)
                {
                    notes.push(format!("{player} becomes active"));
                }
                PhaseProjection {
                    turn,
                    phase: self.phase_name(index),
                    notes,
                }
            })
            .collect()
    }
}

impl Default for InMemoryEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

#[async_trait]
impl SessionStateStore for InMemoryEngine {
    fn snapshot(&self, session_id: &str) -> Option<SessionSnapshot> {
        self.sessions().get(session_id).map(|s| s.snapshot.clone())
    }

    async fn perform_action(
        &self,
        session_id: &str,
        action_id: &str,
        params: &ActionParams,
    ) -> Result<ActionOutcome, SessionError> {
        let blocked = self
            .blocked_actions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(action_id)
            .cloned();
        if let Some(reason) = blocked {
            return Err(SessionError::ActionRejected {
                action_id: action_id.to_string(),
                reason,
            });
        }

        let entry = if params.is_empty() {
            action_id.to_string()
        } else {
            format!("{action_id} {}", canonical_json(params.as_value()))
        };

        let snapshot = self.with_session(session_id, |session| {
            session.snapshot.action_log.push(entry.clone());
            session.snapshot.clone()
        })?;

        Ok(ActionOutcome {
            action_id: action_id.to_string(),
            effects: vec![format!("performed {entry}")],
            snapshot,
        })
    }

    async fn set_dev_mode(
        &self,
        session_id: &str,
        enabled: bool,
    ) -> Result<SessionSnapshot, SessionError> {
        self.with_session(session_id, |session| {
            session.snapshot.dev_mode = enabled;
            session.snapshot.clone()
        })
    }
}

#[async_trait]
impl PhaseAdvancer for InMemoryEngine {
    async fn advance_phase(&self, session_id: &str) -> Result<SessionSnapshot, SessionError> {
        let phase_count = self.config.phases.len().max(1);
        self.with_session(session_id, |session| {
            session.phase_index += 1;
            if session.phase_index >= phase_count {
                session.phase_index = 0;
                session.snapshot.turn += 1;
                session.snapshot.active_player_id = self.player_for_turn(session.snapshot.turn);
            }
            session.snapshot.phase = self.phase_name(session.phase_index);
            session.snapshot.clone()
        })
    }
}

#[async_trait]
impl AiTurnRunner for InMemoryEngine {
    async fn run_ai_turn(&self, session_id: &str, player_id: &str) -> Result<bool, SessionError> {
        let seated = self.config.players.iter().any(|p| p == player_id);
        self.with_session(session_id, |session| {
            if seated {
                session.snapshot.action_log.push(format!("ai:{player_id}"));
            }
            seated
        })
    }
}

#[async_trait]
impl PhaseSimulator for InMemoryEngine {
    async fn simulate_upcoming_phases(
        &self,
        session_id: &str,
        player_id: &str,
    ) -> Result<SimulationResult, SessionError> {
        let sessions = self.sessions();
        let session = sessions
            .get(session_id)
            .ok_or_else(|| SessionError::missing(session_id))?;

        Ok(SimulationResult {
            player_id: player_id.to_string(),
            phases: self.project(&session.snapshot, session.phase_index),
            computed_at: Utc::now(),
        })
    }
}
