use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Configuration types shared across all Kingdom crates
pub mod config;

// Metadata cache keys
pub mod key;

// Action metadata payloads
pub mod metadata;

pub use config::{ConfigError, EngineConfig, KingdomConfig, LoggingConfig, SessionConfig};
pub use key::{MetadataKey, canonical_json, create_metadata_key};
pub use metadata::{
    ActionCosts, ActionEffectGroup, ActionEffectGroupOption, ActionParams, MetadataKind,
    MetadataSnapshot, Requirement, RequirementFailure,
};

/// Immutable view of one game session as last reported by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    /// 1-based turn counter.
    pub turn: u32,
    /// Name of the current phase.
    pub phase: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_player_id: Option<String>,
    #[serde(default)]
    pub dev_mode: bool,
    /// Actions applied so far, oldest first.
    #[serde(default)]
    pub action_log: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

/// Result of performing one action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub action_id: String,
    /// Engine-provided, human-readable effect lines.
    #[serde(default)]
    pub effects: Vec<String>,
    pub snapshot: SessionSnapshot,
}

/// Projected state of one upcoming phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseProjection {
    pub turn: u32,
    pub phase: String,
    #[serde(default)]
    pub notes: Vec<String>,
}

/// Output of simulating the next phases for a player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub player_id: String,
    pub phases: Vec<PhaseProjection>,
    pub computed_at: DateTime<Utc>,
}
