//! In-memory engine configuration.
//!
//! Only used by the development engine that backs the CLI and tests; a real
//! deployment talks to the remote game engine instead.

use serde::{Deserialize, Serialize};

/// Configuration for the in-memory game engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Phase names in the order they are played each turn.
    #[serde(default = "default_phases")]
    pub phases: Vec<String>,

    /// Player ids seated in every new session, in turn order.
    #[serde(default = "default_players")]
    pub players: Vec<String>,

    /// Number of upcoming phases a simulation projects.
    #[serde(default = "default_simulation_depth")]
    pub simulation_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            phases: default_phases(),
            players: default_players(),
            simulation_depth: default_simulation_depth(),
        }
    }
}

fn default_phases() -> Vec<String> {
    vec!["growth".to_string(), "upkeep".to_string(), "main".to_string()]
}

fn default_players() -> Vec<String> {
    vec!["player-1".to_string(), "player-2".to_string()]
}

fn default_simulation_depth() -> usize {
    3
}
