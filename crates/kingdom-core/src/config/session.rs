//! Session layer configuration.

use serde::{Deserialize, Serialize};

/// Configuration for session adapters and the session registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Clear cached action metadata and simulations after a successful
    /// mutation (action, phase advance, dev mode toggle, AI turn).
    #[serde(default = "default_reset_on_mutation")]
    pub reset_metadata_on_mutation: bool,

    /// Maximum number of live sessions in a registry. Unlimited when unset.
    #[serde(default)]
    pub max_sessions: Option<usize>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reset_metadata_on_mutation: default_reset_on_mutation(),
            max_sessions: None,
        }
    }
}

fn default_reset_on_mutation() -> bool {
    true
}
