//! Action metadata payloads.
//!
//! Metadata describes what an action would cost, which requirements
//! currently block it, and which sub-choices (option groups) it offers.
//! Payloads arrive already deserialized from the network client and are
//! held by the session cache.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Resource id → amount.
pub type ActionCosts = BTreeMap<String, f64>;

/// Opaque parameter bag attached to an action invocation.
///
/// Defaults to the empty object. Equality for caching purposes is decided by
/// the canonical metadata key, not by this type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionParams(Value);

impl ActionParams {
    /// Empty parameters (`{}`).
    pub fn empty() -> Self {
        Self(Value::Object(serde_json::Map::new()))
    }

    /// Borrow the underlying JSON value.
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Consume and return the underlying JSON value.
    pub fn into_value(self) -> Value {
        self.0
    }

    /// True for `{}` and `null`.
    pub fn is_empty(&self) -> bool {
        match &self.0 {
            Value::Null => true,
            Value::Object(map) => map.is_empty(),
            _ => false,
        }
    }
}

impl Default for ActionParams {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Value> for ActionParams {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::empty(),
            other => Self(other),
        }
    }
}

/// A requirement an action checks before it may be performed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Requirement {
    /// Requirement kind, e.g. `resource.at_least`.
    pub kind: String,
    /// Kind-specific parameters.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

/// A requirement that is currently not met, with a message for the player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequirementFailure {
    pub requirement: Requirement,
    pub message: String,
}

/// One selectable option within an effect group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionEffectGroupOption {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Action performed when this option is chosen.
    pub action_id: String,
    #[serde(default)]
    pub params: ActionParams,
}

/// A group of mutually exclusive sub-choices offered by an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionEffectGroup {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub options: Vec<ActionEffectGroupOption>,
}

/// Partial view of the metadata for one action invocation context.
///
/// A `None` field means "not loaded yet"; `Some` of an empty collection
/// means "loaded and empty".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub costs: Option<ActionCosts>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements: Option<Vec<RequirementFailure>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<ActionEffectGroup>>,
}

impl MetadataSnapshot {
    /// True when no metadata kind has been loaded.
    pub fn is_empty(&self) -> bool {
        self.costs.is_none() && self.requirements.is_none() && self.groups.is_none()
    }
}

/// The three kinds of action metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataKind {
    Costs,
    Requirements,
    Options,
}

impl fmt::Display for MetadataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataKind::Costs => write!(f, "costs"),
            MetadataKind::Requirements => write!(f, "requirements"),
            MetadataKind::Options => write!(f, "options"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_snapshot_serializes_as_empty_object() {
        let snapshot = MetadataSnapshot::default();
        assert!(snapshot.is_empty());
        assert_eq!(serde_json::to_value(&snapshot).unwrap(), json!({}));
    }

    #[test]
    fn test_loaded_empty_is_distinct_from_missing() {
        let snapshot = MetadataSnapshot {
            costs: Some(ActionCosts::new()),
            ..Default::default()
        };
        assert!(!snapshot.is_empty());
        assert_eq!(serde_json::to_value(&snapshot).unwrap(), json!({"costs": {}}));
    }

    #[test]
    fn test_params_from_null_is_empty() {
        let params = ActionParams::from(Value::Null);
        assert!(params.is_empty());
        assert_eq!(params.as_value(), &json!({}));
    }

    #[test]
    fn test_group_deserializes_with_defaults() {
        let group: ActionEffectGroup = serde_json::from_value(json!({
            "id": "target",
            "options": [{"id": "farm", "action_id": "build_farm"}]
        }))
        .unwrap();

        assert_eq!(group.options.len(), 1);
        assert!(group.options[0].params.is_empty());
        assert_eq!(group.title, None);
    }
}
