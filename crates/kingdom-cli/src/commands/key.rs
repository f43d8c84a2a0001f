//! `kingdom key` command.

use anyhow::{Context, Result};
use kingdom_core::{MetadataKey, create_metadata_key};
use serde_json::Value;

/// Compute the metadata key for `action` with optional JSON `params`.
pub fn key_for(action: &str, params: Option<&str>) -> Result<MetadataKey> {
    let params: Option<Value> = params
        .map(serde_json::from_str)
        .transpose()
        .context("--params must be valid JSON")?;
    Ok(create_metadata_key(action, params.as_ref()))
}

/// Print the metadata key for `action`.
pub fn run(action: &str, params: Option<&str>) -> Result<()> {
    println!("{}", key_for(action, params)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_ignores_param_order() {
        let a = key_for("build", Some(r#"{"landId":"L1","slot":2}"#)).unwrap();
        let b = key_for("build", Some(r#"{"slot":2,"landId":"L1"}"#)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_key_without_params_matches_empty_object() {
        assert_eq!(key_for("build", None).unwrap(), key_for("build", Some("{}")).unwrap());
    }

    #[test]
    fn test_invalid_params_are_rejected() {
        let err = key_for("build", Some("{landId")).unwrap_err();
        assert!(err.to_string().contains("--params"));
    }
}
