//! Validation of the final merged configuration.

use super::types::ResolvedConfig;
use crate::error::{ConfigError, Result, ValidationIssue};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::marker::PhantomData;

/// Checks a fully resolved configuration.
///
/// Runs once per `load_config` call, after merging. Any issue fails the load.
pub trait ConfigValidator: Send + Sync {
    fn validate(&self, resolved: &ResolvedConfig) -> std::result::Result<(), Vec<ValidationIssue>>;
}

impl<F> ConfigValidator for F
where
    F: Fn(&ResolvedConfig) -> std::result::Result<(), Vec<ValidationIssue>> + Send + Sync,
{
    fn validate(&self, resolved: &ResolvedConfig) -> std::result::Result<(), Vec<ValidationIssue>> {
        self(resolved)
    }
}

/// Accepts a config that deserializes into `T`.
pub struct SchemaValidator<T> {
    _schema: PhantomData<fn() -> T>,
}

impl<T> SchemaValidator<T> {
    pub fn new() -> Self {
        Self {
            _schema: PhantomData,
        }
    }
}

impl<T> Default for SchemaValidator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> ConfigValidator for SchemaValidator<T> {
    fn validate(&self, resolved: &ResolvedConfig) -> std::result::Result<(), Vec<ValidationIssue>> {
        serde_json::from_value::<T>(resolved.config.clone())
            .map(|_| ())
            .map_err(|e| vec![ValidationIssue::new(e.to_string())])
    }
}

/// Deserialize a merged config into `T`, reporting failures as validation errors.
pub fn validate_config<T: DeserializeOwned>(config: &Value) -> Result<T> {
    serde_json::from_value(config.clone()).map_err(|e| ConfigError::Validation {
        issues: vec![ValidationIssue::new(e.to_string())],
    })
}

pub(crate) fn run_validator(validator: &dyn ConfigValidator, resolved: &ResolvedConfig) -> Result<()> {
    validator
        .validate(resolved)
        .map_err(|issues| ConfigError::Validation { issues })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    #[allow(dead_code)]
    struct Server {
        port: u16,
        host: String,
    }

    fn resolved(config: Value) -> ResolvedConfig {
        ResolvedConfig {
            config,
            ..Default::default()
        }
    }

    #[test]
    fn test_schema_validator() {
        let validator = SchemaValidator::<Server>::new();
        assert!(run_validator(&validator, &resolved(json!({"port": 80, "host": "h"}))).is_ok());

        let err = run_validator(&validator, &resolved(json!({"port": "eighty", "host": "h"})))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref issues } if issues.len() == 1));
    }

    #[test]
    fn test_closure_validator() {
        let validator = |r: &ResolvedConfig| {
            if r.config.get("name").is_some() {
                Ok(())
            } else {
                Err(vec![ValidationIssue::new("is required").at("name")])
            }
        };
        let err = run_validator(&validator, &resolved(json!({}))).unwrap_err();
        assert_eq!(err.to_string(), "config validation failed: name: is required");
    }

    #[test]
    fn test_validate_config_returns_typed_value() {
        let server: Server = validate_config(&json!({"port": 8080, "host": "localhost"})).unwrap();
        assert_eq!(server.port, 8080);
        assert!(validate_config::<Server>(&json!({})).is_err());
    }
}
