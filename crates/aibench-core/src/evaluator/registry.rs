//! Evaluator registry: string key to factory.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::domain::error::Result;
use crate::evaluator::expected_diff::ExpectedDiffEvaluator;
use crate::evaluator::git_diff::GitDiffEvaluator;
use crate::evaluator::Evaluator;

/// Builds an evaluator from its configuration block.
pub type EvaluatorFactory =
    Arc<dyn Fn(&serde_json::Value) -> Result<Arc<dyn Evaluator>> + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("unknown evaluator: {0}")]
    NotFound(String),

    #[error("invalid configuration for evaluator {name}: {reason}")]
    InvalidConfig { name: String, reason: String },
}

/// Evaluator factories keyed by name.
#[derive(Clone, Default)]
pub struct EvaluatorRegistry {
    factories: BTreeMap<String, EvaluatorFactory>,
}

impl std::fmt::Debug for EvaluatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluatorRegistry")
            .field("evaluators", &self.names())
            .finish()
    }
}

impl EvaluatorRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `git-diff` and `expected-diff`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(GitDiffEvaluator::NAME, |config| {
            Ok(Arc::new(GitDiffEvaluator::from_value(config)?) as Arc<dyn Evaluator>)
        });
        registry.register(ExpectedDiffEvaluator::NAME, |config| {
            Ok(Arc::new(ExpectedDiffEvaluator::from_value(config)?) as Arc<dyn Evaluator>)
        });
        registry
    }

    /// Register or replace the factory for `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&serde_json::Value) -> Result<Arc<dyn Evaluator>> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Build the evaluator registered as `name` from `config`.
    pub fn build(
        &self,
        name: &str,
        config: &serde_json::Value,
    ) -> std::result::Result<Arc<dyn Evaluator>, RegistryError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        factory(config).map_err(|e| RegistryError::InvalidConfig {
            name: name.to_string(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtins_are_registered() {
        let registry = EvaluatorRegistry::with_builtins();
        assert_eq!(registry.names(), vec!["expected-diff", "git-diff"]);
        let evaluator = registry.build("git-diff", &serde_json::Value::Null).unwrap();
        assert_eq!(evaluator.name(), "git-diff");
        assert!(!evaluator.requires_expected_reference());
        assert!(registry
            .build("expected-diff", &serde_json::Value::Null)
            .unwrap()
            .requires_expected_reference());
    }

    #[test]
    fn test_unknown_name_is_not_found() {
        let registry = EvaluatorRegistry::with_builtins();
        match registry.build("agentic-judge", &serde_json::Value::Null) {
            Err(RegistryError::NotFound(name)) => assert_eq!(name, "agentic-judge"),
            Err(e) => panic!("expected NotFound, got {e}"),
            Ok(_) => panic!("expected NotFound"),
        }
    }

    #[test]
    fn test_bad_config_is_invalid_config() {
        let registry = EvaluatorRegistry::with_builtins();
        let err = registry
            .build("expected-diff", &json!({ "threshold": 3.0 }))
            .err()
            .unwrap();
        assert!(matches!(err, RegistryError::InvalidConfig { .. }));
        assert!(err.to_string().contains("expected-diff"));
    }
}
