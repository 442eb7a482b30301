//! Agent adapter lookup by `agent.type`.

use std::collections::BTreeMap;
use std::sync::Arc;

use aibench_core::{AgentConfig, AgentExecutor, BenchError, Result};

use crate::command::CommandAgent;

/// Builds an adapter from the agent section of a run configuration.
pub type AgentFactory = Arc<dyn Fn(&AgentConfig) -> Result<Arc<dyn AgentExecutor>> + Send + Sync>;

#[derive(Clone, Default)]
pub struct AgentRegistry {
    factories: BTreeMap<String, AgentFactory>,
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("types", &self.types())
            .finish()
    }
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every adapter shipped in this crate.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(
            CommandAgent::TYPE,
            Arc::new(|config: &AgentConfig| {
                let agent: Arc<dyn AgentExecutor> = Arc::new(CommandAgent::from_config(config)?);
                Ok(agent)
            }),
        );
        registry
    }

    /// Register a factory; a later registration replaces an earlier one.
    pub fn register(&mut self, agent_type: impl Into<String>, factory: AgentFactory) {
        self.factories.insert(agent_type.into(), factory);
    }

    pub fn contains(&self, agent_type: &str) -> bool {
        self.factories.contains_key(agent_type)
    }

    pub fn types(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    pub fn resolve(&self, config: &AgentConfig) -> Result<Arc<dyn AgentExecutor>> {
        let factory = self.factories.get(&config.agent_type).ok_or_else(|| {
            BenchError::Config(format!(
                "unknown agent type: {} (known: {})",
                config.agent_type,
                self.types().join(", ")
            ))
        })?;
        factory(config)
    }
}
