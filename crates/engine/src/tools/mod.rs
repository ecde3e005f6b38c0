// ── Tool Registry ────────────────────────────────────────────────────────
// Pluggable tools registered at startup with a JSON-Schema and a handler —
// replaces the source's dynamic dispatch-by-name with a typed map built in
// the composition root. No runtime code loading.

pub mod builtins;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::error::EngineResult;
use crate::types::ToolDefinition;

#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, arguments: serde_json::Value) -> EngineResult<serde_json::Value>;
}

struct RegisteredTool {
    definition: ToolDefinition,
    handler: Arc<dyn ToolHandler>,
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
}

pub struct ToolExecutionOutcome {
    pub output: serde_json::Value,
    pub duration_ms: u64,
}

impl ToolRegistry {
    pub fn new() -> Self {
        ToolRegistry::default()
    }

    pub fn register(&mut self, definition: ToolDefinition, handler: Arc<dyn ToolHandler>) {
        self.tools.insert(definition.name.clone(), RegisteredTool { definition, handler });
    }

    /// The full catalog, for callers (e.g. an admin CLI) that need every
    /// registered tool regardless of any agent's capability filter.
    pub fn all_definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition.clone()).collect()
    }

    /// Catalog restricted to an agent's declared capabilities. `None`
    /// capability list means "no restriction" (the main agent).
    pub fn definitions_for(&self, capabilities: Option<&[String]>) -> Vec<ToolDefinition> {
        match capabilities {
            None => self.all_definitions(),
            Some(allowed) => self
                .tools
                .values()
                .filter(|t| allowed.iter().any(|name| name == &t.definition.name))
                .map(|t| t.definition.clone())
                .collect(),
        }
    }

    pub async fn execute(&self, name: &str, arguments: serde_json::Value) -> EngineResult<ToolExecutionOutcome> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| crate::error::EngineError::tool(name, "no such tool registered"))?;
        let started = Instant::now();
        let output = tool.handler.call(arguments).await?;
        Ok(ToolExecutionOutcome { output, duration_ms: started.elapsed().as_millis() as u64 })
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl ToolHandler for Echo {
        async fn call(&self, arguments: serde_json::Value) -> EngineResult<serde_json::Value> {
            Ok(arguments)
        }
    }

    #[tokio::test]
    async fn capability_filter_excludes_unlisted_tools() {
        let mut registry = ToolRegistry::new();
        registry.register(
            ToolDefinition { name: "echo".to_string(), description: "echoes input".to_string(), parameters: serde_json::json!({}) },
            Arc::new(Echo),
        );
        registry.register(
            ToolDefinition { name: "exec".to_string(), description: "runs a command".to_string(), parameters: serde_json::json!({}) },
            Arc::new(Echo),
        );

        let allowed = vec!["echo".to_string()];
        let filtered = registry.definitions_for(Some(&allowed));
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].name, "echo");

        let unrestricted = registry.definitions_for(None);
        assert_eq!(unrestricted.len(), 2);
    }

    #[tokio::test]
    async fn execute_unknown_tool_is_a_tool_error() {
        let registry = ToolRegistry::new();
        let result = registry.execute("missing", serde_json::json!({})).await;
        assert!(result.is_err());
    }
}
