// ── Built-in Tools ───────────────────────────────────────────────────────
// A small default catalog an agent's system prompt can reference without
// a calling process wiring anything bespoke. Definitions mirror the shape
// of a hand-authored skill: name, human description, JSON-Schema
// parameters, and a handler that accepts the parsed arguments.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::artifacts::ArtifactStore;
use crate::error::{EngineError, EngineResult};
use crate::tools::{ToolHandler, ToolRegistry};
use crate::types::ToolDefinition;

pub fn fetch_definition() -> ToolDefinition {
    ToolDefinition {
        name: "fetch".to_string(),
        description: "Make an HTTP GET or POST request to any URL and return the response body.".to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "url": {"type": "string", "description": "The URL to fetch"},
                "method": {"type": "string", "enum": ["GET", "POST"], "description": "HTTP method (default: GET)"},
                "body": {"type": "string", "description": "Request body for POST"}
            },
            "required": ["url"]
        }),
    }
}

pub fn read_artifact_definition() -> ToolDefinition {
    ToolDefinition {
        name: "read_artifact".to_string(),
        description: "Read a previously written artifact by its category/path.".to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "category": {"type": "string"},
                "path": {"type": "string"}
            },
            "required": ["category", "path"]
        }),
    }
}

pub fn write_artifact_definition() -> ToolDefinition {
    ToolDefinition {
        name: "write_artifact".to_string(),
        description: "Write content to an artifact at category/path. Paths ending in .json must be valid JSON.".to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "category": {"type": "string"},
                "path": {"type": "string"},
                "content": {"type": "string"}
            },
            "required": ["category", "path", "content"]
        }),
    }
}

struct FetchTool {
    client: reqwest::Client,
}

#[async_trait]
impl ToolHandler for FetchTool {
    async fn call(&self, arguments: serde_json::Value) -> EngineResult<serde_json::Value> {
        let url = arguments
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| EngineError::tool("fetch", "missing required argument: url"))?;
        let method = arguments.get("method").and_then(|v| v.as_str()).unwrap_or("GET");

        let mut request = match method {
            "POST" => self.client.post(url),
            _ => self.client.get(url),
        };
        if let Some(body) = arguments.get("body").and_then(|v| v.as_str()) {
            request = request.body(body.to_string());
        }

        let response = request
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| EngineError::tool("fetch", e.to_string()))?;
        let status = response.status().as_u16();
        let text = response.text().await.map_err(|e| EngineError::tool("fetch", e.to_string()))?;
        Ok(serde_json::json!({ "status": status, "body": text }))
    }
}

struct ReadArtifactTool {
    store: Arc<ArtifactStore>,
}

#[async_trait]
impl ToolHandler for ReadArtifactTool {
    async fn call(&self, arguments: serde_json::Value) -> EngineResult<serde_json::Value> {
        let category = arguments
            .get("category")
            .and_then(|v| v.as_str())
            .ok_or_else(|| EngineError::tool("read_artifact", "missing required argument: category"))?;
        let path = arguments
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| EngineError::tool("read_artifact", "missing required argument: path"))?;
        let content = self.store.read(category, path)?;
        Ok(serde_json::json!({
            "content": String::from_utf8_lossy(&content),
            "path": self.store.canonical_path(category, path),
        }))
    }
}

struct WriteArtifactTool {
    store: Arc<ArtifactStore>,
}

#[async_trait]
impl ToolHandler for WriteArtifactTool {
    async fn call(&self, arguments: serde_json::Value) -> EngineResult<serde_json::Value> {
        let category = arguments
            .get("category")
            .and_then(|v| v.as_str())
            .ok_or_else(|| EngineError::tool("write_artifact", "missing required argument: category"))?;
        let path = arguments
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| EngineError::tool("write_artifact", "missing required argument: path"))?;
        let content = arguments
            .get("content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| EngineError::tool("write_artifact", "missing required argument: content"))?;
        self.store.write(category, path, content.as_bytes())?;
        Ok(serde_json::json!({ "written": true }))
    }
}

/// Registers the default tool catalog. Callers that need a narrower set
/// for a particular agent still register everything here — narrowing
/// happens at read time via `ToolRegistry::definitions_for`.
pub fn register_defaults(registry: &mut ToolRegistry, artifact_store: Arc<ArtifactStore>) {
    registry.register(fetch_definition(), Arc::new(FetchTool { client: reqwest::Client::new() }));
    registry.register(read_artifact_definition(), Arc::new(ReadArtifactTool { store: artifact_store.clone() }));
    registry.register(write_artifact_definition(), Arc::new(WriteArtifactTool { store: artifact_store }));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Arc<ArtifactStore> {
        let dir = tempfile::tempdir().unwrap();
        Arc::new(ArtifactStore::new(dir.into_path()).unwrap())
    }

    #[tokio::test]
    async fn read_artifact_tool_returns_content_and_canonical_path() {
        let store = store();
        store.write("logs", "s.json", br#"{"ok":true}"#).unwrap();
        let tool = ReadArtifactTool { store: store.clone() };
        let result = tool.call(serde_json::json!({"category": "logs", "path": "s.json"})).await.unwrap();
        assert_eq!(result["content"], serde_json::json!(r#"{"ok":true}"#));
        assert_eq!(result["path"], serde_json::json!("logs/s.json"));
    }
}
