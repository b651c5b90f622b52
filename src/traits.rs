//! Tool extension trait and registry for the HTTP tool server.
//!
//! Every endpoint under `POST /tools/{name}` is a [`Tool`]. The built-in
//! [`ApiDocQueryTool`] answers lookups against the loaded knowledge base;
//! additional Rust tools can be registered next to it through
//! [`ToolRegistry::register`] and are dispatched the same way.
//!
//! ```text
//! ┌──────────────────────────────┐
//! │          ToolRegistry        │
//! │  ┌──────────────┐ ┌───────┐  │
//! │  │api_doc_query │ │custom │  │
//! │  └──────────────┘ └───────┘  │
//! └──────────────┬───────────────┘
//!                ▼
//!     ToolContext ──▶ QueryService ──▶ Retriever
//! ```
//!
//! # Writing a tool
//!
//! ```rust
//! use apidoc_rag::traits::{Tool, ToolContext};
//! use async_trait::async_trait;
//! use serde_json::{json, Value};
//!
//! struct RowCountTool;
//!
//! #[async_trait]
//! impl Tool for RowCountTool {
//!     fn name(&self) -> &str { "row_count" }
//!     fn description(&self) -> &str { "Number of indexed class and method chunks" }
//!     fn parameters_schema(&self) -> Value {
//!         json!({ "type": "object", "properties": {} })
//!     }
//!     async fn execute(&self, _params: Value, ctx: &ToolContext) -> anyhow::Result<Value> {
//!         let (classes, methods) = ctx.service().row_counts();
//!         Ok(json!({ "classes": classes, "methods": methods }))
//!     }
//! }
//! ```

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use crate::service::QueryService;

// ═══════════════════════════════════════════════════════════════════════
// Tool trait
// ═══════════════════════════════════════════════════════════════════════

/// A callable exposed as `POST /tools/{name}`.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name; becomes the URL segment.
    fn name(&self) -> &str;

    /// One-line description for agent discovery.
    fn description(&self) -> &str;

    /// Built-in tools are marked `"builtin": true` in `GET /tools/list`.
    fn is_builtin(&self) -> bool {
        false
    }

    /// OpenAI function-calling JSON Schema for the parameters. Must be an
    /// object schema with `properties` and optionally `required`.
    fn parameters_schema(&self) -> Value;

    /// Run the tool with parameters already checked by [`validate_params`].
    /// The returned value is wrapped in `{ "result": ... }` by the server.
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value>;
}

/// Serializable tool info for `GET /tools/list`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub builtin: bool,
    pub parameters: Value,
}

impl ToolInfo {
    pub fn from_tool(tool: &dyn Tool) -> Self {
        Self {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            builtin: tool.is_builtin(),
            parameters: tool.parameters_schema(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// ToolContext
// ═══════════════════════════════════════════════════════════════════════

/// What a tool can reach while executing: the shared query service.
///
/// The server creates one per invocation; cloning the inner `Arc` is the
/// only cost, and every tool sees the same caches.
pub struct ToolContext {
    service: Arc<QueryService>,
}

impl ToolContext {
    pub fn new(service: Arc<QueryService>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &QueryService {
        &self.service
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Built-in tools
// ═══════════════════════════════════════════════════════════════════════

/// Looks up class and method snippets relevant to a free-text prompt.
///
/// Returns the `{success, data|error}` envelope as the tool result, so a
/// failed retrieval is still a `200` carrying `success: false`.
pub struct ApiDocQueryTool;

#[async_trait]
impl Tool for ApiDocQueryTool {
    fn name(&self) -> &str {
        "api_doc_query"
    }

    fn description(&self) -> &str {
        "Find API reference snippets (classes and methods) relevant to a prompt"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "prompt": { "type": "string", "description": "What the caller wants to do" },
                "class_top_k": { "type": "integer", "description": "Classes to recall before filtering" },
                "method_top_k": { "type": "integer", "description": "Methods to recall before filtering" }
            },
            "required": ["prompt"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let prompt = params["prompt"].as_str().unwrap_or("");
        let class_top_k = positive_usize(&params, "class_top_k")?;
        let method_top_k = positive_usize(&params, "method_top_k")?;

        let envelope = ctx
            .service()
            .query_with_k(prompt, class_top_k, method_top_k)
            .await;
        Ok(serde_json::to_value(envelope)?)
    }
}

fn positive_usize(params: &Value, key: &str) -> Result<Option<usize>> {
    match params.get(key).and_then(Value::as_i64) {
        None => Ok(None),
        Some(n) if n >= 1 => Ok(Some(n as usize)),
        Some(n) => bail!("invalid {}: must be at least 1, got {}", key, n),
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Parameter validation
// ═══════════════════════════════════════════════════════════════════════

/// Check incoming parameters against a tool's schema.
///
/// Required fields must be present, present fields must match their
/// declared `type`, and `enum` constraints are enforced. Missing optional
/// fields with a `default` get it injected.
pub fn validate_params(schema: &Value, params: &Value) -> Result<Value> {
    let params_obj = match params {
        Value::Object(map) => map.clone(),
        Value::Null => serde_json::Map::new(),
        other => bail!("parameters must be an object, got {}", json_type_name(other)),
    };

    let properties = schema
        .get("properties")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for field in required.iter().filter_map(Value::as_str) {
            if !params_obj.contains_key(field) {
                bail!("missing required parameter: {}", field);
            }
        }
    }

    let mut result = params_obj.clone();
    for (name, prop) in &properties {
        match params_obj.get(name) {
            Some(value) => {
                if let Some(expected) = prop.get("type").and_then(Value::as_str) {
                    let type_ok = match expected {
                        "string" => value.is_string(),
                        "integer" => value.is_i64() || value.is_u64(),
                        "number" => value.is_number(),
                        "boolean" => value.is_boolean(),
                        "array" => value.is_array(),
                        "object" => value.is_object(),
                        _ => true,
                    };
                    if !type_ok {
                        bail!(
                            "parameter '{}' must be of type '{}', got {}",
                            name,
                            expected,
                            json_type_name(value)
                        );
                    }
                }
                if let Some(allowed) = prop.get("enum").and_then(Value::as_array) {
                    if !allowed.contains(value) {
                        let names: Vec<String> = allowed.iter().map(|v| v.to_string()).collect();
                        bail!(
                            "parameter '{}' must be one of [{}], got {}",
                            name,
                            names.join(", "),
                            value
                        );
                    }
                }
            }
            None => {
                if let Some(default) = prop.get("default") {
                    result.insert(name.clone(), default.clone());
                }
            }
        }
    }

    Ok(Value::Object(result))
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════

/// Ordered set of tools served by the HTTP server.
///
/// ```rust
/// use apidoc_rag::traits::ToolRegistry;
///
/// let tools = ToolRegistry::with_builtins();
/// assert!(tools.find("api_doc_query").is_some());
/// ```
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// A registry holding `api_doc_query`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(ApiDocQueryTool));
        registry
    }

    /// Register a tool. Names are unique; a duplicate is logged and dropped.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        if self.find(tool.name()).is_some() {
            tracing::warn!(tool = tool.name(), "tool name already registered; ignoring");
            return;
        }
        self.tools.push(tool);
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    pub fn into_tools(self) -> Vec<Box<dyn Tool>> {
        self.tools
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_required_prompt() {
        let schema = ApiDocQueryTool.parameters_schema();
        let err = validate_params(&schema, &json!({})).unwrap_err();
        assert!(err.to_string().contains("missing required parameter: prompt"));
    }

    #[test]
    fn test_type_mismatch() {
        let schema = ApiDocQueryTool.parameters_schema();
        let err = validate_params(&schema, &json!({ "prompt": 42 })).unwrap_err();
        assert!(err.to_string().contains("must be of type 'string'"));

        let err = validate_params(&schema, &json!({ "prompt": "x", "class_top_k": "3" }))
            .unwrap_err();
        assert!(err.to_string().contains("class_top_k"));
    }

    #[test]
    fn test_enum_and_default() {
        let schema = json!({
            "type": "object",
            "properties": {
                "mode": { "type": "string", "enum": ["a", "b"], "default": "a" }
            }
        });
        let filled = validate_params(&schema, &json!({})).unwrap();
        assert_eq!(filled["mode"], "a");
        assert!(validate_params(&schema, &json!({ "mode": "c" })).is_err());
        assert!(validate_params(&schema, &json!([1, 2])).is_err());
    }

    #[test]
    fn test_positive_usize() {
        let params = json!({ "class_top_k": 4, "method_top_k": 0 });
        assert_eq!(positive_usize(&params, "class_top_k").unwrap(), Some(4));
        assert_eq!(positive_usize(&params, "missing").unwrap(), None);
        assert!(positive_usize(&params, "method_top_k").is_err());
    }

    #[test]
    fn test_registry_rejects_duplicate_names() {
        let mut registry = ToolRegistry::with_builtins();
        registry.register(Box::new(ApiDocQueryTool));
        assert_eq!(registry.len(), 1);
        assert!(registry.find("nope").is_none());
        let info = ToolInfo::from_tool(registry.tools()[0].as_ref());
        assert!(info.builtin);
        assert_eq!(info.parameters["required"][0], "prompt");
    }
}
