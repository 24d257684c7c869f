//! Tool system for AI agent tool calling.
//!
//! Defines the `Tool` trait that all tools implement, plus a registry
//! for managing available tools and converting them to LLM API format.

pub mod build;
pub mod memory;
pub mod reminder;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::backend::{self, ToolSpec};

/// Result of executing a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Text content returned to the LLM.
    pub content: String,
    /// Whether the tool execution failed.
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: message.into(),
            is_error: true,
        }
    }
}

/// Per-call context a tool executes under (§4.H.5).
///
/// Built once per generation attempt and shared across every tool call the
/// model makes during that attempt.
pub struct ToolContext {
    /// `http(s)://` URLs extracted from the user's text, for tools that need
    /// to fetch or validate a link the user actually sent rather than one
    /// the model hallucinates.
    pub verified_urls: Vec<String>,
    /// Cancelled when the turn's root signal fires (shutdown, staleness) —
    /// tools should check this between steps of any multi-step work.
    pub signal: CancellationToken,
    /// Per-tool execution timeout; a child of the turn's overall budget.
    /// Default 60s (§4.H.5).
    pub timeout: Duration,
}

impl ToolContext {
    pub fn new(verified_urls: Vec<String>, signal: CancellationToken) -> Self {
        Self {
            verified_urls,
            signal,
            timeout: Duration::from_secs(60),
        }
    }
}

impl Default for ToolContext {
    fn default() -> Self {
        Self::new(Vec::new(), CancellationToken::new())
    }
}

/// Trait that all tools must implement.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name for this tool (e.g. "read_file").
    fn name(&self) -> &str;
    /// Human-readable description of what this tool does.
    fn description(&self) -> &str;
    /// JSON Schema for the tool's input parameters.
    fn input_schema(&self) -> serde_json::Value;
    /// Execute the tool with the given input.
    async fn execute(&self, input: serde_json::Value, ctx: &ToolContext) -> ToolResult;
}

/// Static catalog of all built-in tools (name, description).
///
/// Does not require instantiation or context — useful for a `/tools` listing.
pub fn tool_catalog() -> Vec<(&'static str, &'static str)> {
    vec![
        ("memory_search", "Search stored facts and episodes"),
        ("memory_remember", "Store a new fact about a person or topic"),
        ("reminder", "Schedule, list, or cancel a proactive reminder"),
    ]
}

/// Convert a slice of tools to backend-level tool definitions.
pub fn to_definitions(tools: &[Box<dyn Tool>]) -> Vec<ToolSpec> {
    tools
        .iter()
        .map(|t| ToolSpec {
            name: t.name().to_string(),
            description: t.description().to_string(),
            input_schema: t.input_schema(),
        })
        .collect()
}

/// Adapts a `&[Box<dyn Tool>]` slice to the backend's [`backend::ToolExecutor`]
/// seam, so [`crate::anthropic::AnthropicBackend`] (or any other backend) can
/// drive tool calls without knowing about the `Tool` trait.
pub struct ToolExecutorAdapter<'a> {
    tools: &'a [Box<dyn Tool>],
    verified_urls: Vec<String>,
}

impl<'a> ToolExecutorAdapter<'a> {
    pub fn new(tools: &'a [Box<dyn Tool>], verified_urls: Vec<String>) -> Self {
        Self { tools, verified_urls }
    }
}

#[async_trait]
impl<'a> backend::ToolExecutor for ToolExecutorAdapter<'a> {
    async fn execute(
        &self,
        name: &str,
        input: serde_json::Value,
        timeout: Duration,
        signal: &CancellationToken,
    ) -> (String, bool) {
        let Some(tool) = self.tools.iter().find(|t| t.name() == name) else {
            return (format!("unknown tool: {name}"), true);
        };

        let mut ctx = ToolContext::new(self.verified_urls.clone(), signal.child_token());
        ctx.timeout = timeout;

        let result = tokio::select! {
            result = tool.execute(input, &ctx) => result,
            _ = tokio::time::sleep(timeout) => {
                ToolResult::error(format!("tool '{name}' timed out after {}s", timeout.as_secs()))
            }
            _ = ctx.signal.cancelled() => {
                ToolResult::error(format!("tool '{name}' cancelled"))
            }
        };
        (result.content, result.is_error)
    }
}
