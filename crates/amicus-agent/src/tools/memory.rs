//! Memory tools — search and write into the hybrid fact/episode store.
//!
//! Two tools, both thin wrappers over `amicus_memory::manager::MemoryManager`:
//! - `memory_search` — hybrid FTS+vector search over facts and episodes (§4.I).
//! - `memory_remember` — store a new fact, optionally tied to a person (§4.I).

use std::sync::Arc;

use amicus_core::config::AmicusConfig;
use amicus_memory::manager::MemoryManager;
use amicus_memory::types::Fact;
use async_trait::async_trait;
use uuid::Uuid;

use super::{Tool, ToolContext, ToolResult};

/// Search stored facts and episodes by free-text query.
pub struct MemorySearchTool {
    memory: Arc<MemoryManager>,
    config: Arc<AmicusConfig>,
}

impl MemorySearchTool {
    pub fn new(memory: Arc<MemoryManager>, config: Arc<AmicusConfig>) -> Self {
        Self { memory, config }
    }
}

#[async_trait]
impl Tool for MemorySearchTool {
    fn name(&self) -> &str {
        "memory_search"
    }

    fn description(&self) -> &str {
        "Search what you already know: facts remembered about people and topics, \
         and past conversation episodes. Use this before asking the user something \
         you might already have been told. Returns up to 5 matching facts and 5 \
         matching episodes, most relevant first."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Free-text search query, e.g. a name, topic, or phrase."
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, input: serde_json::Value, _ctx: &ToolContext) -> ToolResult {
        let query = match input.get("query").and_then(|v| v.as_str()) {
            Some(q) if !q.trim().is_empty() => q.trim().to_string(),
            _ => return ToolResult::error("missing required parameter: query"),
        };

        let now_ms = chrono::Utc::now().timestamp_millis();
        let facts = self.memory.hybrid_search_facts(&self.config, &query, 5, now_ms);
        let episodes = self.memory.hybrid_search_episodes(&self.config, &query, 5, now_ms);

        let (facts, episodes) = match (facts, episodes) {
            (Ok(f), Ok(e)) => (f, e),
            (Err(e), _) | (_, Err(e)) => return ToolResult::error(format!("memory_search failed: {e}")),
        };

        if facts.is_empty() && episodes.is_empty() {
            return ToolResult::success(format!("Nothing found for: {query}"));
        }

        let mut out = String::new();
        if !facts.is_empty() {
            out.push_str("Facts:\n");
            for hit in &facts {
                out.push_str(&format!("- {}: {}\n", hit.item.subject, hit.item.content));
            }
        }
        if !episodes.is_empty() {
            out.push_str("Episodes:\n");
            for hit in &episodes {
                out.push_str(&format!("- {}\n", hit.item.content));
            }
        }
        ToolResult::success(out.trim_end().to_string())
    }
}

/// Store a new fact — the AI calls this to remember something durably
/// instead of relying on it staying in the live conversation window.
pub struct MemoryRememberTool {
    memory: Arc<MemoryManager>,
}

impl MemoryRememberTool {
    pub fn new(memory: Arc<MemoryManager>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Tool for MemoryRememberTool {
    fn name(&self) -> &str {
        "memory_remember"
    }

    fn description(&self) -> &str {
        "Save a fact you want to remember for future conversations — something a \
         person told you about themselves, a preference, a plan, or a detail worth \
         not forgetting. Optionally attach it to a specific person_id."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "subject": {
                    "type": "string",
                    "description": "Short label for what the fact is about (e.g. 'favorite food', 'job')."
                },
                "content": {
                    "type": "string",
                    "description": "The fact itself, in plain language."
                },
                "person_id": {
                    "type": "string",
                    "description": "Optional id of the person this fact is about."
                }
            },
            "required": ["subject", "content"]
        })
    }

    async fn execute(&self, input: serde_json::Value, _ctx: &ToolContext) -> ToolResult {
        let subject = match input.get("subject").and_then(|v| v.as_str()) {
            Some(s) if !s.trim().is_empty() => s.trim().to_string(),
            _ => return ToolResult::error("missing required parameter: subject"),
        };
        let content = match input.get("content").and_then(|v| v.as_str()) {
            Some(c) if !c.trim().is_empty() => c.trim().to_string(),
            _ => return ToolResult::error("missing required parameter: content"),
        };
        let person_id = input.get("person_id").and_then(|v| v.as_str()).map(String::from);

        let fact = Fact {
            id: Uuid::now_v7().to_string(),
            person_id,
            subject: subject.clone(),
            content,
            category: None,
            evidence_quote: None,
            last_accessed_at_ms: None,
            created_at_ms: chrono::Utc::now().timestamp_millis(),
        };

        match self.memory.store_fact(&fact) {
            Ok(()) => ToolResult::success(format!("Remembered: {subject}")),
            Err(e) => ToolResult::error(format!("memory_remember failed: {e}")),
        }
    }
}
