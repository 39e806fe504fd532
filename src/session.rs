/// Data model for sessions and their history.
///
/// A session is one conversation thread with the LM plus all of its durable
/// state: committed turns, the uncommitted pool, file references, todos,
/// token accounting, and the server-side cache handle. Sessions are stored
/// as pretty-printed JSON, one file per session, nested directories mirror
/// hierarchical IDs (`parent/child`).
use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

// ── Turns ─────────────────────────────────────────────────────────────────────

/// Outcome carried by a `tool_response` turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub status: ToolStatus,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Succeeded,
    Failed,
}

/// One event in a session's history, discriminated by the `type` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Turn {
    UserTask {
        instruction: String,
        timestamp: String,
    },
    ModelResponse {
        content: String,
        timestamp: String,
    },
    /// Tool name + JSON arguments as emitted by the model, e.g. `search({"q":"X"})`.
    FunctionCalling {
        response: String,
        timestamp: String,
    },
    ToolResponse {
        name: String,
        response: ToolResult,
        timestamp: String,
    },
    /// A summary that replaced `turns[start..=end]`.
    CompressedHistory {
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        original_turns_range: Option<(usize, usize)>,
        timestamp: String,
    },
}

impl Turn {
    pub fn timestamp(&self) -> &str {
        match self {
            Turn::UserTask { timestamp, .. }
            | Turn::ModelResponse { timestamp, .. }
            | Turn::FunctionCalling { timestamp, .. }
            | Turn::ToolResponse { timestamp, .. }
            | Turn::CompressedHistory { timestamp, .. } => timestamp,
        }
    }

    /// The wire name of this variant (matches the on-disk `type` tag).
    pub fn type_name(&self) -> &'static str {
        match self {
            Turn::UserTask { .. } => "user_task",
            Turn::ModelResponse { .. } => "model_response",
            Turn::FunctionCalling { .. } => "function_calling",
            Turn::ToolResponse { .. } => "tool_response",
            Turn::CompressedHistory { .. } => "compressed_history",
        }
    }

    pub fn user_task(instruction: impl Into<String>, timestamp: String) -> Self {
        Turn::UserTask { instruction: instruction.into(), timestamp }
    }

    pub fn model_response(content: impl Into<String>, timestamp: String) -> Self {
        Turn::ModelResponse { content: content.into(), timestamp }
    }
}

// ── References ────────────────────────────────────────────────────────────────

/// A file path attached to a session. While active, the assembler splices the
/// file's contents into the prompt. `ttl = None` means "use the collection
/// default"; a TTL that reaches 0 disables the reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<i64>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub persist: bool,
}

impl Reference {
    pub fn new(path: impl Into<String>, ttl: Option<i64>, persist: bool) -> Self {
        Self { path: path.into(), ttl, disabled: false, persist }
    }

    /// Active references are rendered into the prompt.
    pub fn is_active(&self) -> bool {
        !self.disabled && self.ttl.map(|t| t > 0).unwrap_or(true)
    }
}

// ── Todos ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TodoItem {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub checked: bool,
}

// ── Hyperparameters ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<f64>,
}

// ── Session ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub created_at: String,
    #[serde(default)]
    pub purpose: String,
    #[serde(default)]
    pub background: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub procedure: Option<String>,
    #[serde(default, deserialize_with = "null_as_false")]
    pub multi_step_reasoning_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hyperparameters: Option<Hyperparameters>,
    #[serde(default)]
    pub turns: Vec<Turn>,
    /// Uncommitted turns belonging to an in-flight instruction. Only the
    /// session's own agent process mutates this; it is drained into `turns`
    /// on commit and cleared on rollback.
    #[serde(default)]
    pub pools: Vec<Turn>,
    #[serde(default)]
    pub references: Vec<Reference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub todos: Option<Vec<TodoItem>>,
    #[serde(default)]
    pub artifacts: Vec<String>,
    #[serde(default)]
    pub token_count: u64,
    #[serde(default)]
    pub cached_content_token_count: u64,
    #[serde(default)]
    pub cumulative_total_tokens: u64,
    #[serde(default)]
    pub cumulative_cached_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_name: Option<String>,
    /// Number of leading turns already baked into `cache_name`.
    #[serde(default)]
    pub cached_turn_count: usize,
}

fn null_as_false<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    Ok(Option::<bool>::deserialize(d)?.unwrap_or(false))
}

impl Session {
    /// Committed turns followed by the pool, chronological. This is what the
    /// cache manager and prompt assembler operate on mid-instruction.
    pub fn full_history(&self) -> Vec<Turn> {
        let mut all = self.turns.clone();
        all.extend(self.pools.iter().cloned());
        all
    }
}

// ── Migration ─────────────────────────────────────────────────────────────────

/// Upgrade a raw session JSON object written by older releases in place:
/// - `multi_step_reasoning_enabled: null` becomes `false`,
/// - raw string todos become full `TodoItem`s,
/// - raw string references become full `Reference`s with `ttl = default_ttl`.
pub fn migrate_session_value(data: &mut Value, default_ttl: i64) {
    let Some(obj) = data.as_object_mut() else { return };

    if obj.get("multi_step_reasoning_enabled").map(Value::is_null).unwrap_or(false) {
        obj.insert("multi_step_reasoning_enabled".into(), Value::Bool(false));
    }

    if let Some(todos) = obj.get_mut("todos").and_then(Value::as_array_mut) {
        for todo in todos.iter_mut() {
            if let Value::String(title) = todo {
                *todo = serde_json::json!({
                    "title": title,
                    "description": "",
                    "checked": false,
                });
            }
        }
    }

    if let Some(refs) = obj.get_mut("references").and_then(Value::as_array_mut) {
        for r in refs.iter_mut() {
            if let Value::String(path) = r {
                *r = serde_json::json!({
                    "path": path,
                    "ttl": default_ttl,
                    "disabled": false,
                    "persist": false,
                });
            }
        }
    }
}

// ── Session index ─────────────────────────────────────────────────────────────

/// Process-wide index of all sessions, stored as `index.json` next to the
/// session files.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionIndex {
    #[serde(default)]
    pub sessions: BTreeMap<String, IndexEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated_at: Option<String>,
    /// Legacy key; folded into `last_updated_at` on read and never written.
    #[serde(default, skip_serializing)]
    pub last_updated: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
}

impl SessionIndex {
    /// Fold legacy `last_updated` keys into `last_updated_at`. When both are
    /// present the newer-schema key wins.
    pub fn migrate(&mut self) {
        for entry in self.sessions.values_mut() {
            if let Some(old) = entry.last_updated.take() {
                entry.last_updated_at.get_or_insert(old);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_turn_tagged_roundtrip() {
        let data = json!([
            {"type": "user_task", "instruction": "hi", "timestamp": "2025-01-01T00:00:00+00:00"},
            {"type": "model_response", "content": "hello", "timestamp": "2025-01-01T00:01:00+00:00"},
            {"type": "function_calling", "response": "search({\"q\":\"X\"})", "timestamp": "2025-01-01T00:02:00+00:00"},
            {"type": "tool_response", "name": "search",
             "response": {"status": "succeeded", "message": "3 hits"},
             "timestamp": "2025-01-01T00:03:00+00:00"},
        ]);
        let turns: Vec<Turn> = serde_json::from_value(data.clone()).unwrap();
        assert_eq!(turns[0].type_name(), "user_task");
        assert_eq!(turns[3].type_name(), "tool_response");
        assert_eq!(serde_json::to_value(&turns).unwrap(), data);
    }

    #[test]
    fn test_tool_status_wire_names() {
        assert_eq!(serde_json::to_value(ToolStatus::Succeeded).unwrap(), json!("succeeded"));
        assert_eq!(serde_json::to_value(ToolStatus::Failed).unwrap(), json!("failed"));
    }

    #[test]
    fn test_session_roundtrip_is_identity() {
        let raw = json!({
            "session_id": "abc",
            "created_at": "2025-01-01T00:00:00+00:00",
            "purpose": "P",
            "background": "B",
            "roles": ["roles/dev.md"],
            "multi_step_reasoning_enabled": true,
            "turns": [],
            "pools": [],
            "references": [{"path": "a.md", "ttl": 3, "disabled": false, "persist": false}],
            "artifacts": [],
            "token_count": 12,
            "cached_content_token_count": 0,
            "cumulative_total_tokens": 40,
            "cumulative_cached_tokens": 8,
            "cached_turn_count": 0
        });
        let session: Session = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(serde_json::to_value(&session).unwrap(), raw);
    }

    #[test]
    fn test_reference_activity() {
        assert!(Reference::new("a", None, false).is_active());
        assert!(Reference::new("a", Some(2), false).is_active());
        assert!(!Reference::new("a", Some(0), false).is_active());
        let mut r = Reference::new("a", Some(5), false);
        r.disabled = true;
        assert!(!r.is_active());
    }

    #[test]
    fn test_migrate_null_msr_and_string_collections() {
        let mut raw = json!({
            "session_id": "abc",
            "created_at": "2025-01-01T00:00:00+00:00",
            "multi_step_reasoning_enabled": null,
            "todos": ["write tests"],
            "references": ["notes.md", {"path": "kept.md", "ttl": 1, "disabled": false, "persist": true}]
        });
        migrate_session_value(&mut raw, 3);
        let session: Session = serde_json::from_value(raw).unwrap();

        assert!(!session.multi_step_reasoning_enabled);
        let todos = session.todos.unwrap();
        assert_eq!(todos[0], TodoItem { title: "write tests".into(), description: "".into(), checked: false });
        assert_eq!(session.references[0].ttl, Some(3));
        assert!(session.references[1].persist);
    }

    #[test]
    fn test_index_migrates_legacy_key() {
        let raw = json!({
            "sessions": {
                "old": {"last_updated": "2024-01-01T00:00:00+00:00"},
                "both": {"last_updated": "2024-01-01T00:00:00+00:00",
                         "last_updated_at": "2025-06-01T00:00:00+00:00"},
            }
        });
        let mut index: SessionIndex = serde_json::from_value(raw).unwrap();
        index.migrate();

        assert_eq!(
            index.sessions["old"].last_updated_at.as_deref(),
            Some("2024-01-01T00:00:00+00:00")
        );
        // Conflicting pair prefers the newer-schema key.
        assert_eq!(
            index.sessions["both"].last_updated_at.as_deref(),
            Some("2025-06-01T00:00:00+00:00")
        );
        let out = serde_json::to_value(&index).unwrap();
        assert!(out["sessions"]["old"].get("last_updated").is_none());
    }
}
