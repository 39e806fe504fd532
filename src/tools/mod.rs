/// Tool registry and dispatcher.
///
/// Every tool declares a compile-time descriptor (name, description, typed
/// parameters) and the registry renders OpenAPI-flavoured schemas from it.
/// Server-injected dependencies travel in [`ToolContext`], never through the
/// schema. Tool failure is data: the dispatcher normalises every outcome
/// into a `tool_response` turn and never unwinds the agent loop.
pub mod attach_references;
pub mod delete_session_turns;
pub mod delete_todos;
pub mod edit_session_meta;
pub mod edit_session_turn;
pub mod edit_todos;
pub mod get_session;
pub mod save_memory;
pub mod summarize_session_turns;
pub mod update_reference_ttl;

use std::path::Path;

use anyhow::{anyhow, Result};
use serde_json::{json, Value};

use crate::session::{ToolResult, ToolStatus, Turn};
use crate::settings::Settings;
use crate::store::SessionStore;

// ── Descriptors ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub enum ParamKind {
    String,
    Number,
    Boolean,
    StringArray,
    NumberArray,
    ObjectArray,
    Object,
}

#[derive(Debug, Clone, Copy)]
pub struct Param {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
    pub description: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub params: &'static [Param],
}

impl ToolSpec {
    /// `{name, description, inputSchema: {type: "object", properties, required}}`
    pub fn schema(&self) -> Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for p in self.params {
            let prop = match p.kind {
                ParamKind::String => json!({"type": "string", "description": p.description}),
                ParamKind::Number => json!({"type": "number", "description": p.description}),
                ParamKind::Boolean => json!({"type": "boolean", "description": p.description}),
                ParamKind::StringArray => {
                    json!({"type": "array", "items": {"type": "string"}, "description": p.description})
                }
                ParamKind::NumberArray => {
                    json!({"type": "array", "items": {"type": "number"}, "description": p.description})
                }
                ParamKind::ObjectArray => {
                    json!({"type": "array", "items": {"type": "object"}, "description": p.description})
                }
                ParamKind::Object => {
                    json!({"type": "object", "properties": {}, "description": p.description})
                }
            };
            properties.insert(p.name.to_string(), prop);
            if p.required {
                required.push(p.name);
            }
        }
        json!({
            "name": self.name,
            "description": self.description,
            "inputSchema": {
                "type": "object",
                "properties": properties,
                "required": required,
            }
        })
    }
}

/// All registered tools, in the order they are advertised.
pub fn all_specs() -> &'static [&'static ToolSpec] {
    static SPECS: &[&ToolSpec] = &[
        &get_session::SPEC,
        &save_memory::SPEC,
        &edit_todos::SPEC,
        &delete_todos::SPEC,
        &edit_session_turn::SPEC,
        &delete_session_turns::SPEC,
        &summarize_session_turns::SPEC,
        &edit_session_meta::SPEC,
        &attach_references::SPEC,
        &update_reference_ttl::SPEC,
    ];
    SPECS
}

pub fn schemas() -> Vec<Value> {
    all_specs().iter().map(|s| s.schema()).collect()
}

// ── Context ───────────────────────────────────────────────────────────────────

/// Injected dependencies available to every tool. `session_id` is the
/// context's current session; a tool-supplied `session_id` argument takes
/// precedence over it.
pub struct ToolContext<'a> {
    pub store: &'a SessionStore,
    pub session_id: Option<String>,
    pub settings: &'a Settings,
    pub project_root: &'a Path,
}

impl ToolContext<'_> {
    /// Resolve the session a tool call targets.
    pub fn target_session(&self, args: &Value) -> Result<String> {
        if let Some(explicit) = args.get("session_id").and_then(Value::as_str) {
            return Ok(explicit.to_string());
        }
        self.session_id
            .clone()
            .ok_or_else(|| anyhow!("no session_id supplied and no current session"))
    }
}

// ── Dispatch ──────────────────────────────────────────────────────────────────

/// Invoke a tool by name with raw arguments. Errors here (unknown tool,
/// traversal attempt, store failure) surface to the caller, which decides
/// whether to map them into a failed tool_response or a protocol error.
pub fn invoke(name: &str, args: &Value, ctx: &ToolContext) -> Result<Value> {
    if name.contains("..") || name.contains('/') {
        return Err(anyhow!("invalid tool name: '{name}'"));
    }
    match name {
        "get_session" => get_session::execute(args, ctx),
        "save_memory" => save_memory::execute(args, ctx),
        "edit_todos" => edit_todos::execute(args, ctx),
        "delete_todos" => delete_todos::execute(args, ctx),
        "edit_session_turn" => edit_session_turn::execute(args, ctx),
        "delete_session_turns" => delete_session_turns::execute(args, ctx),
        "summarize_session_turns" => summarize_session_turns::execute(args, ctx),
        "edit_session_meta" => edit_session_meta::execute(args, ctx),
        "attach_references" => attach_references::execute(args, ctx),
        "update_reference_ttl" => update_reference_ttl::execute(args, ctx),
        other => Err(anyhow!("tool '{other}' not found")),
    }
}

/// Normalise a raw tool outcome into the result recorded on the turn:
/// a mapping with a non-empty `error` is a failure; anything else succeeds
/// with `message` drawn from the result's `message` field when present.
pub fn normalize(outcome: Result<Value>) -> ToolResult {
    match outcome {
        Ok(value) => {
            if let Some(err) = value.get("error").and_then(Value::as_str) {
                if !err.is_empty() {
                    return ToolResult { status: ToolStatus::Failed, message: err.to_string() };
                }
            }
            let message = match value.get("message") {
                Some(Value::String(m)) => m.clone(),
                Some(other) => other.to_string(),
                None => match &value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                },
            };
            ToolResult { status: ToolStatus::Succeeded, message }
        }
        Err(e) => ToolResult { status: ToolStatus::Failed, message: e.to_string() },
    }
}

/// Full dispatcher path used by both the ReAct loop and the stdio server:
/// invoke, normalise, and append the `function_calling` + `tool_response`
/// pair to the session's pool.
pub fn execute_and_pool(
    name: &str,
    args: &Value,
    ctx: &ToolContext,
) -> crate::error::Result<ToolResult> {
    let result = normalize(invoke(name, args, ctx));

    if let Some(session_id) = resolved_session(ctx, args) {
        let call = Turn::FunctionCalling {
            response: format!("{name}({args})"),
            timestamp: ctx.store.now(),
        };
        ctx.store.append_pool(&session_id, call)?;
        let response = Turn::ToolResponse {
            name: name.to_string(),
            response: result.clone(),
            timestamp: ctx.store.now(),
        };
        ctx.store.append_pool(&session_id, response)?;
    }

    Ok(result)
}

fn resolved_session(ctx: &ToolContext, args: &Value) -> Option<String> {
    args.get("session_id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| ctx.session_id.clone())
}
