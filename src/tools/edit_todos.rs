use anyhow::Result;
use serde_json::{json, Value};

use super::{Param, ParamKind, ToolContext, ToolSpec};
use crate::session::TodoItem;

pub static SPEC: ToolSpec = ToolSpec {
    name: "edit_todos",
    description: "Replace the session's todo list. Each item is {title, description, checked}.",
    params: &[Param {
        name: "todos",
        kind: ParamKind::ObjectArray,
        required: true,
        description: "The complete new todo list",
    }],
};

pub fn execute(args: &Value, ctx: &ToolContext) -> Result<Value> {
    let session_id = ctx.target_session(args)?;
    let Some(raw) = args.get("todos") else {
        return Ok(json!({"error": "edit_todos requires a 'todos' array."}));
    };
    let todos: Vec<TodoItem> = match serde_json::from_value(raw.clone()) {
        Ok(t) => t,
        Err(e) => return Ok(json!({"error": format!("invalid todos: {e}")})),
    };

    let count = todos.len();
    ctx.store.atomic_update(&session_id, |session| {
        session.todos = Some(todos);
        Ok(())
    })?;
    Ok(json!({"message": format!("Updated todo list ({count} items).")}))
}
