use anyhow::Result;
use serde_json::{json, Value};

use super::{ToolContext, ToolSpec};

pub static SPEC: ToolSpec = ToolSpec {
    name: "delete_todos",
    description: "Remove the session's todo list entirely.",
    params: &[],
};

pub fn execute(args: &Value, ctx: &ToolContext) -> Result<Value> {
    let session_id = ctx.target_session(args)?;
    ctx.store.atomic_update(&session_id, |session| {
        session.todos = None;
        Ok(())
    })?;
    Ok(json!({"message": "Todo list deleted."}))
}
