use anyhow::Result;
use serde_json::{json, Value};

use super::{ToolContext, ToolSpec};

pub static SPEC: ToolSpec = ToolSpec {
    name: "get_session",
    description: "Retrieve the full state of the current session: goal, turns, references, todos and token counters.",
    params: &[],
};

pub fn execute(args: &Value, ctx: &ToolContext) -> Result<Value> {
    let session_id = ctx.target_session(args)?;
    match ctx.store.find(&session_id)? {
        Some(session) => Ok(serde_json::to_value(session)?),
        None => Ok(json!({"error": format!("Session '{session_id}' not found.")})),
    }
}
