use anyhow::Result;
use serde_json::{json, Value};

use super::{Param, ParamKind, ToolContext, ToolSpec};
use crate::error::Error;

pub static SPEC: ToolSpec = ToolSpec {
    name: "delete_session_turns",
    description: "Delete one or more turns from the committed history by index.",
    params: &[Param {
        name: "turn_indices",
        kind: ParamKind::NumberArray,
        required: true,
        description: "0-based indices into the session's turns, any order",
    }],
};

pub fn execute(args: &Value, ctx: &ToolContext) -> Result<Value> {
    let session_id = ctx.target_session(args)?;
    let Some(raw) = args.get("turn_indices").and_then(Value::as_array) else {
        return Ok(json!({"error": "delete_session_turns requires a 'turn_indices' array."}));
    };
    let indices: Vec<usize> = raw.iter().filter_map(Value::as_u64).map(|n| n as usize).collect();
    if indices.len() != raw.len() {
        return Ok(json!({"error": "turn_indices must contain only non-negative integers."}));
    }

    match ctx.store.delete_turns(&session_id, &indices) {
        Ok(()) => Ok(json!({"message": format!("Deleted {} turns.", indices.len())})),
        Err(Error::Validation(msg)) => Ok(json!({"error": msg})),
        Err(e) => Err(e.into()),
    }
}
