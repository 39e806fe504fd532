use anyhow::Result;
use serde_json::{json, Value};

use super::{Param, ParamKind, ToolContext, ToolSpec};
use crate::error::Error;

pub static SPEC: ToolSpec = ToolSpec {
    name: "summarize_session_turns",
    description: "Replace a range of committed turns with a single summary turn to reclaim context. A backup is taken first.",
    params: &[
        Param {
            name: "start_index",
            kind: ParamKind::Number,
            required: true,
            description: "0-based index of the first turn to replace",
        },
        Param {
            name: "end_index",
            kind: ParamKind::Number,
            required: true,
            description: "0-based index of the last turn to replace (inclusive)",
        },
        Param {
            name: "summary",
            kind: ParamKind::String,
            required: true,
            description: "Summary text standing in for the replaced turns",
        },
    ],
};

pub fn execute(args: &Value, ctx: &ToolContext) -> Result<Value> {
    let session_id = ctx.target_session(args)?;
    let (Some(start), Some(end)) = (
        args.get("start_index").and_then(Value::as_u64),
        args.get("end_index").and_then(Value::as_u64),
    ) else {
        return Ok(json!({"error": "summarize_session_turns requires numeric 'start_index' and 'end_index'."}));
    };
    let Some(summary) = args.get("summary").and_then(Value::as_str).filter(|s| !s.trim().is_empty())
    else {
        return Ok(json!({"error": "summarize_session_turns requires a non-empty 'summary'."}));
    };

    match ctx.store.replace_range_with_summary(&session_id, start as usize, end as usize, summary) {
        Ok(()) => Ok(json!({
            "message": format!("Replaced turns {start}..={end} with a summary.")
        })),
        Err(Error::Validation(msg)) => Ok(json!({"error": msg})),
        Err(e) => Err(e.into()),
    }
}
