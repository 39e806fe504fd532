use anyhow::Result;
use serde_json::{json, Value};

use super::{Param, ParamKind, ToolContext, ToolSpec};
use crate::error::Error;
use crate::turns::TurnEdit;

pub static SPEC: ToolSpec = ToolSpec {
    name: "edit_session_turn",
    description: "Edit a single turn in the committed history. Only user_task (instruction) and model_response (content) turns can be edited.",
    params: &[
        Param {
            name: "turn_index",
            kind: ParamKind::Number,
            required: true,
            description: "0-based index into the session's turns",
        },
        Param {
            name: "instruction",
            kind: ParamKind::String,
            required: false,
            description: "New instruction for a user_task turn",
        },
        Param {
            name: "content",
            kind: ParamKind::String,
            required: false,
            description: "New content for a model_response turn",
        },
    ],
};

pub fn execute(args: &Value, ctx: &ToolContext) -> Result<Value> {
    let session_id = ctx.target_session(args)?;
    let Some(index) = args.get("turn_index").and_then(Value::as_u64) else {
        return Ok(json!({"error": "edit_session_turn requires a numeric 'turn_index'."}));
    };

    let edit = match (
        args.get("instruction").and_then(Value::as_str),
        args.get("content").and_then(Value::as_str),
    ) {
        (Some(i), None) => TurnEdit::Instruction(i.to_string()),
        (None, Some(c)) => TurnEdit::Content(c.to_string()),
        _ => {
            return Ok(json!({
                "error": "Provide exactly one of 'instruction' (user_task) or 'content' (model_response)."
            }))
        }
    };

    match ctx.store.edit_turn(&session_id, index as usize, edit) {
        Ok(()) => Ok(json!({"message": format!("Edited turn {index}.")})),
        Err(Error::Validation(msg)) => Ok(json!({"error": msg})),
        Err(e) => Err(e.into()),
    }
}
