use anyhow::Result;
use serde_json::{json, Value};

use super::{Param, ParamKind, ToolContext, ToolSpec};
use crate::store::MetaUpdate;

pub static SPEC: ToolSpec = ToolSpec {
    name: "edit_session_meta",
    description: "Update a session's purpose, background or multi-step-reasoning flag. A backup is taken first.",
    params: &[
        Param {
            name: "purpose",
            kind: ParamKind::String,
            required: false,
            description: "New session purpose",
        },
        Param {
            name: "background",
            kind: ParamKind::String,
            required: false,
            description: "New session background",
        },
        Param {
            name: "multi_step_reasoning_enabled",
            kind: ParamKind::Boolean,
            required: false,
            description: "Toggle the multi-step reasoning boilerplate",
        },
        Param {
            name: "hyperparameters",
            kind: ParamKind::Object,
            required: false,
            description: "New sampling settings: {temperature, top_p, top_k}",
        },
    ],
};

pub fn execute(args: &Value, ctx: &ToolContext) -> Result<Value> {
    let session_id = ctx.target_session(args)?;
    let hyperparameters = match args.get("hyperparameters") {
        Some(raw) => match serde_json::from_value(raw.clone()) {
            Ok(h) => Some(h),
            Err(e) => return Ok(json!({"error": format!("invalid hyperparameters: {e}")})),
        },
        None => None,
    };
    let update = MetaUpdate {
        purpose: args.get("purpose").and_then(Value::as_str).map(str::to_string),
        background: args.get("background").and_then(Value::as_str).map(str::to_string),
        multi_step_reasoning_enabled: args
            .get("multi_step_reasoning_enabled")
            .and_then(Value::as_bool),
        token_count: None,
        hyperparameters,
    };
    if update.purpose.is_none()
        && update.background.is_none()
        && update.multi_step_reasoning_enabled.is_none()
        && update.hyperparameters.is_none()
    {
        return Ok(json!({"error": "edit_session_meta requires at least one field to change."}));
    }

    ctx.store.edit_meta(&session_id, update)?;
    Ok(json!({"message": "Session metadata updated."}))
}
