use anyhow::Result;
use serde_json::{json, Value};

use super::{Param, ParamKind, ToolContext, ToolSpec};
use crate::error::Error;
use crate::refs;

pub static SPEC: ToolSpec = ToolSpec {
    name: "update_reference_ttl",
    description: "Set the TTL of an attached file reference. A TTL of 0 disables it; a positive TTL re-enables it.",
    params: &[
        Param {
            name: "path",
            kind: ParamKind::String,
            required: true,
            description: "Path of the reference to update",
        },
        Param {
            name: "ttl",
            kind: ParamKind::Number,
            required: true,
            description: "New TTL in prompt builds",
        },
    ],
};

pub fn execute(args: &Value, ctx: &ToolContext) -> Result<Value> {
    let session_id = ctx.target_session(args)?;
    let Some(path) = args.get("path").and_then(Value::as_str) else {
        return Ok(json!({"error": "update_reference_ttl requires 'path'."}));
    };
    let Some(ttl) = args.get("ttl").and_then(Value::as_i64) else {
        return Ok(json!({"error": "update_reference_ttl requires a numeric 'ttl'."}));
    };

    let default_ttl = ctx.store.default_ttl();
    let outcome = ctx.store.atomic_update(&session_id, |session| {
        refs::update_ttl(&mut session.references, path, ttl, default_ttl)
    });
    match outcome {
        Ok(()) => Ok(json!({"message": format!("Reference '{path}' TTL set to {ttl}.")})),
        Err(Error::NotFound(msg)) | Err(Error::Validation(msg)) => Ok(json!({"error": msg})),
        Err(e) => Err(e.into()),
    }
}
