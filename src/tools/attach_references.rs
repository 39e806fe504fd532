use anyhow::Result;
use serde_json::{json, Value};

use super::{Param, ParamKind, ToolContext, ToolSpec};
use crate::refs;

pub static SPEC: ToolSpec = ToolSpec {
    name: "attach_references",
    description: "Attach file paths to the session so their contents appear in the prompt while their TTL lasts. Already-attached paths are skipped.",
    params: &[Param {
        name: "paths",
        kind: ParamKind::StringArray,
        required: true,
        description: "File paths to attach, relative to the project root",
    }],
};

pub fn execute(args: &Value, ctx: &ToolContext) -> Result<Value> {
    let session_id = ctx.target_session(args)?;
    let Some(raw) = args.get("paths").and_then(Value::as_array) else {
        return Ok(json!({"error": "attach_references requires a 'paths' array."}));
    };
    let paths: Vec<&str> = raw.iter().filter_map(Value::as_str).collect();
    if paths.is_empty() {
        return Ok(json!({"error": "attach_references requires at least one path."}));
    }

    let ttl = ctx.settings.reference_ttl;
    let default_ttl = ctx.store.default_ttl();
    let added = ctx.store.atomic_update(&session_id, |session| {
        let mut added = 0usize;
        for path in &paths {
            if refs::add(&mut session.references, path.trim(), Some(ttl), false, default_ttl) {
                added += 1;
            }
        }
        Ok(added)
    })?;

    Ok(json!({"message": format!("Attached {added} new references.")}))
}
