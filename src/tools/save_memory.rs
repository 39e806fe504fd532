use anyhow::Result;
use serde_json::{json, Value};

use super::{Param, ParamKind, ToolContext, ToolSpec};

pub static SPEC: ToolSpec = ToolSpec {
    name: "save_memory",
    description: "Save a specific fact to long-term memory so it survives across sessions.",
    params: &[Param {
        name: "fact",
        kind: ParamKind::String,
        required: true,
        description: "The fact to remember, one self-contained sentence",
    }],
};

/// Facts accumulate as markdown bullets under the project root.
pub fn execute(args: &Value, ctx: &ToolContext) -> Result<Value> {
    let Some(fact) = args.get("fact").and_then(Value::as_str).filter(|f| !f.trim().is_empty())
    else {
        return Ok(json!({"error": "save_memory requires a non-empty 'fact'."}));
    };

    let path = ctx.project_root.join("memory.md");
    let mut body = std::fs::read_to_string(&path).unwrap_or_default();
    if body.is_empty() {
        body.push_str("# Memory\n\n");
    }
    body.push_str(&format!("- {}\n", fact.trim()));
    std::fs::write(&path, body)?;

    Ok(json!({"message": "Fact saved."}))
}
