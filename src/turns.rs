/// Domain operations over a session's ordered turn sequence.
///
/// Turns are append-only except through the explicit operations here; every
/// mutating caller (store, tools) takes a backup first.
use chrono::DateTime;

use crate::error::{Error, Result};
use crate::session::{ToolStatus, Turn};

/// Message substituted into a succeeded tool response once it falls behind
/// the user-task expiration threshold.
pub const EXPIRED_MESSAGE: &str =
    "Expired. This tool response has been cleared because it was issued before the last user task threshold.";

// ── Edits ─────────────────────────────────────────────────────────────────────

/// Typed payload for [`edit_by_index`]. Only `user_task` and `model_response`
/// turns are editable.
#[derive(Debug, Clone)]
pub enum TurnEdit {
    Instruction(String),
    Content(String),
}

pub fn edit_by_index(turns: &mut [Turn], index: usize, edit: TurnEdit) -> Result<()> {
    let turn = turns
        .get_mut(index)
        .ok_or_else(|| Error::Validation(format!("turn index {index} out of range")))?;

    match (turn, edit) {
        (Turn::UserTask { instruction, .. }, TurnEdit::Instruction(new)) => {
            *instruction = new;
            Ok(())
        }
        (Turn::ModelResponse { content, .. }, TurnEdit::Content(new)) => {
            *content = new;
            Ok(())
        }
        (other, _) => Err(Error::Validation(format!(
            "editing turns of type '{}' is not allowed",
            other.type_name()
        ))),
    }
}

pub fn delete_by_index(turns: &mut Vec<Turn>, index: usize) -> Result<()> {
    if index >= turns.len() {
        return Err(Error::Validation(format!("turn index {index} out of range")));
    }
    turns.remove(index);
    Ok(())
}

/// Delete several turns at once. Indices refer to the collection before any
/// deletion, so the result is independent of their order.
pub fn delete_many(turns: &mut Vec<Turn>, indices: &[usize]) -> Result<()> {
    let mut sorted: Vec<usize> = indices.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    if let Some(&max) = sorted.last() {
        if max >= turns.len() {
            return Err(Error::Validation(format!("turn index {max} out of range")));
        }
    }
    for &i in sorted.iter().rev() {
        turns.remove(i);
    }
    Ok(())
}

// ── Prompt view ───────────────────────────────────────────────────────────────

/// Yield turns newest-first, keeping only the most recent `tool_response_limit`
/// tool responses. Non-tool turns always pass through, preserving the
/// interleaving the model expects. Callers reverse back to chronological
/// order before rendering.
pub fn get_for_prompt(turns: &[Turn], tool_response_limit: usize) -> Vec<&Turn> {
    let mut seen_tool_responses = 0usize;
    let mut out = Vec::with_capacity(turns.len());
    for turn in turns.iter().rev() {
        if matches!(turn, Turn::ToolResponse { .. }) {
            if seen_tool_responses >= tool_response_limit {
                continue;
            }
            seen_tool_responses += 1;
        }
        out.push(turn);
    }
    out
}

// ── Expiration ────────────────────────────────────────────────────────────────

/// Blank out succeeded tool responses older than the `threshold`-th most
/// recent user task. The status stays `succeeded`; only the message is
/// replaced, freeing tokens from output the model has already reasoned past.
/// Returns whether any turn changed.
pub fn expire_old_tool_responses(turns: &mut [Turn], threshold: usize) -> bool {
    let mut user_task_timestamps: Vec<String> = turns
        .iter()
        .filter_map(|t| match t {
            Turn::UserTask { timestamp, .. } => Some(timestamp.clone()),
            _ => None,
        })
        .collect();
    if threshold == 0 || user_task_timestamps.len() < threshold {
        return false;
    }
    user_task_timestamps.sort_unstable_by(|a, b| compare_timestamps(a, b));
    let cutoff = user_task_timestamps[user_task_timestamps.len() - threshold].clone();

    let mut changed = false;
    for turn in turns.iter_mut() {
        if let Turn::ToolResponse { response, timestamp, .. } = turn {
            if response.status == ToolStatus::Succeeded
                && response.message != EXPIRED_MESSAGE
                && compare_timestamps(timestamp, &cutoff) == std::cmp::Ordering::Less
            {
                response.message = EXPIRED_MESSAGE.to_string();
                changed = true;
            }
        }
    }
    changed
}

/// RFC3339-aware ordering; zone-less or malformed stamps fall back to a
/// lexicographic comparison.
fn compare_timestamps(a: &str, b: &str) -> std::cmp::Ordering {
    match (DateTime::parse_from_rfc3339(a), DateTime::parse_from_rfc3339(b)) {
        (Ok(ta), Ok(tb)) => ta.cmp(&tb),
        _ => a.cmp(b),
    }
}
