/// Token accounting.
///
/// Real counts come back from the LM transport per call; everything the
/// orchestrator decides ahead of a call (context-limit abort, cache rebuild)
/// runs on a cheap deterministic estimate — no model calls to save tokens.
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::session::Turn;

// ── Estimation (1 token ≈ 4 chars) ────────────────────────────────────────────

pub fn estimate_tokens(s: &str) -> u64 {
    // chars().count() instead of len() — avoids overestimating multi-byte text
    (s.chars().count() / 4) as u64 + 10
}

pub fn estimate_turn(turn: &Turn) -> u64 {
    match turn {
        Turn::UserTask { instruction, .. } => estimate_tokens(instruction),
        Turn::ModelResponse { content, .. } => estimate_tokens(content),
        Turn::FunctionCalling { response, .. } => estimate_tokens(response),
        Turn::ToolResponse { name, response, .. } => {
            estimate_tokens(name) + estimate_tokens(&response.message)
        }
        Turn::CompressedHistory { content, .. } => estimate_tokens(content),
    }
}

pub fn estimate_turns(turns: &[Turn]) -> u64 {
    turns.iter().map(estimate_turn).sum()
}

// ── Per-iteration summary consumed by the cache manager ───────────────────────

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenCountSummary {
    /// Tokens already baked into the server-side cache.
    pub cached_tokens: u64,
    /// Tokens in the prompt about to be sent.
    pub current_prompt_tokens: u64,
    /// Tokens in turns not yet in the cache.
    pub buffered_tokens: u64,
}

/// Abort the instruction when the rendered prompt would exceed the hard
/// context limit.
pub fn check_limit(tokens: u64, limit: u64) -> Result<()> {
    if tokens > limit {
        return Err(Error::ContextOverflow { tokens, limit });
    }
    Ok(())
}
