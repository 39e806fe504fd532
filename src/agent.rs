/// The ReAct loop.
///
/// One instruction drives one run: build a prompt, stream the model, dispatch
/// tool calls, and accumulate everything in the session's pool. The pool only
/// reaches the committed `turns` in a single atomic save once the model halts
/// with plain text — every failure path clears it instead, so `turns` never
/// contains a half-finished cycle.
use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::warn;

use crate::context::{CacheManager, ContentCache};
use crate::error::{Error, Result};
use crate::prompt;
use crate::session::{Session, ToolStatus, Turn};
use crate::settings::Settings;
use crate::store::SessionStore;
use crate::tokens::{self, TokenCountSummary};
use crate::tools::{self, ToolContext};
use crate::transport::{non_empty_text, LmRequest, LmTransport, LmUsage};

/// Safety bound on pool depth: past this many uncommitted turns the loop is
/// assumed to be stuck in runaway recursion and is aborted.
const MAX_POOL_DEPTH: usize = 7;

// ── Run arguments & events ────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct RunArgs {
    pub session_id: Option<String>,
    pub purpose: Option<String>,
    pub background: Option<String>,
    pub roles: Vec<String>,
    pub parent: Option<String>,
    pub instruction: String,
    pub references: Vec<String>,
    pub multi_step_reasoning: bool,
    pub dry_run: bool,
}

/// Progress events, rendered by the caller as NDJSON (`stream-json`) or text.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AgentEvent {
    SessionCreated { session_id: String },
    ToolCall { name: String, args: serde_json::Value },
    ToolResult { name: String, status: String, message: String },
    ModelResponse { content: String },
    TokenStats { prompt_tokens: u64, response_tokens: u64, cached_tokens: u64 },
    Done { session_id: String, turns_committed: usize },
    Error { error: String },
}

pub struct Runner<'a, T> {
    pub store: &'a SessionStore,
    pub settings: &'a Settings,
    pub transport: &'a T,
    pub project_root: &'a Path,
    pub events: mpsc::UnboundedSender<AgentEvent>,
}

// ── PID file ──────────────────────────────────────────────────────────────────

/// RAII handle on `.processes/<session_id>.pid`; removed on drop so the
/// supervisor sees the session as idle on every exit path.
struct PidFile {
    path: PathBuf,
}

impl PidFile {
    fn write(project_root: &Path, session_id: &str) -> Result<Self> {
        let path = pid_path(project_root, session_id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, std::process::id().to_string())?;
        Ok(Self { path })
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

pub fn pid_path(project_root: &Path, session_id: &str) -> PathBuf {
    let safe = session_id.replace('/', "__");
    project_root.join(".processes").join(format!("{safe}.pid"))
}

// ── Runner ────────────────────────────────────────────────────────────────────

impl<T: LmTransport + ContentCache + Sync> Runner<'_, T> {
    /// Execute one instruction to completion. Returns the session ID on
    /// success; on failure the pool has been rolled back.
    pub async fn run(&self, args: &RunArgs) -> Result<String> {
        let session = self.prepare_session(args)?;
        let session_id = session.session_id.clone();

        if args.dry_run {
            let rendered = prompt::build(
                &session,
                self.settings,
                Some(&args.instruction),
                self.project_root,
            );
            println!("{}", rendered.to_json_string());
            return Ok(session_id);
        }

        // The instruction enters the pool, not the committed turns.
        self.store.append_pool(
            &session_id,
            Turn::user_task(args.instruction.clone(), self.store.now()),
        )?;
        let _pid = PidFile::write(self.project_root, &session_id)?;

        match self.react_loop(&session_id, &args.instruction).await {
            Ok(usage) => {
                let committed = self.commit(&session_id, usage)?;
                let _ = self.events.send(AgentEvent::Done {
                    session_id: session_id.clone(),
                    turns_committed: committed,
                });
                Ok(session_id)
            }
            Err(e) => {
                // Never leave a half-finished cycle behind.
                if let Err(rollback_err) = self.store.clear_pool(&session_id) {
                    warn!(session_id = %session_id, "rollback failed: {rollback_err}");
                }
                let _ = self.events.send(AgentEvent::Error { error: e.to_string() });
                Err(e)
            }
        }
    }

    /// Load or create the target session and apply run-scoped mutations
    /// (multi-step-reasoning override, newly attached references). A dry run
    /// assembles everything in memory and writes nothing.
    fn prepare_session(&self, args: &RunArgs) -> Result<Session> {
        let mut session = match &args.session_id {
            Some(id) => self
                .store
                .find(id)?
                .ok_or_else(|| Error::NotFound(format!("session '{id}'")))?,
            None => {
                let (Some(purpose), Some(background)) = (&args.purpose, &args.background) else {
                    return Err(Error::Validation(
                        "a new session requires --purpose and --background".to_string(),
                    ));
                };
                if args.dry_run {
                    self.unsaved_session(purpose, background, args)
                } else {
                    let session = self.store.create(
                        purpose,
                        background,
                        &args.roles,
                        args.multi_step_reasoning,
                        None,
                        args.parent.as_deref(),
                    )?;
                    let _ = self.events.send(AgentEvent::SessionCreated {
                        session_id: session.session_id.clone(),
                    });
                    session
                }
            }
        };

        let mut dirty = false;
        if args.multi_step_reasoning && !session.multi_step_reasoning_enabled {
            session.multi_step_reasoning_enabled = true;
            dirty = true;
        }
        for path in &args.references {
            let path = path.trim();
            if path.is_empty() {
                continue;
            }
            if crate::refs::add(
                &mut session.references,
                path,
                Some(self.settings.reference_ttl),
                false,
                self.store.default_ttl(),
            ) {
                dirty = true;
            }
        }
        if dirty && !args.dry_run {
            self.store.save(&session)?;
        }
        Ok(session)
    }

    fn unsaved_session(&self, purpose: &str, background: &str, args: &RunArgs) -> Session {
        Session {
            session_id: "dry-run".to_string(),
            created_at: self.store.now(),
            purpose: purpose.to_string(),
            background: background.to_string(),
            roles: args.roles.clone(),
            procedure: None,
            multi_step_reasoning_enabled: args.multi_step_reasoning,
            hyperparameters: Some(self.settings.default_hyperparameters()),
            turns: Vec::new(),
            pools: Vec::new(),
            references: Vec::new(),
            todos: None,
            artifacts: Vec::new(),
            token_count: 0,
            cached_content_token_count: 0,
            cumulative_total_tokens: 0,
            cumulative_cached_tokens: 0,
            cache_name: None,
            cached_turn_count: 0,
        }
    }

    async fn react_loop(&self, session_id: &str, instruction: &str) -> Result<LmUsage> {
        let cache_manager = CacheManager::new(self.store.sessions_dir(), self.store.timezone());
        let tool_schemas = tools::schemas();
        let mut usage = LmUsage::default();

        loop {
            // Reference TTLs age once per iteration, before the prompt is built.
            let threshold = self.settings.tool_response_expiration;
            let default_ttl = self.store.default_ttl();
            let mut session = self.store.atomic_update(session_id, |session| {
                crate::refs::decrement_all_ttl(&mut session.references, default_ttl);
                crate::turns::expire_old_tool_responses(&mut session.turns, threshold);
                Ok(session.clone())
            })?;

            if session.pools.len() >= MAX_POOL_DEPTH {
                warn!(
                    session_id,
                    depth = session.pools.len(),
                    "pool depth reached the safety bound, aborting run"
                );
                return Err(Error::Validation(format!(
                    "session pool reached the safety bound ({MAX_POOL_DEPTH}); aborting to prevent a runaway loop"
                )));
            }

            let full_history = session.full_history();
            let rendered = prompt::build(&session, self.settings, Some(instruction), self.project_root);
            let prompt_tokens = tokens::estimate_tokens(&rendered.to_json_string());
            tokens::check_limit(prompt_tokens, self.settings.context_limit)?;

            let boundary = session.cached_turn_count.min(full_history.len());
            let summary = TokenCountSummary {
                cached_tokens: session.cached_content_token_count,
                current_prompt_tokens: prompt_tokens,
                buffered_tokens: tokens::estimate_turns(&full_history[boundary..]),
            };

            let payload_base = session.clone();
            let decision = cache_manager
                .update_if_needed(
                    &mut session,
                    &full_history,
                    summary,
                    self.settings.model.cache_update_threshold,
                    self.transport,
                    |cached_count| {
                        // Static payload: everything except the churning tail.
                        let mut frozen = payload_base;
                        frozen.turns = full_history[..cached_count].to_vec();
                        frozen.pools.clear();
                        prompt::build(&frozen, self.settings, None, self.project_root)
                            .to_json_string()
                    },
                )
                .await?;
            self.persist_cache_state(session_id, &session)?;

            let request = LmRequest {
                prompt: &rendered,
                buffered_history: &decision.buffered_history,
                cache_name: decision.cache_name.as_deref(),
                tools: &tool_schemas,
                hyperparameters: session.hyperparameters.clone().unwrap_or_default(),
            };
            let response = self.transport.generate(&request).await?;

            usage.prompt_tokens = response.usage.prompt_tokens;
            usage.response_tokens = response.usage.response_tokens;
            usage.cached_tokens = response.usage.cached_tokens;
            let _ = self.events.send(AgentEvent::TokenStats {
                prompt_tokens: response.usage.prompt_tokens,
                response_tokens: response.usage.response_tokens,
                cached_tokens: response.usage.cached_tokens,
            });
            self.accumulate_usage(session_id, &response.usage)?;

            let Some(call) = response.tool_call else {
                // Terminal text: the instruction is complete.
                let text = non_empty_text(response.text);
                let _ = self.events.send(AgentEvent::ModelResponse { content: text.clone() });
                self.store
                    .append_pool(session_id, Turn::model_response(text, self.store.now()))?;
                return Ok(usage);
            };

            let _ = self.events.send(AgentEvent::ToolCall {
                name: call.name.clone(),
                args: call.args.clone(),
            });
            let ctx = ToolContext {
                store: self.store,
                session_id: Some(session_id.to_string()),
                settings: self.settings,
                project_root: self.project_root,
            };
            // Failure is data: the result lands in the pool either way and
            // the model sees it next iteration.
            let result = tools::execute_and_pool(&call.name, &call.args, &ctx)?;
            let _ = self.events.send(AgentEvent::ToolResult {
                name: call.name,
                status: match result.status {
                    ToolStatus::Succeeded => "succeeded".to_string(),
                    ToolStatus::Failed => "failed".to_string(),
                },
                message: result.message,
            });
        }
    }

    /// Drain the pool into `turns` in one save. Returns how many turns landed.
    fn commit(&self, session_id: &str, usage: LmUsage) -> Result<usize> {
        self.store.atomic_update(session_id, |session| {
            let drained = std::mem::take(&mut session.pools);
            let count = drained.len();
            session.turns.extend(drained);
            if usage.total() > 0 {
                session.token_count = usage.total();
            }
            Ok(count)
        })
    }

    fn accumulate_usage(&self, session_id: &str, usage: &LmUsage) -> Result<()> {
        self.store.atomic_update(session_id, |session| {
            session.cumulative_total_tokens += usage.total();
            session.cumulative_cached_tokens += usage.cached_tokens;
            session.cached_content_token_count = usage.cached_tokens;
            Ok(())
        })
    }

    fn persist_cache_state(&self, session_id: &str, current: &Session) -> Result<()> {
        let (name, count) = (current.cache_name.clone(), current.cached_turn_count);
        self.store.atomic_update(session_id, |session| {
            session.cache_name = name;
            session.cached_turn_count = count;
            Ok(())
        })
    }
}
