/// LM transports.
///
/// The orchestrator core never touches a wire format: it hands a structured
/// [`Prompt`] plus the buffered turn suffix to a transport and gets back
/// text, at most one tool call, and token usage. Two transports exist:
/// a streaming HTTP API client and a subprocess CLI runner. Both also serve
/// as the [`ContentCache`] backend (the CLI one by declining every create).
use std::future::Future;
use std::process::Stdio;

use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::context::ContentCache;
use crate::error::{Error, Result};
use crate::prompt::Prompt;
use crate::session::{Hyperparameters, ToolStatus, Turn};

// ── Request / response ────────────────────────────────────────────────────────

pub struct LmRequest<'a> {
    pub prompt: &'a Prompt,
    /// Turns past the cache boundary, sent fresh alongside the cache handle.
    pub buffered_history: &'a [Turn],
    pub cache_name: Option<&'a str>,
    pub tools: &'a [Value],
    pub hyperparameters: Hyperparameters,
}

#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    pub name: String,
    pub args: Value,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LmUsage {
    pub prompt_tokens: u64,
    pub response_tokens: u64,
    pub cached_tokens: u64,
}

#[derive(Debug, Clone)]
pub struct LmResponse {
    pub text: String,
    pub tool_call: Option<ToolCallRequest>,
    pub usage: LmUsage,
}

impl LmUsage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.response_tokens
    }
}

pub trait LmTransport {
    fn generate(&self, req: &LmRequest<'_>) -> impl Future<Output = Result<LmResponse>> + Send;
}

// ── Streaming HTTP transport ──────────────────────────────────────────────────

pub struct HttpTransport {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl HttpTransport {
    pub fn new(endpoint: String, model: String, api_key: Option<String>) -> Self {
        Self { http: reqwest::Client::new(), endpoint, model, api_key }
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.header("Authorization", format!("Bearer {key}")),
            None => req,
        }
    }
}

// SSE delta types for accumulation.

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Option<Vec<StreamChoice>>,
    usage: Option<UsageStats>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Option<Delta>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageStats {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
    cached_tokens: Option<u64>,
}

impl LmTransport for HttpTransport {
    async fn generate(&self, req: &LmRequest<'_>) -> Result<LmResponse> {
        let mut body = json!({
            "model": self.model,
            "stream": true,
            "stream_options": {"include_usage": true},
            "messages": render_messages(req),
        });
        if !req.tools.is_empty() {
            body["tools"] = Value::Array(
                req.tools
                    .iter()
                    .map(|t| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": t["name"],
                                "description": t["description"],
                                "parameters": t["inputSchema"],
                            }
                        })
                    })
                    .collect(),
            );
            body["tool_choice"] = json!("auto");
        }
        if let Some(name) = req.cache_name {
            body["cached_content"] = json!(name);
        }
        if let Some(t) = req.hyperparameters.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(p) = req.hyperparameters.top_p {
            body["top_p"] = json!(p);
        }
        if let Some(k) = req.hyperparameters.top_k {
            body["top_k"] = json!(k);
        }

        let resp = self
            .authed(self.http.post(&self.endpoint).header("Content-Type", "application/json"))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::LmTransport(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::LmTransport(format!("API error {status}: {text}")));
        }

        let mut stream = resp.bytes_stream();
        let mut text_buf = String::new();
        let mut tool_name = String::new();
        let mut tool_args = String::new();
        let mut usage = LmUsage::default();
        let mut leftover = String::new();
        let mut saw_chunk = false;

        while let Some(chunk) = stream.next().await {
            let bytes = chunk.map_err(|e| Error::LmTransport(e.to_string()))?;
            let raw = std::str::from_utf8(&bytes).unwrap_or("");

            // SSE events may split across chunks; carry the tail over.
            let combined = format!("{leftover}{raw}");
            leftover.clear();

            for line in combined.lines() {
                let line = line.trim();
                if line.is_empty() || line == "data: [DONE]" {
                    continue;
                }
                let Some(json_str) = line.strip_prefix("data: ") else { continue };
                let parsed: StreamChunk = match serde_json::from_str(json_str) {
                    Ok(v) => v,
                    Err(_) => {
                        // Incomplete JSON split mid-chunk — retry next round.
                        leftover = line.to_string();
                        continue;
                    }
                };
                saw_chunk = true;

                if let Some(u) = parsed.usage {
                    usage.prompt_tokens = u.prompt_tokens.unwrap_or(0);
                    usage.response_tokens = u.completion_tokens.unwrap_or(0);
                    usage.cached_tokens = u.cached_tokens.unwrap_or(0);
                }
                for choice in parsed.choices.unwrap_or_default() {
                    let Some(delta) = choice.delta else { continue };
                    if let Some(text) = delta.content {
                        text_buf.push_str(&text);
                    }
                    for tc in delta.tool_calls.unwrap_or_default() {
                        if let Some(f) = tc.function {
                            if let Some(name) = f.name {
                                tool_name.push_str(&name);
                            }
                            if let Some(args) = f.arguments {
                                tool_args.push_str(&args);
                            }
                        }
                    }
                }
            }
        }

        if !saw_chunk {
            return Err(Error::LmTransport("model stream was empty".to_string()));
        }

        let tool_call = (!tool_name.is_empty()).then(|| ToolCallRequest {
            name: tool_name,
            args: serde_json::from_str(&tool_args).unwrap_or(json!({})),
        });
        debug!(tokens = usage.total(), tool = tool_call.is_some(), "stream complete");

        Ok(LmResponse { text: text_buf, tool_call, usage })
    }
}

impl ContentCache for HttpTransport {
    async fn create(&self, content: &str, ttl_secs: u64) -> anyhow::Result<String> {
        let url = format!("{}/cached_contents", self.endpoint.trim_end_matches('/'));
        let body = json!({
            "model": self.model,
            "contents": content,
            "ttl": format!("{ttl_secs}s"),
        });
        let resp = self.authed(self.http.post(&url)).json(&body).send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("cache create failed: {}", resp.status());
        }
        let value: Value = resp.json().await?;
        Ok(value["name"].as_str().unwrap_or_default().to_string())
    }

    async fn delete(&self, name: &str) -> anyhow::Result<()> {
        let url = format!("{}/cached_contents/{name}", self.endpoint.trim_end_matches('/'));
        let resp = self.authed(self.http.delete(&url)).send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("cache delete failed: {}", resp.status());
        }
        Ok(())
    }
}

// ── Subprocess CLI transport ──────────────────────────────────────────────────

/// Runs an external LM CLI per call, passing the rendered prompt with `-p`.
/// The CLI reaches tools back over the stdio JSON-RPC server, so a run that
/// used tools is detected from the session pool rather than from the output.
pub struct CliTransport {
    pub command: String,
    pub model: String,
    pub yolo: bool,
}

impl CliTransport {
    pub fn new(command: String, model: String, yolo: bool) -> Self {
        Self { command, model, yolo }
    }
}

impl LmTransport for CliTransport {
    async fn generate(&self, req: &LmRequest<'_>) -> Result<LmResponse> {
        let payload = render_cli_payload(req);

        let mut cmd = tokio::process::Command::new(&self.command);
        if self.yolo {
            cmd.arg("-y");
        }
        cmd.arg("-m").arg(&self.model).arg("-p").arg(&payload);
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

        let output = cmd.output().await.map_err(|e| {
            Error::LmTransport(format!("failed to spawn '{}': {e}", self.command))
        })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::LmTransport(format!(
                "'{}' exited with {}: {}",
                self.command,
                output.status,
                stderr.trim()
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout).to_string();
        let usage = LmUsage {
            prompt_tokens: crate::tokens::estimate_tokens(&payload),
            response_tokens: crate::tokens::estimate_tokens(&text),
            cached_tokens: 0,
        };
        Ok(LmResponse { text, tool_call: None, usage })
    }
}

impl ContentCache for CliTransport {
    async fn create(&self, _content: &str, _ttl_secs: u64) -> anyhow::Result<String> {
        Ok(String::new())
    }
    async fn delete(&self, _name: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

// ── Payload rendering ─────────────────────────────────────────────────────────

/// API message list: the structured prompt as the opening user message,
/// then the buffered suffix as alternating conversation messages.
fn render_messages(req: &LmRequest<'_>) -> Vec<Value> {
    let mut out = vec![json!({
        "role": "system",
        "content": req.prompt.to_json_string(),
    })];
    for turn in req.buffered_history {
        out.push(render_turn(turn));
    }
    if out.len() == 1 {
        out.push(json!({
            "role": "user",
            "content": req.prompt.current_task.instruction,
        }));
    }
    out
}

fn render_turn(turn: &Turn) -> Value {
    match turn {
        Turn::UserTask { instruction, .. } => json!({"role": "user", "content": instruction}),
        Turn::ModelResponse { content, .. } => json!({"role": "assistant", "content": content}),
        Turn::FunctionCalling { response, .. } => {
            json!({"role": "assistant", "content": response})
        }
        Turn::ToolResponse { name, response, .. } => json!({
            "role": "tool",
            "content": json!({
                "name": name,
                "status": match response.status {
                    ToolStatus::Succeeded => "succeeded",
                    ToolStatus::Failed => "failed",
                },
                "message": response.message,
            }).to_string(),
        }),
        Turn::CompressedHistory { content, .. } => json!({"role": "user", "content": content}),
    }
}

/// One self-contained JSON document for `-p`. The prompt already carries the
/// filtered conversation history, so the CLI needs nothing else.
fn render_cli_payload(req: &LmRequest<'_>) -> String {
    serde_json::to_value(req.prompt).unwrap_or_default().to_string()
}

/// Response text used when the stream technically succeeded but produced no
/// usable text.
pub const EMPTY_STREAM_TEXT: &str = "API Error: Model stream ended with empty response text.";

/// Guard against committing an empty model response.
pub fn non_empty_text(text: String) -> String {
    if text.trim().is_empty() {
        EMPTY_STREAM_TEXT.to_string()
    } else {
        text
    }
}

// ── Selection ─────────────────────────────────────────────────────────────────

/// Pick a transport for the configured `api_mode`.
pub enum Transport {
    Http(HttpTransport),
    Cli(CliTransport),
}

impl Transport {
    pub fn from_settings(settings: &crate::settings::Settings) -> Result<Self> {
        match settings.api_mode.as_str() {
            "api" => {
                let endpoint = std::env::var("BATON_ENDPOINT")
                    .unwrap_or_else(|_| "https://api.example.com/v1/chat/completions".to_string());
                let api_key = std::env::var("BATON_API_KEY").ok();
                Ok(Transport::Http(HttpTransport::new(
                    endpoint,
                    settings.model.name.clone(),
                    api_key,
                )))
            }
            "cli" => Ok(Transport::Cli(CliTransport::new(
                std::env::var("BATON_CLI").unwrap_or_else(|_| "gemini".to_string()),
                settings.model.name.clone(),
                settings.yolo,
            ))),
            other => Err(Error::Validation(format!("unknown api_mode '{other}'"))),
        }
    }
}

impl LmTransport for Transport {
    async fn generate(&self, req: &LmRequest<'_>) -> Result<LmResponse> {
        match self {
            Transport::Http(t) => t.generate(req).await,
            Transport::Cli(t) => t.generate(req).await,
        }
    }
}

impl ContentCache for Transport {
    async fn create(&self, content: &str, ttl_secs: u64) -> anyhow::Result<String> {
        match self {
            Transport::Http(t) => t.create(content, ttl_secs).await,
            Transport::Cli(t) => t.create(content, ttl_secs).await,
        }
    }
    async fn delete(&self, name: &str) -> anyhow::Result<()> {
        match self {
            Transport::Http(t) => t.delete(name).await,
            Transport::Cli(t) => t.delete(name).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ToolResult;

    fn request_fixture<'a>(
        prompt: &'a Prompt,
        buffered: &'a [Turn],
        tools: &'a [Value],
    ) -> LmRequest<'a> {
        LmRequest {
            prompt,
            buffered_history: buffered,
            cache_name: None,
            tools,
            hyperparameters: Hyperparameters::default(),
        }
    }

    fn minimal_prompt() -> Prompt {
        let session: crate::session::Session = serde_json::from_value(serde_json::json!({
            "session_id": "s", "created_at": "2025-01-01T00:00:00+00:00",
            "purpose": "P", "background": "B",
        }))
        .unwrap();
        let dir = tempfile::tempdir().unwrap();
        crate::prompt::build(&session, &crate::settings::Settings::default(), Some("go"), dir.path())
    }

    #[test]
    fn test_render_turn_roles() {
        let tool = Turn::ToolResponse {
            name: "search".into(),
            response: ToolResult { status: ToolStatus::Succeeded, message: "3 hits".into() },
            timestamp: "t".into(),
        };
        let v = render_turn(&tool);
        assert_eq!(v["role"], "tool");
        assert!(v["content"].as_str().unwrap().contains("3 hits"));

        let user = render_turn(&Turn::user_task("hi", "t".into()));
        assert_eq!(user["role"], "user");
        let model = render_turn(&Turn::model_response("yo", "t".into()));
        assert_eq!(model["role"], "assistant");
    }

    #[test]
    fn test_render_messages_includes_buffered_suffix() {
        let prompt = minimal_prompt();
        let buffered = vec![
            Turn::user_task("go", "t".into()),
            Turn::model_response("ok", "t".into()),
        ];
        let msgs = render_messages(&request_fixture(&prompt, &buffered, &[]));
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[0]["role"], "system");
        assert_eq!(msgs[1]["role"], "user");
        assert_eq!(msgs[2]["role"], "assistant");
    }

    #[test]
    fn test_render_messages_falls_back_to_instruction() {
        let prompt = minimal_prompt();
        let msgs = render_messages(&request_fixture(&prompt, &[], &[]));
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[1]["content"], "go");
    }

    #[test]
    fn test_non_empty_text_guard() {
        assert_eq!(non_empty_text("  \n".to_string()), EMPTY_STREAM_TEXT);
        assert_eq!(non_empty_text("fine".to_string()), "fine");
    }
}
