/// Stdio tool server.
///
/// A long-running process speaking newline-framed JSON-RPC 2.0 on
/// stdin/stdout, exposing the tool registry to an external LM CLI. stdout
/// carries protocol traffic only; malformed input lines are dropped
/// silently and anything that escapes a request handler goes to a dedicated
/// error log so it can never corrupt the stream.
use std::io::Write;
use std::path::Path;

use serde_json::{json, Value};
use tokio::io::AsyncBufReadExt;
use tracing::debug;

use crate::error::Result;
use crate::settings::Settings;
use crate::store::SessionStore;
use crate::tools::{self, ToolContext};

/// Environment variable the external CLI sets to pin tool calls to its
/// session. Without it, tools that need a session fail validation.
pub const SESSION_ENV_VAR: &str = "BATON_SESSION_ID";

const DEFAULT_PROTOCOL_VERSION: &str = "2025-06-18";

pub struct RpcServer<'a> {
    pub store: &'a SessionStore,
    pub settings: &'a Settings,
    pub project_root: &'a Path,
}

impl RpcServer<'_> {
    /// Read requests from stdin until it closes.
    pub async fn serve(&self) -> Result<()> {
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        let mut lines = stdin.lines();
        let mut stdout = std::io::stdout();

        while let Some(line) = lines.next_line().await? {
            let Some(response) = self.handle_line(&line) else { continue };
            let payload = response.to_string();
            writeln!(stdout, "{payload}")?;
            stdout.flush()?;
        }
        Ok(())
    }

    /// One request line in, at most one response out. Invalid JSON and
    /// notifications produce nothing.
    pub fn handle_line(&self, line: &str) -> Option<Value> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let request: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(_) => {
                debug!("dropping malformed request line");
                return None;
            }
        };
        let out = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.handle_request(&request)
        }));
        match out {
            Ok(response) => response,
            Err(panic) => {
                self.log_fatal(&format!("handler panic: {panic:?}"));
                let id = request.get("id").cloned().unwrap_or(Value::Null);
                Some(error_response(id, -32603, "internal error"))
            }
        }
    }

    pub fn handle_request(&self, request: &Value) -> Option<Value> {
        let method = request.get("method").and_then(Value::as_str).unwrap_or_default();
        let id = request.get("id").cloned().unwrap_or(Value::Null);
        let params = request.get("params").cloned().unwrap_or_else(|| json!({}));

        match method {
            "initialize" => {
                let version = params
                    .get("protocolVersion")
                    .and_then(Value::as_str)
                    .unwrap_or(DEFAULT_PROTOCOL_VERSION);
                Some(json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": {
                        "protocolVersion": version,
                        "capabilities": {"tools": {"call": true, "list": true}},
                        "serverInfo": {"name": "baton_tool_server", "version": env!("CARGO_PKG_VERSION")},
                        "tools": tools::schemas(),
                        "prompts": [],
                    }
                }))
            }
            "tools/list" => Some(json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {"tools": tools::schemas(), "prompts": []}
            })),
            "tools/call" => {
                let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
                // Some clients send `args`, others `arguments`.
                let args = params
                    .get("args")
                    .filter(|a| !a.is_null() && a.as_object().map(|o| !o.is_empty()).unwrap_or(true))
                    .or_else(|| params.get("arguments"))
                    .cloned()
                    .unwrap_or_else(|| json!({}));
                Some(self.call_tool(id, name, &args))
            }
            // Legacy alias for tools/call.
            "run_tool" => {
                let name = params.get("tool_name").and_then(Value::as_str).unwrap_or_default();
                let args = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
                Some(self.call_tool(id, name, &args))
            }
            "ping" => Some(json!({"jsonrpc": "2.0", "id": id, "result": {}})),
            m if m.starts_with("notifications/") => None,
            other => Some(error_response(id, -32601, &format!("Method not found: {other}"))),
        }
    }

    fn call_tool(&self, id: Value, name: &str, args: &Value) -> Value {
        let ctx = ToolContext {
            store: self.store,
            session_id: std::env::var(SESSION_ENV_VAR).ok(),
            settings: self.settings,
            project_root: self.project_root,
        };

        match tools::invoke(name, args, &ctx) {
            Ok(result) => {
                if let Some(err) = result.get("error").and_then(Value::as_str) {
                    if !err.is_empty() {
                        return error_response(
                            id,
                            -32000,
                            &format!("Tool '{name}' failed: {err}"),
                        );
                    }
                }
                // Mirror the in-process dispatcher: record the cycle in the
                // session pool before answering.
                if let Err(e) = self.record_cycle(name, args, &result, &ctx) {
                    self.log_fatal(&format!("failed to pool tool cycle: {e}"));
                }
                json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": {"status": "succeeded", "result": result}
                })
            }
            Err(e) => error_response(id, -32603, &e.to_string()),
        }
    }

    fn record_cycle(
        &self,
        name: &str,
        args: &Value,
        result: &Value,
        ctx: &ToolContext,
    ) -> Result<()> {
        let Ok(session_id) = ctx.target_session(args) else {
            return Ok(());
        };
        if self.store.find(&session_id)?.is_none() {
            return Ok(());
        }
        let call = crate::session::Turn::FunctionCalling {
            response: format!("{name}({args})"),
            timestamp: self.store.now(),
        };
        self.store.append_pool(&session_id, call)?;
        let response = crate::session::Turn::ToolResponse {
            name: name.to_string(),
            response: tools::normalize(Ok(result.clone())),
            timestamp: self.store.now(),
        };
        self.store.append_pool(&session_id, response)
    }

    fn log_fatal(&self, message: &str) {
        let path = self.project_root.join("tool_server_error.log");
        if let Ok(mut f) =
            std::fs::OpenOptions::new().create(true).append(true).open(path)
        {
            let _ = writeln!(f, "{message}");
        }
    }
}

fn error_response(id: Value, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {"code": code, "message": message}
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Hyperparameters;
    use chrono_tz::Tz;

    struct Fixture {
        _dir: tempfile::TempDir,
        store: SessionStore,
        settings: Settings,
        root: std::path::PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let store =
            SessionStore::new(root.join("sessions"), Tz::UTC, 3, Hyperparameters::default())
                .unwrap();
        Fixture { _dir: dir, store, settings: Settings::default(), root }
    }

    fn server(fx: &Fixture) -> RpcServer<'_> {
        RpcServer { store: &fx.store, settings: &fx.settings, project_root: &fx.root }
    }

    #[test]
    fn test_initialize_advertises_tools() {
        let fx = fixture();
        let resp = server(&fx)
            .handle_request(&json!({
                "jsonrpc": "2.0", "id": 1, "method": "initialize",
                "params": {"protocolVersion": "2024-11-05"}
            }))
            .unwrap();

        assert_eq!(resp["id"], 1);
        assert_eq!(resp["result"]["protocolVersion"], "2024-11-05");
        assert_eq!(resp["result"]["capabilities"]["tools"]["call"], true);
        assert!(resp["result"]["tools"].as_array().unwrap().len() >= 5);
    }

    #[test]
    fn test_tools_list() {
        let fx = fixture();
        let resp = server(&fx)
            .handle_request(&json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}))
            .unwrap();
        assert!(resp["result"]["tools"].as_array().is_some());
        assert_eq!(resp["result"]["prompts"], json!([]));
    }

    #[test]
    fn test_ping_and_unknown_method() {
        let fx = fixture();
        let srv = server(&fx);
        let pong = srv
            .handle_request(&json!({"jsonrpc": "2.0", "id": 3, "method": "ping"}))
            .unwrap();
        assert_eq!(pong["result"], json!({}));

        let unknown = srv
            .handle_request(&json!({"jsonrpc": "2.0", "id": 4, "method": "frobnicate"}))
            .unwrap();
        assert_eq!(unknown["error"]["code"], -32601);
    }

    #[test]
    fn test_notifications_produce_no_response() {
        let fx = fixture();
        assert!(server(&fx)
            .handle_request(&json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
            .is_none());
    }

    #[test]
    fn test_malformed_line_is_dropped() {
        let fx = fixture();
        assert!(server(&fx).handle_line("{not json").is_none());
        assert!(server(&fx).handle_line("").is_none());
    }

    #[test]
    fn test_tools_call_success_pools_cycle() {
        let fx = fixture();
        let session = fx.store.create("P", "B", &[], false, None, None).unwrap();

        let resp = server(&fx)
            .handle_request(&json!({
                "jsonrpc": "2.0", "id": 5, "method": "tools/call",
                "params": {"name": "get_session", "args": {"session_id": session.session_id}}
            }))
            .unwrap();

        assert_eq!(resp["result"]["status"], "succeeded");
        assert_eq!(resp["result"]["result"]["session_id"], json!(session.session_id));

        let pool = fx.store.get_pool(&session.session_id).unwrap();
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_tools_call_accepts_arguments_key() {
        let fx = fixture();
        let session = fx.store.create("P", "B", &[], false, None, None).unwrap();
        let resp = server(&fx)
            .handle_request(&json!({
                "jsonrpc": "2.0", "id": 6, "method": "tools/call",
                "params": {"name": "get_session", "arguments": {"session_id": session.session_id}}
            }))
            .unwrap();
        assert_eq!(resp["result"]["status"], "succeeded");
    }

    #[test]
    fn test_tools_call_tool_error_maps_to_32000() {
        let fx = fixture();
        let session = fx.store.create("P", "B", &[], false, None, None).unwrap();
        let resp = server(&fx)
            .handle_request(&json!({
                "jsonrpc": "2.0", "id": 7, "method": "tools/call",
                "params": {"name": "get_session", "args": {"session_id": "missing"}}
            }))
            .unwrap();

        assert_eq!(resp["error"]["code"], -32000);
        assert!(resp["error"]["message"].as_str().unwrap().contains("get_session"));
        // Failed executions are not recorded by the server path.
        assert!(fx.store.get_pool(&session.session_id).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_tool_maps_to_internal_error() {
        let fx = fixture();
        let resp = server(&fx)
            .handle_request(&json!({
                "jsonrpc": "2.0", "id": 8, "method": "tools/call",
                "params": {"name": "nope", "args": {}}
            }))
            .unwrap();
        assert_eq!(resp["error"]["code"], -32603);
    }

    #[test]
    fn test_run_tool_legacy_alias() {
        let fx = fixture();
        let session = fx.store.create("P", "B", &[], false, None, None).unwrap();
        let resp = server(&fx)
            .handle_request(&json!({
                "jsonrpc": "2.0", "id": 9, "method": "run_tool",
                "params": {"tool_name": "get_session", "arguments": {"session_id": session.session_id}}
            }))
            .unwrap();
        assert_eq!(resp["result"]["status"], "succeeded");
    }
}
