/// Per-session process supervision.
///
/// One agent process owns one session at a time, tracked through
/// `.processes/<session_id>.pid`. Start spawns this same binary in
/// stream-json mode and relays its stdout as parsed events; stop signals the
/// process, waits it out, rolls the session's pool back, and clears the PID
/// file — so a cancelled instruction never leaves half a ReAct cycle behind.
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::agent::pid_path;
use crate::error::{Error, Result};
use crate::store::SessionStore;

const STOP_GRACE: Duration = Duration::from_secs(5);
const STOP_POLL: Duration = Duration::from_millis(100);

pub struct Supervisor<'a> {
    pub project_root: &'a Path,
    pub store: &'a SessionStore,
}

impl Supervisor<'_> {
    /// Whether an agent process currently owns this session.
    pub fn is_running(&self, session_id: &str) -> bool {
        match read_pid(&pid_path(self.project_root, session_id)) {
            Some(pid) => process_alive(pid),
            None => false,
        }
    }

    /// Spawn an agent subprocess for one instruction and relay its NDJSON
    /// stdout events. The receiver closes when the process exits.
    pub fn start(
        &self,
        session_id: &str,
        instruction: &str,
    ) -> Result<mpsc::UnboundedReceiver<Value>> {
        if self.is_running(session_id) {
            return Err(Error::Validation(format!(
                "session '{session_id}' already has a running agent"
            )));
        }

        let exe = std::env::current_exe()?;
        let mut child = tokio::process::Command::new(exe)
            .arg("--session")
            .arg(session_id)
            .arg("--instruction")
            .arg(instruction)
            .arg("--output-format")
            .arg("stream-json")
            .arg("--project-root")
            .arg(self.project_root)
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;

        let stdout = child.stdout.take().ok_or_else(|| {
            Error::Protocol("agent subprocess produced no stdout".to_string())
        })?;
        let (tx, rx) = mpsc::unbounded_channel();
        let session = session_id.to_string();

        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let event = serde_json::from_str::<Value>(&line)
                    .unwrap_or_else(|_| serde_json::json!({"content": line}));
                if tx.send(event).is_err() {
                    break;
                }
            }
            match child.wait().await {
                Ok(status) => info!(session_id = %session, %status, "agent exited"),
                Err(e) => warn!(session_id = %session, "agent wait failed: {e}"),
            }
        });

        Ok(rx)
    }

    /// Terminate the session's agent (TERM, then KILL after a grace period),
    /// roll back its pool, and remove the PID file.
    pub async fn stop(&self, session_id: &str) -> Result<()> {
        let path = pid_path(self.project_root, session_id);
        if let Some(pid) = read_pid(&path) {
            signal(pid, libc::SIGTERM);
            let mut waited = Duration::ZERO;
            while process_alive(pid) && waited < STOP_GRACE {
                tokio::time::sleep(STOP_POLL).await;
                waited += STOP_POLL;
            }
            if process_alive(pid) {
                warn!(session_id, pid, "agent ignored SIGTERM, killing");
                signal(pid, libc::SIGKILL);
            }
        }

        // Drop any half-finished cycle the agent left pooled.
        if self.store.find(session_id)?.is_some() {
            self.store.clear_pool(session_id)?;
        }
        let _ = std::fs::remove_file(&path);
        Ok(())
    }
}

fn read_pid(path: &PathBuf) -> Option<i32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn process_alive(pid: i32) -> bool {
    // Signal 0 probes for existence without delivering anything.
    unsafe { libc::kill(pid, 0) == 0 }
}

fn signal(pid: i32, sig: i32) {
    unsafe {
        libc::kill(pid, sig);
    }
}
