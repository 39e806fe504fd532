/// Prompt assembly.
///
/// Turns a session snapshot plus settings into a structured [`Prompt`]. The
/// assembler knows nothing about any wire format; transports render the
/// structure into whatever their model expects. All file content (roles,
/// references, artifacts, procedure) is read at render time and must live
/// under the project root — paths that escape it are silently skipped, as
/// are files that fail to read.
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::session::{Hyperparameters, Session, TodoItem, Turn};
use crate::settings::{now_rfc3339, Settings};
use crate::turns;

#[derive(Debug, Clone, Serialize)]
pub struct Prompt {
    pub main_instruction: String,
    pub session_goal: SessionGoal,
    pub constraints: Constraints,
    pub roles: Roles,
    pub file_references: Vec<FileReference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub todos: Option<Vec<TodoItem>>,
    pub conversation_history: ConversationHistory,
    pub current_task: CurrentTask,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<Artifact>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub procedure: Option<String>,
    pub current_datetime: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_process: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionGoal {
    pub purpose: String,
    pub background: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Constraints {
    pub language: String,
    pub hyperparameters: Hyperparameters,
    pub processing_config: ProcessingConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessingConfig {
    pub multi_step_reasoning_active: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Roles {
    pub definitions: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileReference {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationHistory {
    pub turns: Vec<Turn>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CurrentTask {
    pub instruction: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Artifact {
    pub path: String,
    pub contents: String,
}

impl Prompt {
    pub fn to_json_string(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

// ── Assembly ──────────────────────────────────────────────────────────────────

pub fn build(
    session: &Session,
    settings: &Settings,
    current_instruction: Option<&str>,
    project_root: &Path,
) -> Prompt {
    let full_history = session.full_history();

    // Newest-first filtered view, back to chronological order for rendering.
    let mut history: Vec<Turn> =
        turns::get_for_prompt(&full_history, settings.tool_response_expiration)
            .into_iter()
            .cloned()
            .collect();
    history.reverse();

    // The current instruction is rendered in current_task, not duplicated as
    // the trailing history turn.
    let instruction = match current_instruction {
        Some(i) => i.to_string(),
        None => match full_history.last() {
            Some(Turn::UserTask { instruction, .. }) => instruction.clone(),
            _ => String::new(),
        },
    };
    if let Some(Turn::UserTask { instruction: last, .. }) = history.last() {
        if *last == instruction {
            history.pop();
        }
    }

    let roles = session
        .roles
        .iter()
        .filter_map(|p| read_within_root(project_root, p))
        .collect();

    let file_references = session
        .references
        .iter()
        .filter(|r| r.is_active())
        .filter_map(|r| {
            read_within_root(project_root, &r.path)
                .map(|content| FileReference { path: r.path.clone(), content })
        })
        .collect();

    let artifacts = session
        .artifacts
        .iter()
        .filter_map(|p| {
            read_within_root(project_root, p).map(|contents| Artifact { path: p.clone(), contents })
        })
        .collect();

    let procedure = session
        .procedure
        .as_deref()
        .and_then(|p| read_within_root(project_root, p));

    Prompt {
        main_instruction: settings.main_instruction.clone(),
        session_goal: SessionGoal {
            purpose: session.purpose.clone(),
            background: session.background.clone(),
        },
        constraints: Constraints {
            language: settings.language.clone(),
            hyperparameters: session
                .hyperparameters
                .clone()
                .unwrap_or_else(|| settings.default_hyperparameters()),
            processing_config: ProcessingConfig {
                multi_step_reasoning_active: session.multi_step_reasoning_enabled,
            },
        },
        roles: Roles { definitions: roles },
        file_references,
        todos: session.todos.clone(),
        conversation_history: ConversationHistory { turns: history },
        current_task: CurrentTask { instruction },
        artifacts,
        procedure,
        current_datetime: now_rfc3339(settings.timezone()),
        reasoning_process: session
            .multi_step_reasoning_enabled
            .then(|| settings.reasoning_process.clone()),
    }
}

/// Read a file resolved against the project root, refusing paths that
/// resolve outside it. Any failure yields `None`.
fn read_within_root(root: &Path, rel: &str) -> Option<String> {
    let root = root.canonicalize().ok()?;
    let candidate: PathBuf = {
        let p = Path::new(rel.trim());
        if p.is_absolute() { p.to_path_buf() } else { root.join(p) }
    };
    let resolved = candidate.canonicalize().ok()?;
    if !resolved.starts_with(&root) {
        return None;
    }
    std::fs::read_to_string(resolved).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Reference;
    use chrono_tz::Tz;

    fn base_session() -> Session {
        Session {
            session_id: "s1".into(),
            created_at: "2025-01-01T00:00:00+00:00".into(),
            purpose: "P".into(),
            background: "B".into(),
            roles: vec![],
            procedure: None,
            multi_step_reasoning_enabled: false,
            hyperparameters: None,
            turns: vec![],
            pools: vec![],
            references: vec![],
            todos: None,
            artifacts: vec![],
            token_count: 0,
            cached_content_token_count: 0,
            cumulative_total_tokens: 0,
            cumulative_cached_tokens: 0,
            cache_name: None,
            cached_turn_count: 0,
        }
    }

    fn ts(minute: usize) -> String {
        format!("2025-01-01T00:{minute:02}:00+00:00")
    }

    #[test]
    fn test_current_task_excluded_from_history() {
        let mut session = base_session();
        session.turns = vec![
            Turn::user_task("first", ts(0)),
            Turn::model_response("reply", ts(1)),
        ];
        session.pools = vec![Turn::user_task("second", ts(2))];

        let dir = tempfile::tempdir().unwrap();
        let prompt = build(&session, &Settings::default(), Some("second"), dir.path());

        assert_eq!(prompt.current_task.instruction, "second");
        assert_eq!(prompt.conversation_history.turns.len(), 2);
        assert!(matches!(
            prompt.conversation_history.turns.last().unwrap(),
            Turn::ModelResponse { .. }
        ));
    }

    #[test]
    fn test_instruction_falls_back_to_last_user_task() {
        let mut session = base_session();
        session.turns = vec![Turn::user_task("only", ts(0))];
        let dir = tempfile::tempdir().unwrap();
        let prompt = build(&session, &Settings::default(), None, dir.path());
        assert_eq!(prompt.current_task.instruction, "only");
        assert!(prompt.conversation_history.turns.is_empty());
    }

    #[test]
    fn test_active_references_read_and_inactive_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("active.md"), "alpha").unwrap();
        std::fs::write(dir.path().join("off.md"), "beta").unwrap();

        let mut session = base_session();
        session.references = vec![
            Reference::new("active.md", Some(2), false),
            {
                let mut r = Reference::new("off.md", Some(2), false);
                r.disabled = true;
                r
            },
            Reference::new("missing.md", Some(2), false),
        ];

        let prompt = build(&session, &Settings::default(), None, dir.path());
        assert_eq!(prompt.file_references.len(), 1);
        assert_eq!(prompt.file_references[0].content, "alpha");
    }

    #[test]
    fn test_role_outside_root_is_skipped() {
        let outer = tempfile::tempdir().unwrap();
        let root = outer.path().join("project");
        std::fs::create_dir(&root).unwrap();
        std::fs::write(outer.path().join("secret.md"), "nope").unwrap();
        std::fs::write(root.join("role.md"), "the role").unwrap();

        let mut session = base_session();
        session.roles = vec!["../secret.md".into(), "role.md".into()];

        let prompt = build(&session, &Settings::default(), None, &root);
        assert_eq!(prompt.roles.definitions, vec!["the role".to_string()]);
    }

    #[test]
    fn test_reasoning_process_only_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = base_session();
        let off = build(&session, &Settings::default(), None, dir.path());
        assert!(off.reasoning_process.is_none());
        assert!(!off.constraints.processing_config.multi_step_reasoning_active);

        session.multi_step_reasoning_enabled = true;
        let on = build(&session, &Settings::default(), None, dir.path());
        assert!(on.reasoning_process.is_some());
        assert!(on.constraints.processing_config.multi_step_reasoning_active);
    }

    #[test]
    fn test_datetime_uses_configured_zone() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings { timezone: "Asia/Tokyo".into(), ..Default::default() };
        assert_eq!(settings.timezone(), Tz::Asia__Tokyo);
        let prompt = build(&base_session(), &settings, None, dir.path());
        assert!(prompt.current_datetime.ends_with("+09:00"));
    }
}
