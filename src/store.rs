/// Durable, crash-safe session repository.
///
/// One JSON file per session under the sessions root; hierarchical IDs map
/// slashes to directories (`parent/child` lives at `parent/child.json`).
/// Every file mutation happens under that file's `.lock` sentinel; the
/// shared `index.json` has its own lock. Mutating edits snapshot the session
/// into `backups/` first, keyed by `sha256(session_id)` so hierarchical IDs
/// cannot collide.
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono_tz::Tz;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{Error, Result};
use crate::fslock::{self, FileLock};
use crate::session::{
    migrate_session_value, Hyperparameters, IndexEntry, Session, SessionIndex, Turn,
};
use crate::settings::{backup_stamp, now_rfc3339};
use crate::turns;

pub struct SessionStore {
    sessions_dir: PathBuf,
    backups_dir: PathBuf,
    index_path: PathBuf,
    index_lock_path: PathBuf,
    tz: Tz,
    default_ttl: i64,
    default_hyperparameters: Hyperparameters,
}

/// Partial update applied by [`SessionStore::edit_meta`].
#[derive(Debug, Clone, Default)]
pub struct MetaUpdate {
    pub purpose: Option<String>,
    pub background: Option<String>,
    pub multi_step_reasoning_enabled: Option<bool>,
    pub token_count: Option<u64>,
    pub hyperparameters: Option<Hyperparameters>,
}

impl SessionStore {
    pub fn new(
        sessions_dir: impl Into<PathBuf>,
        tz: Tz,
        default_ttl: i64,
        default_hyperparameters: Hyperparameters,
    ) -> Result<Self> {
        let sessions_dir = sessions_dir.into();
        let backups_dir = sessions_dir.join("backups");
        fs::create_dir_all(&backups_dir)?;

        let index_path = sessions_dir.join("index.json");
        let index_lock_path = sessions_dir.join("index.json.lock");
        let store = Self {
            sessions_dir,
            backups_dir,
            index_path,
            index_lock_path,
            tz,
            default_ttl,
            default_hyperparameters,
        };
        if !store.index_path.exists() {
            fslock::locked_json_write(
                &store.index_lock_path,
                &store.index_path,
                &SessionIndex::default(),
            )?;
        }
        Ok(store)
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn default_ttl(&self) -> i64 {
        self.default_ttl
    }

    pub fn now(&self) -> String {
        now_rfc3339(self.tz)
    }

    // ── Paths ─────────────────────────────────────────────────────────────────

    /// `parent/child` → `<root>/parent/child.json`. Empty, `.` and `..`
    /// segments are dropped so an ID can never escape the sessions root.
    fn session_path(&self, session_id: &str) -> PathBuf {
        let mut path = self.sessions_dir.clone();
        for part in session_id.split('/') {
            if part.is_empty() || part == "." || part == ".." {
                continue;
            }
            path.push(part);
        }
        path.set_extension("json");
        path
    }

    fn lock_path(&self, session_id: &str) -> PathBuf {
        let mut p = self.session_path(session_id).into_os_string();
        p.push(".lock");
        PathBuf::from(p)
    }

    // ── Create / find / save ──────────────────────────────────────────────────

    /// Create a session. The ID is a content hash over the creation identity;
    /// with a `parent_id` the new session nests under it as `parent/<hash>`.
    pub fn create(
        &self,
        purpose: &str,
        background: &str,
        roles: &[String],
        multi_step_reasoning_enabled: bool,
        hyperparameters: Option<Hyperparameters>,
        parent_id: Option<&str>,
    ) -> Result<Session> {
        if let Some(parent) = parent_id {
            if !self.session_path(parent).exists() {
                return Err(Error::NotFound(format!("parent session '{parent}'")));
            }
        }

        let timestamp = self.now();
        let identity = serde_json::json!({
            "purpose": purpose,
            "background": background,
            "roles": roles,
            "multi_step_reasoning_enabled": multi_step_reasoning_enabled,
            "timestamp": timestamp,
        });
        let hash = sha256_hex(&identity.to_string());
        let session_id = match parent_id {
            Some(parent) => format!("{parent}/{hash}"),
            None => hash,
        };

        let session = Session {
            session_id: session_id.clone(),
            created_at: timestamp.clone(),
            purpose: purpose.to_string(),
            background: background.to_string(),
            roles: roles.to_vec(),
            procedure: None,
            multi_step_reasoning_enabled,
            hyperparameters: Some(
                hyperparameters.unwrap_or_else(|| self.default_hyperparameters.clone()),
            ),
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
        };

        self.write_session(&session)?;
        self.update_index(&session_id, Some(purpose), Some(&timestamp))?;
        debug!(session_id = %session_id, "created session");
        Ok(session)
    }

    /// Load a session, running the migration pass. `Ok(None)` when the file
    /// does not exist.
    pub fn find(&self, session_id: &str) -> Result<Option<Session>> {
        let path = self.session_path(session_id);
        let raw: Value =
            fslock::locked_json_read(&self.lock_path(session_id), &path, Value::Null)?;
        if raw.is_null() {
            return Ok(None);
        }
        Ok(Some(self.parse_session(raw)?))
    }

    fn parse_session(&self, mut raw: Value) -> Result<Session> {
        migrate_session_value(&mut raw, self.default_ttl);
        Ok(serde_json::from_value(raw)?)
    }

    /// Overwrite the session file and refresh its index entry.
    pub fn save(&self, session: &Session) -> Result<()> {
        self.write_session(session)?;
        self.update_index(&session.session_id, Some(&session.purpose), None)
    }

    fn write_session(&self, session: &Session) -> Result<()> {
        let path = self.session_path(&session.session_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fslock::locked_json_write(&self.lock_path(&session.session_id), &path, session)
    }

    /// Find → mutate in memory → save, all under the session's lock. All
    /// internal edits go through here.
    pub fn atomic_update<R>(
        &self,
        session_id: &str,
        mutator: impl FnOnce(&mut Session) -> Result<R>,
    ) -> Result<R> {
        let path = self.session_path(session_id);
        let lock_path = self.lock_path(session_id);
        let out = {
            let _lock = FileLock::acquire(&lock_path)?;
            let raw = fs::read_to_string(&path)
                .map_err(|_| Error::NotFound(format!("session '{session_id}'")))?;
            let value: Value = serde_json::from_str(&raw)?;
            let mut session = self.parse_session(value)?;
            let out = mutator(&mut session)?;
            fslock::write_json(&path, &session)?;
            out
        };
        self.update_index(session_id, None, None)?;
        Ok(out)
    }

    // ── Backup / fork / delete ────────────────────────────────────────────────

    /// Snapshot the current on-disk state into `backups/`. No-op when the
    /// session file does not exist yet.
    pub fn backup(&self, session_id: &str) -> Result<()> {
        let path = self.session_path(session_id);
        if !path.exists() {
            return Ok(());
        }
        let name = format!("{}-{}.json", sha256_hex(session_id), backup_stamp(self.tz));
        fs::copy(&path, self.backups_dir.join(name))?;
        Ok(())
    }

    /// Fork at `fork_index`, which must point at a `model_response` turn.
    /// The fork is a sibling of the original (same parent path), carries the
    /// turn prefix through `fork_index`, and starts with zeroed token counters.
    pub fn fork(&self, session_id: &str, fork_index: usize) -> Result<Session> {
        let original = self
            .find(session_id)?
            .ok_or_else(|| Error::NotFound(format!("session '{session_id}'")))?;

        let fork_turn = original.turns.get(fork_index).ok_or_else(|| {
            Error::Validation(format!("fork_index {fork_index} is out of range"))
        })?;
        if !matches!(fork_turn, Turn::ModelResponse { .. }) {
            return Err(Error::Validation(format!(
                "forking is only allowed from a 'model_response' turn; turn {} is of type '{}'",
                fork_index + 1,
                fork_turn.type_name()
            )));
        }

        let timestamp = self.now();
        let purpose = format!("Fork of: {}", original.purpose);
        let identity = serde_json::json!({
            "purpose": purpose,
            "original_id": session_id,
            "fork_at_turn": fork_index,
            "timestamp": timestamp,
        });
        let suffix = sha256_hex(&identity.to_string());
        let new_id = match session_id.rsplit_once('/') {
            Some((parent, _)) => format!("{parent}/{suffix}"),
            None => suffix,
        };

        let forked = Session {
            session_id: new_id.clone(),
            created_at: timestamp.clone(),
            purpose: purpose.clone(),
            background: original.background.clone(),
            roles: original.roles.clone(),
            procedure: original.procedure.clone(),
            multi_step_reasoning_enabled: original.multi_step_reasoning_enabled,
            hyperparameters: original.hyperparameters.clone(),
            turns: original.turns[..=fork_index].to_vec(),
            pools: Vec::new(),
            references: original.references.clone(),
            todos: original.todos.clone(),
            artifacts: Vec::new(),
            token_count: 0,
            cached_content_token_count: 0,
            cumulative_total_tokens: 0,
            cumulative_cached_tokens: 0,
            cache_name: None,
            cached_turn_count: 0,
        };

        self.write_session(&forked)?;
        self.update_index(&new_id, Some(&purpose), Some(&timestamp))?;
        Ok(forked)
    }

    /// Remove a session file, its child tree, its backups, and its index
    /// entries. Directory pruning is best-effort.
    pub fn delete(&self, session_id: &str) -> Result<()> {
        let path = self.session_path(session_id);
        let child_dir = path.with_extension("");
        {
            let _lock = FileLock::acquire(&self.lock_path(session_id))?;
            if child_dir.is_dir() {
                fs::remove_dir_all(&child_dir)?;
            }
            if path.exists() {
                fs::remove_file(&path)?;
            }
        }

        // Sweep backups for this id.
        let prefix = format!("{}-", sha256_hex(session_id));
        if let Ok(entries) = fs::read_dir(&self.backups_dir) {
            for entry in entries.flatten() {
                if entry.file_name().to_string_lossy().starts_with(&prefix) {
                    let _ = fs::remove_file(entry.path());
                }
            }
        }

        // Drop this session and any children from the index.
        let child_prefix = format!("{session_id}/");
        self.with_index(|index| {
            index
                .sessions
                .retain(|id, _| id != session_id && !id.starts_with(&child_prefix));
        })?;

        // Prune now-empty ancestor directories.
        let mut dir = path.parent().map(Path::to_path_buf);
        while let Some(d) = dir {
            if d == self.sessions_dir || fs::remove_dir(&d).is_err() {
                break;
            }
            dir = d.parent().map(Path::to_path_buf);
        }
        Ok(())
    }

    // ── Turns & pool ──────────────────────────────────────────────────────────

    /// Append one committed turn, optionally refreshing the prompt token count.
    pub fn add_turn(&self, session_id: &str, turn: Turn, token_count: Option<u64>) -> Result<()> {
        self.atomic_update(session_id, |session| {
            session.turns.push(turn);
            if let Some(tc) = token_count {
                session.token_count = tc;
            }
            Ok(())
        })
    }

    pub fn append_pool(&self, session_id: &str, turn: Turn) -> Result<()> {
        self.atomic_update(session_id, |session| {
            session.pools.push(turn);
            Ok(())
        })
    }

    pub fn get_pool(&self, session_id: &str) -> Result<Vec<Turn>> {
        Ok(self.find(session_id)?.map(|s| s.pools).unwrap_or_default())
    }

    /// Drain the pool, returning what it held.
    pub fn take_pool(&self, session_id: &str) -> Result<Vec<Turn>> {
        self.atomic_update(session_id, |session| Ok(std::mem::take(&mut session.pools)))
    }

    /// Drop pool contents without merging (rollback).
    pub fn clear_pool(&self, session_id: &str) -> Result<()> {
        self.atomic_update(session_id, |session| {
            session.pools.clear();
            Ok(())
        })
    }

    pub fn edit_turn(&self, session_id: &str, index: usize, edit: turns::TurnEdit) -> Result<()> {
        self.backup(session_id)?;
        self.atomic_update(session_id, |session| {
            turns::edit_by_index(&mut session.turns, index, edit)
        })
    }

    pub fn delete_turns(&self, session_id: &str, indices: &[usize]) -> Result<()> {
        self.backup(session_id)?;
        self.atomic_update(session_id, |session| {
            turns::delete_many(&mut session.turns, indices)
        })
    }

    /// Collapse `turns[start..=end]` into a single `compressed_history` turn.
    pub fn replace_range_with_summary(
        &self,
        session_id: &str,
        start: usize,
        end: usize,
        summary: &str,
    ) -> Result<()> {
        self.backup(session_id)?;
        let timestamp = self.now();
        self.atomic_update(session_id, |session| {
            if start > end || end >= session.turns.len() {
                return Err(Error::Validation(format!(
                    "turn range {start}..={end} is out of range"
                )));
            }
            let summary_turn = Turn::CompressedHistory {
                content: summary.to_string(),
                original_turns_range: Some((start, end)),
                timestamp: timestamp.clone(),
            };
            session.turns.splice(start..=end, [summary_turn]);
            Ok(())
        })
    }

    pub fn edit_meta(&self, session_id: &str, update: MetaUpdate) -> Result<()> {
        self.backup(session_id)?;
        let purpose = update.purpose.clone();
        self.atomic_update(session_id, |session| {
            if let Some(p) = update.purpose {
                session.purpose = p;
            }
            if let Some(b) = update.background {
                session.background = b;
            }
            if let Some(m) = update.multi_step_reasoning_enabled {
                session.multi_step_reasoning_enabled = m;
            }
            if let Some(t) = update.token_count {
                session.token_count = t;
            }
            if let Some(h) = update.hyperparameters {
                session.hyperparameters = Some(h);
            }
            Ok(())
        })?;
        self.update_index(session_id, purpose.as_deref(), None)
    }

    // ── Index ─────────────────────────────────────────────────────────────────

    pub fn list(&self) -> Result<BTreeMap<String, IndexEntry>> {
        let mut index: SessionIndex = fslock::locked_json_read(
            &self.index_lock_path,
            &self.index_path,
            SessionIndex::default(),
        )?;
        index.migrate();
        Ok(index.sessions)
    }

    fn update_index(
        &self,
        session_id: &str,
        purpose: Option<&str>,
        created_at: Option<&str>,
    ) -> Result<()> {
        let now = self.now();
        self.with_index(|index| {
            let entry = index.sessions.entry(session_id.to_string()).or_default();
            entry.last_updated_at = Some(now.clone());
            if let Some(c) = created_at {
                entry.created_at = Some(c.to_string());
            }
            if let Some(p) = purpose {
                entry.purpose = Some(p.to_string());
            }
        })
    }

    fn with_index(&self, f: impl FnOnce(&mut SessionIndex)) -> Result<()> {
        fslock::locked_json_update(
            &self.index_lock_path,
            &self.index_path,
            SessionIndex::default(),
            |index| {
                index.migrate();
                f(index);
            },
        )
    }

    pub fn sessions_dir(&self) -> &Path {
        &self.sessions_dir
    }

    pub fn backups_dir(&self) -> &Path {
        &self.backups_dir
    }
}

fn sha256_hex(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{ToolResult, ToolStatus};

    fn store(dir: &Path) -> SessionStore {
        SessionStore::new(dir.join("sessions"), Tz::UTC, 3, Hyperparameters::default()).unwrap()
    }

    fn ts(minute: usize) -> String {
        format!("2025-01-01T00:{minute:02}:00+00:00")
    }

    #[test]
    fn test_create_writes_file_and_index() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let session = store.create("P", "B", &[], false, None, None).unwrap();

        assert!(dir.path().join("sessions").join(format!("{}.json", session.session_id)).exists());
        let index = store.list().unwrap();
        assert_eq!(index[&session.session_id].purpose.as_deref(), Some("P"));
        assert!(index[&session.session_id].created_at.is_some());
    }

    #[test]
    fn test_create_child_nests_under_parent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let parent = store.create("P", "B", &[], false, None, None).unwrap();
        let child = store
            .create("C", "B", &[], false, None, Some(&parent.session_id))
            .unwrap();

        assert!(child.session_id.starts_with(&format!("{}/", parent.session_id)));
        assert!(store.find(&child.session_id).unwrap().is_some());
    }

    #[test]
    fn test_create_with_missing_parent_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let err = store.create("P", "B", &[], false, None, Some("ghost")).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_find_absent_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(store(dir.path()).find("nope").unwrap().is_none());
    }

    #[test]
    fn test_atomic_update_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let session = store.create("P", "B", &[], false, None, None).unwrap();

        store
            .atomic_update(&session.session_id, |s| {
                s.turns.push(Turn::user_task("hi", ts(0)));
                Ok(())
            })
            .unwrap();

        let loaded = store.find(&session.session_id).unwrap().unwrap();
        assert_eq!(loaded.turns.len(), 1);
        // No stray lock left behind.
        assert!(!store.lock_path(&session.session_id).exists());
    }

    #[test]
    fn test_pool_take_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let session = store.create("P", "B", &[], false, None, None).unwrap();
        let id = &session.session_id;

        store.append_pool(id, Turn::user_task("hi", ts(0))).unwrap();
        store.append_pool(id, Turn::model_response("hello", ts(1))).unwrap();
        assert_eq!(store.get_pool(id).unwrap().len(), 2);

        let drained = store.take_pool(id).unwrap();
        assert_eq!(drained.len(), 2);
        assert!(store.get_pool(id).unwrap().is_empty());

        store.append_pool(id, Turn::user_task("x", ts(2))).unwrap();
        store.clear_pool(id).unwrap();
        assert!(store.get_pool(id).unwrap().is_empty());
    }

    #[test]
    fn test_backup_before_edit_matches_on_disk_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let session = store.create("P", "B", &[], false, None, None).unwrap();
        let id = &session.session_id;
        store.add_turn(id, Turn::user_task("original", ts(0)), None).unwrap();

        let before = store.find(id).unwrap().unwrap();
        store.edit_turn(id, 0, turns::TurnEdit::Instruction("edited".into())).unwrap();

        let backups: Vec<_> = fs::read_dir(store.backups_dir()).unwrap().flatten().collect();
        assert_eq!(backups.len(), 1);
        assert!(backups[0]
            .file_name()
            .to_string_lossy()
            .starts_with(&sha256_hex(id)));

        let snapshot: Session =
            serde_json::from_str(&fs::read_to_string(backups[0].path()).unwrap()).unwrap();
        assert_eq!(snapshot.turns, before.turns);
    }

    #[test]
    fn test_edit_rejects_tool_response_turn() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let session = store.create("P", "B", &[], false, None, None).unwrap();
        let id = &session.session_id;
        store
            .add_turn(
                id,
                Turn::ToolResponse {
                    name: "search".into(),
                    response: ToolResult { status: ToolStatus::Succeeded, message: "3 hits".into() },
                    timestamp: ts(0),
                },
                None,
            )
            .unwrap();

        let err = store.edit_turn(id, 0, turns::TurnEdit::Content("x".into())).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        let unchanged = store.find(id).unwrap().unwrap();
        assert!(matches!(&unchanged.turns[0], Turn::ToolResponse { .. }));
    }

    #[test]
    fn test_replace_range_with_summary() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let session = store.create("P", "B", &[], false, None, None).unwrap();
        let id = &session.session_id;
        for i in 0..4 {
            store.add_turn(id, Turn::user_task(format!("t{i}"), ts(i)), None).unwrap();
        }

        store.replace_range_with_summary(id, 1, 2, "summary of t1..t2").unwrap();

        let loaded = store.find(id).unwrap().unwrap();
        assert_eq!(loaded.turns.len(), 3);
        match &loaded.turns[1] {
            Turn::CompressedHistory { content, original_turns_range, .. } => {
                assert_eq!(content, "summary of t1..t2");
                assert_eq!(*original_turns_range, Some((1, 2)));
            }
            other => panic!("expected compressed_history, got {}", other.type_name()),
        }
    }

    #[test]
    fn test_fork_at_model_response() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let session = store.create("P", "B", &[], false, None, None).unwrap();
        let id = &session.session_id;
        store.add_turn(id, Turn::user_task("hi", ts(0)), None).unwrap();
        store.add_turn(id, Turn::model_response("hello", ts(1)), Some(42)).unwrap();
        store.add_turn(id, Turn::user_task("more", ts(2)), None).unwrap();

        let fork = store.fork(id, 1).unwrap();
        assert_eq!(fork.purpose, "Fork of: P");
        assert_eq!(fork.turns.len(), 2);
        assert_eq!(fork.token_count, 0);
        assert!(!fork.session_id.contains('/'));
        assert!(store.find(&fork.session_id).unwrap().is_some());
    }

    #[test]
    fn test_fork_is_sibling_of_nested_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let parent = store.create("P", "B", &[], false, None, None).unwrap();
        let child = store
            .create("C", "B", &[], false, None, Some(&parent.session_id))
            .unwrap();
        store.add_turn(&child.session_id, Turn::model_response("r", ts(0)), None).unwrap();

        let fork = store.fork(&child.session_id, 0).unwrap();
        let (fork_parent, _) = fork.session_id.rsplit_once('/').unwrap();
        assert_eq!(fork_parent, parent.session_id);
    }

    #[test]
    fn test_fork_rejects_non_model_response() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let session = store.create("P", "B", &[], false, None, None).unwrap();
        store.add_turn(&session.session_id, Turn::user_task("hi", ts(0)), None).unwrap();

        assert!(matches!(store.fork(&session.session_id, 0), Err(Error::Validation(_))));
        assert!(matches!(store.fork(&session.session_id, 9), Err(Error::Validation(_))));
    }

    #[test]
    fn test_delete_removes_children_backups_and_index() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let parent = store.create("P", "B", &[], false, None, None).unwrap();
        let child = store
            .create("C", "B", &[], false, None, Some(&parent.session_id))
            .unwrap();
        store.backup(&parent.session_id).unwrap();

        store.delete(&parent.session_id).unwrap();

        assert!(store.find(&parent.session_id).unwrap().is_none());
        assert!(store.find(&child.session_id).unwrap().is_none());
        let index = store.list().unwrap();
        assert!(index.is_empty());
        let backups: Vec<_> = fs::read_dir(store.backups_dir()).unwrap().flatten().collect();
        assert!(backups.is_empty());
    }

    #[test]
    fn test_migration_runs_on_find() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let path = store.sessions_dir().join("legacy.json");
        fs::write(
            &path,
            serde_json::json!({
                "session_id": "legacy",
                "created_at": ts(0),
                "purpose": "P",
                "background": "B",
                "multi_step_reasoning_enabled": null,
                "references": ["notes.md"],
                "todos": ["ship it"],
            })
            .to_string(),
        )
        .unwrap();

        let session = store.find("legacy").unwrap().unwrap();
        assert!(!session.multi_step_reasoning_enabled);
        assert_eq!(session.references[0].ttl, Some(3));
        assert_eq!(session.todos.unwrap()[0].title, "ship it");
    }
}
