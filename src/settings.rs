/// YAML settings and time handling.
///
/// Settings are read from `setting.yml` at the project root, falling back to
/// `setting.default.yml`. Every field has a default so a missing or partial
/// file still yields a usable configuration.
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::Utc;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::session::Hyperparameters;

// ── Settings schema ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Which LM transport to use: "api" (streaming HTTP) or "cli" (subprocess).
    pub api_mode: String,
    pub model: ModelSettings,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_model: Option<String>,
    /// IANA zone name. Unknown names fall back to UTC with a warning.
    pub timezone: String,
    /// Language the model is asked to respond in.
    pub language: String,
    /// Instruction text placed at the top of every prompt.
    pub main_instruction: String,
    /// Boilerplate spliced in when multi-step reasoning is enabled.
    pub reasoning_process: String,
    pub parameters: BTreeMap<String, ParameterSetting>,
    /// Keep only the most recent N tool responses in the rendered history,
    /// and expire succeeded tool output older than the Nth-latest user task.
    pub tool_response_expiration: usize,
    /// Default TTL for newly attached references.
    pub reference_ttl: i64,
    pub expert_mode: bool,
    pub yolo: bool,
    /// Hard upper bound on prompt tokens; exceeding aborts the instruction.
    pub context_limit: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub name: String,
    pub context_limit: u64,
    /// Buffered-token threshold above which the content cache is rebuilt.
    pub cache_update_threshold: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParameterSetting {
    pub value: f64,
    #[serde(default)]
    pub description: String,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            name: "gemini-2.5-pro".to_string(),
            context_limit: 1_000_000,
            cache_update_threshold: 10_000,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_mode: "api".to_string(),
            model: ModelSettings::default(),
            search_model: None,
            timezone: "UTC".to_string(),
            language: "English".to_string(),
            main_instruction: "You are a task-oriented agent. Accomplish the current task using the provided context.".to_string(),
            reasoning_process: "Think through the task step by step before responding: restate the goal, list what is known, identify what is missing, then act.".to_string(),
            parameters: BTreeMap::new(),
            tool_response_expiration: 3,
            reference_ttl: 3,
            expert_mode: false,
            yolo: false,
            context_limit: 1_000_000,
        }
    }
}

impl Settings {
    /// Load from `<root>/setting.yml`, falling back to `setting.default.yml`,
    /// falling back to built-in defaults when neither exists.
    pub fn load(project_root: &Path) -> Result<Self> {
        for name in ["setting.yml", "setting.default.yml"] {
            let path = project_root.join(name);
            if path.is_file() {
                let raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading {}", path.display()))?;
                return serde_yaml::from_str(&raw)
                    .with_context(|| format!("parsing {}", path.display()));
            }
        }
        Ok(Self::default())
    }

    /// Resolve the configured IANA timezone, defaulting to UTC.
    pub fn timezone(&self) -> Tz {
        match Tz::from_str(&self.timezone) {
            Ok(tz) => tz,
            Err(_) => {
                warn!("timezone '{}' not found, using UTC", self.timezone);
                Tz::UTC
            }
        }
    }

    /// Session hyperparameter defaults drawn from `parameters.*.value`.
    pub fn default_hyperparameters(&self) -> Hyperparameters {
        let get = |k: &str| self.parameters.get(k).map(|p| p.value);
        Hyperparameters {
            temperature: get("temperature"),
            top_p: get("top_p"),
            top_k: get("top_k"),
        }
    }
}

// ── Timestamps ────────────────────────────────────────────────────────────────

/// Current time as RFC3339 in the given zone. All persisted timestamps come
/// from here so a session file carries one consistent offset.
pub fn now_rfc3339(tz: Tz) -> String {
    Utc::now().with_timezone(&tz).to_rfc3339()
}

/// Compact stamp for backup filenames.
pub fn backup_stamp(tz: Tz) -> String {
    Utc::now().with_timezone(&tz).format("%Y%m%d%H%M%S").to_string()
}
