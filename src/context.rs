/// Context window management.
///
/// A server-side content cache bakes the stable prefix of a session so every
/// LM call only ships the churning suffix. The decision rule: once the
/// tokens buffered past the cache exceed the configured threshold, the cache
/// is rebuilt over everything but the very last turn — that turn is the one
/// most likely to still be inside a tool-call cycle and must never be baked
/// prematurely.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Duration;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::fslock;
use crate::session::{Session, Turn};
use crate::tokens::TokenCountSummary;

/// Lifetime of a server-side cache object and of its registry entry.
pub const CACHE_TTL_SECS: u64 = 3600;

// ── Cache backend ─────────────────────────────────────────────────────────────

/// The server-side cached-content API, as much of it as the orchestrator
/// needs. Transports implement this; tests substitute an in-memory fake.
/// A transport without cache support returns an empty name from `create`,
/// which the manager treats as a decline.
pub trait ContentCache {
    /// Create a cache over `content`, returning its opaque name.
    fn create(
        &self,
        content: &str,
        ttl_secs: u64,
    ) -> impl std::future::Future<Output = anyhow::Result<String>> + Send;
    fn delete(&self, name: &str) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}

// ── Registry ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub name: String,
    pub expire_time: String,
    pub session_id: String,
}

// ── Decision ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CacheDecision {
    pub cache_name: Option<String>,
    pub cached_turn_count: usize,
    /// Turns past the cache boundary; the caller sends these fresh.
    pub buffered_history: Vec<Turn>,
}

pub struct CacheManager {
    registry_path: PathBuf,
    registry_lock_path: PathBuf,
    tz: Tz,
}

impl CacheManager {
    pub fn new(sessions_dir: &Path, tz: Tz) -> Self {
        Self {
            registry_path: sessions_dir.join(".cache_registry.json"),
            registry_lock_path: sessions_dir.join(".cache_registry.json.lock"),
            tz,
        }
    }

    /// Decide whether to rebuild, reuse, or skip the cache for this
    /// iteration. `build_payload` renders the static content (goals, roles,
    /// references, and the first N turns) and is only invoked on a rebuild.
    ///
    /// On a failed rebuild the session is left untouched — the stale cache
    /// keeps being reused rather than resetting to nothing.
    pub async fn update_if_needed<C: ContentCache>(
        &self,
        session: &mut Session,
        full_history: &[Turn],
        summary: TokenCountSummary,
        threshold: u64,
        cache: &C,
        build_payload: impl FnOnce(usize) -> String,
    ) -> Result<CacheDecision> {
        if summary.buffered_tokens > threshold && !full_history.is_empty() {
            let new_count = full_history.len() - 1;

            let old_name = match self.existing_cache_name(&session.session_id)? {
                Some(name) => Some(name),
                None => session.cache_name.clone(),
            };
            if let Some(old) = old_name {
                if let Err(e) = cache.delete(&old).await {
                    warn!(session_id = %session.session_id, "cache delete failed: {e}");
                }
            }

            let content = build_payload(new_count);
            match cache.create(&content, CACHE_TTL_SECS).await {
                Ok(name) if !name.is_empty() => {
                    debug!(session_id = %session.session_id, cache = %name, "cache rebuilt");
                    session.cache_name = Some(name.clone());
                    session.cached_turn_count = new_count;
                    self.update_registry(&session.session_id, &name)?;
                }
                Ok(_) => {
                    debug!(session_id = %session.session_id, "cache backend declined, no cache");
                }
                Err(e) => {
                    warn!(session_id = %session.session_id, "cache create failed: {e}");
                }
            }
        }

        let cached_turn_count = session.cached_turn_count.min(full_history.len());
        Ok(CacheDecision {
            cache_name: if cached_turn_count > 0 { session.cache_name.clone() } else { None },
            cached_turn_count,
            buffered_history: full_history[cached_turn_count..].to_vec(),
        })
    }

    /// Look up a still-valid cache name for this session in the registry.
    pub fn existing_cache_name(&self, session_id: &str) -> Result<Option<String>> {
        let registry: BTreeMap<String, RegistryEntry> = fslock::locked_json_read(
            &self.registry_lock_path,
            &self.registry_path,
            BTreeMap::new(),
        )?;
        let Some(entry) = registry.get(session_id) else {
            return Ok(None);
        };
        let valid = chrono::DateTime::parse_from_rfc3339(&entry.expire_time)
            .map(|t| t > chrono::Utc::now())
            .unwrap_or(false);
        Ok(valid.then(|| entry.name.clone()))
    }

    fn update_registry(&self, session_id: &str, cache_name: &str) -> Result<()> {
        let expire_time = (chrono::Utc::now() + Duration::seconds(CACHE_TTL_SECS as i64))
            .with_timezone(&self.tz)
            .to_rfc3339();
        fslock::locked_json_update(
            &self.registry_lock_path,
            &self.registry_path,
            BTreeMap::<String, RegistryEntry>::new(),
            |registry| {
                registry.insert(
                    session_id.to_string(),
                    RegistryEntry {
                        name: cache_name.to_string(),
                        expire_time,
                        session_id: session_id.to_string(),
                    },
                );
            },
        )
    }
}
