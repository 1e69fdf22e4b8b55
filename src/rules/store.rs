//! Cached rule-file store.
//!
//! One `RuleStore` owns the path to the JSON rule file and an in-memory
//! cache of the parsed set. `load()` reads the file at most once; only
//! `reload()` picks up edits. The store is injected wherever rules are
//! needed so tests can point isolated instances at tempfiles.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::ConfigError;
use crate::rules::model::{MatchMode, Rule, RuleSet};

/// Partial update applied to one rule in the file.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct RuleUpdate {
    pub keywords: Option<Vec<String>>,
    #[serde(rename = "mustMatch")]
    pub must_match: Option<MatchMode>,
    pub context: Option<String>,
}

/// Rule file loader with an explicit-invalidation cache.
pub struct RuleStore {
    path: PathBuf,
    cache: RwLock<Option<Arc<RuleSet>>>,
}

impl RuleStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: RwLock::new(None),
        }
    }

    /// Return the cached set, reading and parsing the file only on the
    /// first call after startup or after a `reload()`.
    ///
    /// A missing or malformed file is an error — never an empty set.
    pub async fn load(&self) -> Result<Arc<RuleSet>, ConfigError> {
        if let Some(set) = self.cache.read().await.as_ref() {
            return Ok(Arc::clone(set));
        }

        let mut cache = self.cache.write().await;
        // Another task may have filled the cache while we waited
        if let Some(set) = cache.as_ref() {
            return Ok(Arc::clone(set));
        }

        let set = Arc::new(self.read_file().await?);
        debug!(
            rules = set.rules.len(),
            path = %self.path.display(),
            "Rule set loaded"
        );
        *cache = Some(Arc::clone(&set));
        Ok(set)
    }

    /// Discard the cache and re-read the file.
    ///
    /// If the re-read fails the cache stays empty, so the next `load()`
    /// retries the file instead of serving a stale set.
    pub async fn reload(&self) -> Result<Arc<RuleSet>, ConfigError> {
        let mut cache = self.cache.write().await;
        *cache = None;

        let set = Arc::new(self.read_file().await?);
        info!(rules = set.rules.len(), "Rule set reloaded");
        *cache = Some(Arc::clone(&set));
        Ok(set)
    }

    /// Parse the file fresh, bypassing and never touching the cache.
    ///
    /// The management API reads through this so pending file edits are
    /// visible before the pipeline reloads.
    pub async fn read_file(&self) -> Result<RuleSet, ConfigError> {
        let raw = tokio::fs::read_to_string(&self.path).await?;
        let set: RuleSet =
            serde_json::from_str(&raw).map_err(|e| ConfigError::ParseError {
                path: self.path.display().to_string(),
                message: e.to_string(),
            })?;
        set.validate()?;
        Ok(set)
    }

    /// Flip a rule's `enabled` flag in the file. The cache is left alone:
    /// the running pipeline sees the change only after `reload()`.
    pub async fn set_rule_enabled(&self, id: &str, enabled: bool) -> Result<Rule, ConfigError> {
        let mut set = self.read_file().await?;
        let rule = set
            .rules
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| ConfigError::RuleNotFound(id.to_string()))?;
        rule.enabled = enabled;
        let updated = rule.clone();
        self.write_file(&set).await?;
        info!(rule = %id, enabled, "Rule toggled in file (pending reload)");
        Ok(updated)
    }

    /// Apply a partial update to a rule in the file. Same
    /// pending-until-reload semantics as `set_rule_enabled`.
    pub async fn update_rule(&self, id: &str, update: RuleUpdate) -> Result<Rule, ConfigError> {
        let mut set = self.read_file().await?;
        let rule = set
            .rules
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| ConfigError::RuleNotFound(id.to_string()))?;

        if let Some(keywords) = update.keywords {
            rule.conditions.keywords = keywords;
        }
        if let Some(must_match) = update.must_match {
            rule.conditions.must_match = must_match;
        }
        if let Some(context) = update.context {
            rule.context = context;
        }

        let updated = rule.clone();
        self.write_file(&set).await?;
        info!(rule = %id, "Rule updated in file (pending reload)");
        Ok(updated)
    }

    async fn write_file(&self, set: &RuleSet) -> Result<(), ConfigError> {
        let json =
            serde_json::to_string_pretty(set).map_err(|e| ConfigError::ParseError {
                path: self.path.display().to_string(),
                message: e.to_string(),
            })?;
        tokio::fs::write(&self.path, json).await?;
        Ok(())
    }
}
