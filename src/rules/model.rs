//! Wire shapes for the rule configuration file.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ── Match mode ──────────────────────────────────────────────────────

/// How a rule's keywords combine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// At least one keyword must appear. The default when unspecified.
    #[default]
    Any,
    /// Every keyword must appear.
    All,
}

// ── Rule ────────────────────────────────────────────────────────────

/// Keyword condition attached to a rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConditions {
    /// Case-insensitive substrings searched in `subject + " " + body`.
    /// An empty list never matches — no condition is not a wildcard.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Keyword combination mode.
    #[serde(rename = "mustMatch", default)]
    pub must_match: MatchMode,
}

/// One auto-reply rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    /// Unique identifier, referenced by the management API.
    pub id: String,
    /// Disabled rules never match.
    pub enabled: bool,
    /// When this rule fires.
    pub conditions: RuleConditions,
    /// Free-text intent, steering reply generation for matching messages.
    pub context: String,
}

// ── Ignore rules ────────────────────────────────────────────────────

/// Sender/subject substring denylist, checked before any rule matching.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IgnoreRules {
    /// Ignore a message if the sender address contains any of these.
    #[serde(default)]
    pub ignore_senders: Vec<String>,
    /// Ignore a message if the subject contains any of these.
    #[serde(default)]
    pub ignore_subject_contains: Vec<String>,
}

// ── Rule set ────────────────────────────────────────────────────────

/// The full rule file. Rule order is file order and is preserved:
/// matched contexts concatenate in declaration order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    pub ignore_rules: IgnoreRules,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

impl RuleSet {
    /// Validate invariants the serde shapes cannot express.
    ///
    /// Duplicate ids would make file edits that target an id ambiguous,
    /// so they are rejected at load time.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for rule in &self.rules {
            if !seen.insert(rule.id.as_str()) {
                return Err(ConfigError::DuplicateRuleId(rule.id.clone()));
            }
        }
        Ok(())
    }

    /// Look up a rule by id.
    pub fn rule(&self, id: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.id == id)
    }

    /// Enabled rules, in declaration order.
    pub fn enabled_rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter().filter(|r| r.enabled)
    }
}
