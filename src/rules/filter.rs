//! Message filtering against a rule-set snapshot.
//!
//! Decision order for one message:
//! 1. Ignore lists (sender, subject) — a hit short-circuits everything
//! 2. Enabled rules, matched by case-insensitive substring over
//!    `subject + " " + body`
//! 3. Context assembly: matched rules' contexts joined in declaration
//!    order, or a fixed fallback when nothing matched
//!
//! Matching is deliberately substring-based, not tokenized: "helper"
//! matches a `help` keyword. That trade-off is part of the contract.

use std::sync::Arc;

use tracing::debug;

use crate::mailbox::EmailMessage;
use crate::rules::model::{MatchMode, Rule, RuleSet};

/// Context handed to reply generation when no rule matched.
pub const FALLBACK_CONTEXT: &str = "This is an email message";

/// Separator between matched rules' context strings.
const CONTEXT_SEPARATOR: &str = ". ";

/// Pure matching over one immutable rule-set snapshot.
///
/// Holding an `Arc<RuleSet>` pins the snapshot: a store reload never
/// changes decisions mid-message.
pub struct FilterEngine {
    rules: Arc<RuleSet>,
}

impl FilterEngine {
    pub fn new(rules: Arc<RuleSet>) -> Self {
        Self { rules }
    }

    /// True if the sender or subject hits an ignore-list entry.
    pub fn is_ignored(&self, message: &EmailMessage) -> bool {
        let sender = message.from.to_lowercase();
        let subject = message.subject.to_lowercase();
        let ignore = &self.rules.ignore_rules;

        for entry in &ignore.ignore_senders {
            if sender.contains(&entry.to_lowercase()) {
                debug!(
                    id = %message.id,
                    from = %message.from,
                    entry = %entry,
                    "Message ignored by sender list"
                );
                return true;
            }
        }

        for entry in &ignore.ignore_subject_contains {
            if subject.contains(&entry.to_lowercase()) {
                debug!(
                    id = %message.id,
                    subject = %message.subject,
                    entry = %entry,
                    "Message ignored by subject list"
                );
                return true;
            }
        }

        false
    }

    /// Enabled rules whose condition holds, in declaration order.
    pub fn matching_rules(&self, message: &EmailMessage) -> Vec<&Rule> {
        let haystack = format!("{} {}", message.subject, message.body).to_lowercase();
        self.rules
            .enabled_rules()
            .filter(|rule| condition_holds(rule, &haystack))
            .collect()
    }

    /// False when ignored; otherwise true iff at least one rule matches.
    ///
    /// The ignore check runs first and wins over any rule match.
    pub fn should_process(&self, message: &EmailMessage) -> bool {
        if self.is_ignored(message) {
            return false;
        }
        let matched = self.matching_rules(message);
        debug!(
            id = %message.id,
            matched = matched.len(),
            "Rule matching complete"
        );
        !matched.is_empty()
    }

    /// Concatenated context of every matching rule, declaration order,
    /// or the fixed fallback when nothing matched.
    pub fn build_context(&self, message: &EmailMessage) -> String {
        let matched = self.matching_rules(message);
        if matched.is_empty() {
            return FALLBACK_CONTEXT.to_string();
        }
        matched
            .iter()
            .map(|rule| rule.context.as_str())
            .collect::<Vec<_>>()
            .join(CONTEXT_SEPARATOR)
    }
}

/// Evaluate one rule's keyword condition against the lower-cased
/// `subject + " " + body` haystack. No keywords means no match.
fn condition_holds(rule: &Rule, haystack: &str) -> bool {
    let keywords = &rule.conditions.keywords;
    if keywords.is_empty() {
        return false;
    }
    match rule.conditions.must_match {
        MatchMode::All => keywords
            .iter()
            .all(|k| haystack.contains(&k.to_lowercase())),
        MatchMode::Any => keywords
            .iter()
            .any(|k| haystack.contains(&k.to_lowercase())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::rules::model::{IgnoreRules, RuleConditions};

    fn make_message(from: &str, subject: &str, body: &str) -> EmailMessage {
        EmailMessage {
            id: "test-1".into(),
            uid: 1,
            from: from.into(),
            subject: subject.into(),
            body: body.into(),
            received_at: Utc::now(),
        }
    }

    fn make_rule(id: &str, enabled: bool, keywords: &[&str], mode: MatchMode) -> Rule {
        Rule {
            id: id.into(),
            enabled,
            conditions: RuleConditions {
                keywords: keywords.iter().map(|k| k.to_string()).collect(),
                must_match: mode,
            },
            context: format!("{id} context"),
        }
    }

    fn engine(rules: Vec<Rule>, ignore: IgnoreRules) -> FilterEngine {
        FilterEngine::new(Arc::new(RuleSet {
            ignore_rules: ignore,
            rules,
        }))
    }

    #[test]
    fn any_mode_matches_on_one_keyword() {
        let eng = engine(
            vec![make_rule("support", true, &["help", "support"], MatchMode::Any)],
            IgnoreRules::default(),
        );
        let msg = make_message("alice@example.com", "Need help", "please");
        let matched = eng.matching_rules(&msg);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].id, "support");
        assert!(eng.should_process(&msg));
    }

    #[test]
    fn all_mode_requires_every_keyword() {
        let eng = engine(
            vec![make_rule("billing", true, &["invoice", "overdue"], MatchMode::All)],
            IgnoreRules::default(),
        );

        let partial = make_message("bob@example.com", "Invoice attached", "see attachment");
        assert!(eng.matching_rules(&partial).is_empty());

        let full = make_message("bob@example.com", "Invoice overdue", "please pay");
        assert_eq!(eng.matching_rules(&full).len(), 1);
    }

    #[test]
    fn matching_is_case_insensitive() {
        let eng = engine(
            vec![make_rule("support", true, &["HELP"], MatchMode::Any)],
            IgnoreRules::default(),
        );
        let msg = make_message("a@b.com", "hElP needed", "");
        assert_eq!(eng.matching_rules(&msg).len(), 1);
    }

    #[test]
    fn substring_match_accepts_embedded_keyword() {
        // "helper" contains "help" — accepted behavior, not a bug
        let eng = engine(
            vec![make_rule("support", true, &["help"], MatchMode::Any)],
            IgnoreRules::default(),
        );
        let msg = make_message("a@b.com", "Looking for a helper", "");
        assert_eq!(eng.matching_rules(&msg).len(), 1);
    }

    #[test]
    fn keyword_may_span_subject_body_boundary() {
        // Subject and body join with a single space, so a two-word
        // keyword can straddle them
        let eng = engine(
            vec![make_rule("span", true, &["help me"], MatchMode::Any)],
            IgnoreRules::default(),
        );
        let msg = make_message("a@b.com", "Need help", "me please");
        assert_eq!(eng.matching_rules(&msg).len(), 1);
    }

    #[test]
    fn empty_keywords_never_match() {
        let eng = engine(
            vec![
                make_rule("empty-any", true, &[], MatchMode::Any),
                make_rule("empty-all", true, &[], MatchMode::All),
            ],
            IgnoreRules::default(),
        );
        let msg = make_message("a@b.com", "anything at all", "any body");
        assert!(eng.matching_rules(&msg).is_empty());
        assert!(!eng.should_process(&msg));
    }

    #[test]
    fn disabled_rule_never_matches() {
        let eng = engine(
            vec![make_rule("support", false, &["help"], MatchMode::Any)],
            IgnoreRules::default(),
        );
        let msg = make_message("a@b.com", "Need help", "please");
        assert!(eng.matching_rules(&msg).is_empty());
        assert!(!eng.should_process(&msg));
    }

    #[test]
    fn ignored_sender_short_circuits_rule_match() {
        let eng = engine(
            vec![make_rule("support", true, &["help"], MatchMode::Any)],
            IgnoreRules {
                ignore_senders: vec!["noreply".into()],
                ignore_subject_contains: vec![],
            },
        );
        let msg = make_message("noreply@foo.com", "Need help", "please");
        // The rule would match, but the ignore list wins
        assert!(eng.is_ignored(&msg));
        assert!(!eng.should_process(&msg));
        assert_eq!(eng.matching_rules(&msg).len(), 1);
    }

    #[test]
    fn ignored_subject_short_circuits() {
        let eng = engine(
            vec![make_rule("support", true, &["help"], MatchMode::Any)],
            IgnoreRules {
                ignore_senders: vec![],
                ignore_subject_contains: vec!["unsubscribe".into()],
            },
        );
        let msg = make_message("a@b.com", "Help me UNSUBSCRIBE", "");
        assert!(eng.is_ignored(&msg));
        assert!(!eng.should_process(&msg));
    }

    #[test]
    fn ignore_entries_match_case_insensitively() {
        let eng = engine(
            vec![],
            IgnoreRules {
                ignore_senders: vec!["NoReply".into()],
                ignore_subject_contains: vec![],
            },
        );
        let msg = make_message("NOREPLY@foo.com", "x", "y");
        assert!(eng.is_ignored(&msg));
    }

    #[test]
    fn context_falls_back_when_nothing_matches() {
        let eng = engine(
            vec![make_rule("support", true, &["help"], MatchMode::Any)],
            IgnoreRules::default(),
        );
        let msg = make_message("a@b.com", "unrelated", "nothing here");
        assert_eq!(eng.build_context(&msg), "This is an email message");
    }

    #[test]
    fn context_joins_matches_in_declaration_order() {
        let mut first = make_rule("a", true, &["topic"], MatchMode::Any);
        first.context = "First".into();
        let mut second = make_rule("b", true, &["topic"], MatchMode::Any);
        second.context = "Second".into();

        let eng = engine(vec![first, second], IgnoreRules::default());
        let msg = make_message("a@b.com", "topic", "");
        assert_eq!(eng.build_context(&msg), "First. Second");
    }

    #[test]
    fn single_match_context_has_no_separator() {
        let mut rule = make_rule("support", true, &["help"], MatchMode::Any);
        rule.context = "Support request".into();
        let eng = engine(vec![rule], IgnoreRules::default());

        let msg = make_message("a@b.com", "Need help", "please");
        assert_eq!(eng.build_context(&msg), "Support request");
    }

    #[test]
    fn should_process_requires_a_match() {
        let eng = engine(vec![], IgnoreRules::default());
        let msg = make_message("a@b.com", "hello", "world");
        assert!(!eng.should_process(&msg));
    }
}
