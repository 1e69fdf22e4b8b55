//! Batch reply processor — filter, generate, send, flag.
//!
//! Flow per message:
//! 1. Filter: ignore lists, then keyword rules. No pass, no reply.
//! 2. Generate: rule contexts steer the reply. No usable text is a
//!    `failed` outcome, not an error.
//! 3. Send the reply, mark read when configured, attach the tracking
//!    label (best effort).
//!
//! Messages run strictly in fetch order with the configured pacing gap
//! between them. A broken rules file aborts the whole run; anything
//! that goes wrong with a single message only counts against that
//! message.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::error::Error;
use crate::llm::ReplyGenerator;
use crate::mailbox::{EmailMessage, Mailbox};
use crate::pipeline::pacing::PacingPolicy;
use crate::pipeline::types::{BatchResult, MessageOutcome};
use crate::rules::filter::FilterEngine;
use crate::rules::store::RuleStore;

/// Flag attached to messages that received an automatic reply.
pub const REPLIED_LABEL: &str = "AutoReplied";

/// Skip reason when filtering declined the message.
const SKIP_NO_MATCH: &str = "no_matching_rules";

/// Failure reason when the generator produced no usable text.
const FAIL_EMPTY_REPLY: &str = "response_generation_failed";

/// Runs batches of unread messages through the reply pipeline.
pub struct BatchProcessor {
    store: Arc<RuleStore>,
    generator: ReplyGenerator,
    mailbox: Arc<dyn Mailbox>,
    pacing: PacingPolicy,
    mark_as_read: bool,
}

impl BatchProcessor {
    pub fn new(
        store: Arc<RuleStore>,
        generator: ReplyGenerator,
        mailbox: Arc<dyn Mailbox>,
        pacing: PacingPolicy,
        mark_as_read: bool,
    ) -> Self {
        Self {
            store,
            generator,
            mailbox,
            pacing,
            mark_as_read,
        }
    }

    /// Fetch up to `limit` unread messages and process them as one batch.
    ///
    /// An empty mailbox returns an all-zero result without further work.
    pub async fn process_unread(&self, limit: usize) -> Result<BatchResult, Error> {
        let messages = self.mailbox.fetch_unread(limit).await?;
        if messages.is_empty() {
            debug!(mailbox = self.mailbox.name(), "No unread messages");
            return Ok(BatchResult::default());
        }
        self.process_batch(&messages).await
    }

    /// Process messages sequentially, folding outcomes into counters.
    ///
    /// The pacing gap is applied between consecutive messages only.
    /// Returns `Err` only when the rules file cannot be loaded; that is
    /// a deployment problem and the run stops rather than misfiling
    /// every message as skipped.
    pub async fn process_batch(&self, messages: &[EmailMessage]) -> Result<BatchResult, Error> {
        let mut result = BatchResult {
            total: messages.len(),
            ..Default::default()
        };
        info!(
            total = result.total,
            mailbox = self.mailbox.name(),
            "Processing batch"
        );

        for (i, message) in messages.iter().enumerate() {
            if i > 0 {
                self.pacing.pause().await;
            }

            let outcome = self.process_message(message).await?;
            match &outcome {
                MessageOutcome::Success { reply_chars } => {
                    info!(
                        id = %message.id,
                        from = %message.from,
                        subject = %message.subject,
                        reply_chars,
                        "Reply sent"
                    );
                }
                MessageOutcome::Skipped { reason } => {
                    debug!(id = %message.id, reason = %reason, "Message skipped");
                }
                MessageOutcome::Failed { reason } => {
                    warn!(id = %message.id, reason = %reason, "No reply produced");
                }
                MessageOutcome::Error { reason } => {
                    error!(id = %message.id, reason = %reason, "Message processing failed");
                }
            }
            result.record(&outcome);
        }

        info!(
            total = result.total,
            processed = result.processed,
            skipped = result.skipped,
            failed = result.failed,
            "Batch complete"
        );
        Ok(result)
    }

    /// Run one message through filtering, generation, and delivery.
    pub async fn process_message(&self, message: &EmailMessage) -> Result<MessageOutcome, Error> {
        let rules = self.store.load().await?;
        let filter = FilterEngine::new(rules);

        if !filter.should_process(message) {
            return Ok(MessageOutcome::Skipped {
                reason: SKIP_NO_MATCH.into(),
            });
        }

        let context = filter.build_context(message);
        debug!(id = %message.id, context_chars = context.len(), "Generating reply");

        let reply = match self.generator.generate(message, &context).await {
            Ok(text) => text,
            Err(e) => {
                return Ok(MessageOutcome::Error {
                    reason: e.to_string(),
                });
            }
        };
        if reply.is_empty() {
            return Ok(MessageOutcome::Failed {
                reason: FAIL_EMPTY_REPLY.into(),
            });
        }

        if let Err(e) = self.mailbox.send_reply(message, &reply).await {
            return Ok(MessageOutcome::Error {
                reason: e.to_string(),
            });
        }

        if self.mark_as_read
            && let Err(e) = self.mailbox.mark_read(message).await
        {
            return Ok(MessageOutcome::Error {
                reason: e.to_string(),
            });
        }

        // The reply already went out; a lost label is not worth an error
        if let Err(e) = self.mailbox.add_label(message, REPLIED_LABEL).await {
            warn!(id = %message.id, error = %e, "Could not attach label");
        }

        Ok(MessageOutcome::Success {
            reply_chars: reply.chars().count(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;

    use crate::error::{LlmError, MailboxError};
    use crate::llm::provider::{
        CompletionRequest, CompletionResponse, FinishReason, LlmProvider,
    };

    const RULES: &str = r#"{
        "ignore_rules": {
            "ignore_senders": ["noreply"],
            "ignore_subject_contains": ["unsubscribe"]
        },
        "rules": [
            {
                "id": "support",
                "enabled": true,
                "conditions": { "keywords": ["help", "support"], "mustMatch": "any" },
                "context": "Support request"
            }
        ]
    }"#;

    // ── Stub LLM ────────────────────────────────────────────────────

    /// LLM stub that plays back scripted completions.
    struct StubLlm {
        script: Mutex<VecDeque<Result<String, LlmError>>>,
        calls: AtomicUsize,
    }

    impl StubLlm {
        fn replying(text: &str) -> Self {
            Self::scripted(vec![Ok(text.to_string())])
        }

        fn scripted(script: Vec<Result<String, LlmError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmProvider for StubLlm {
        fn model_name(&self) -> &str {
            "stub"
        }

        fn cost_per_token(&self) -> (rust_decimal::Decimal, rust_decimal::Decimal) {
            (rust_decimal::Decimal::ZERO, rust_decimal::Decimal::ZERO)
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok("Thanks for reaching out.".to_string()));
            next.map(|content| CompletionResponse {
                content,
                input_tokens: 10,
                output_tokens: 5,
                finish_reason: FinishReason::Stop,
                response_id: None,
            })
        }
    }

    // ── Mock mailbox ────────────────────────────────────────────────

    /// In-memory mailbox that records every call.
    #[derive(Default)]
    struct MockMailbox {
        unread: Mutex<Vec<EmailMessage>>,
        fetch_limits: Mutex<Vec<usize>>,
        sent: Mutex<Vec<(String, String)>>,
        read_uids: Mutex<Vec<u32>>,
        labels: Mutex<Vec<(u32, String)>>,
        fail_send: bool,
        fail_mark_read: bool,
        fail_label: bool,
    }

    impl MockMailbox {
        fn with_unread(messages: Vec<EmailMessage>) -> Self {
            Self {
                unread: Mutex::new(messages),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl Mailbox for MockMailbox {
        fn name(&self) -> &str {
            "mock"
        }

        async fn fetch_unread(&self, limit: usize) -> Result<Vec<EmailMessage>, MailboxError> {
            self.fetch_limits.lock().unwrap().push(limit);
            let unread = self.unread.lock().unwrap();
            Ok(unread.iter().take(limit).cloned().collect())
        }

        async fn send_reply(
            &self,
            original: &EmailMessage,
            body: &str,
        ) -> Result<(), MailboxError> {
            if self.fail_send {
                return Err(MailboxError::SendFailed {
                    to: original.from.clone(),
                    reason: "smtp refused".into(),
                });
            }
            self.sent
                .lock()
                .unwrap()
                .push((original.from.clone(), body.to_string()));
            Ok(())
        }

        async fn mark_read(&self, message: &EmailMessage) -> Result<(), MailboxError> {
            if self.fail_mark_read {
                return Err(MailboxError::FlagUpdateFailed {
                    uid: message.uid,
                    reason: "store rejected".into(),
                });
            }
            self.read_uids.lock().unwrap().push(message.uid);
            Ok(())
        }

        async fn add_label(&self, message: &EmailMessage, label: &str) -> Result<(), MailboxError> {
            if self.fail_label {
                return Err(MailboxError::FlagUpdateFailed {
                    uid: message.uid,
                    reason: "keywords not permitted".into(),
                });
            }
            self.labels
                .lock()
                .unwrap()
                .push((message.uid, label.to_string()));
            Ok(())
        }
    }

    // ── Helpers ─────────────────────────────────────────────────────

    fn make_message(uid: u32, from: &str, subject: &str, body: &str) -> EmailMessage {
        EmailMessage {
            id: format!("msg-{uid}@test"),
            uid,
            from: from.into(),
            subject: subject.into(),
            body: body.into(),
            received_at: Utc::now(),
        }
    }

    fn rule_store(contents: &str) -> (tempfile::TempDir, Arc<RuleStore>) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        std::fs::write(&path, contents).unwrap();
        (dir, Arc::new(RuleStore::new(path)))
    }

    fn processor(
        store: Arc<RuleStore>,
        llm: Arc<StubLlm>,
        mailbox: Arc<MockMailbox>,
        mark_as_read: bool,
    ) -> BatchProcessor {
        BatchProcessor::new(
            store,
            ReplyGenerator::new(llm),
            mailbox,
            PacingPolicy::None,
            mark_as_read,
        )
    }

    // ── Single message paths ────────────────────────────────────────

    #[tokio::test]
    async fn matching_message_gets_reply_flags_and_label() {
        let (_dir, store) = rule_store(RULES);
        let llm = Arc::new(StubLlm::replying("Happy to help with that."));
        let mailbox = Arc::new(MockMailbox::with_unread(vec![make_message(
            1,
            "alice@example.com",
            "Need help",
            "please",
        )]));
        let proc = processor(store, llm, Arc::clone(&mailbox), true);

        let result = proc.process_unread(10).await.unwrap();
        assert_eq!(
            result,
            BatchResult {
                total: 1,
                processed: 1,
                skipped: 0,
                failed: 0
            }
        );

        let sent = mailbox.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "alice@example.com");
        assert_eq!(sent[0].1, "Happy to help with that.");
        assert_eq!(*mailbox.read_uids.lock().unwrap(), vec![1]);
        assert_eq!(
            *mailbox.labels.lock().unwrap(),
            vec![(1, "AutoReplied".to_string())]
        );
    }

    #[tokio::test]
    async fn ignored_sender_is_skipped_without_llm_call() {
        let (_dir, store) = rule_store(RULES);
        let llm = Arc::new(StubLlm::replying("never used"));
        let mailbox = Arc::new(MockMailbox::with_unread(vec![make_message(
            1,
            "noreply@foo.com",
            "Need help",
            "please",
        )]));
        let proc = processor(store, Arc::clone(&llm), Arc::clone(&mailbox), true);

        let result = proc.process_unread(10).await.unwrap();
        assert_eq!(result.skipped, 1);
        assert_eq!(llm.call_count(), 0);
        assert!(mailbox.sent.lock().unwrap().is_empty());
        assert!(mailbox.read_uids.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unmatched_message_skips_with_reason() {
        let (_dir, store) = rule_store(RULES);
        let llm = Arc::new(StubLlm::replying("never used"));
        let mailbox = Arc::new(MockMailbox::default());
        let proc = processor(store, llm, mailbox, true);

        let msg = make_message(1, "bob@example.com", "Lunch tomorrow?", "12:30 works");
        let outcome = proc.process_message(&msg).await.unwrap();
        assert!(matches!(
            outcome,
            MessageOutcome::Skipped { reason } if reason == "no_matching_rules"
        ));
    }

    #[tokio::test]
    async fn empty_generator_output_is_failed_and_nothing_sent() {
        let (_dir, store) = rule_store(RULES);
        let llm = Arc::new(StubLlm::replying("   \n  "));
        let mailbox = Arc::new(MockMailbox::default());
        let proc = processor(store, llm, Arc::clone(&mailbox), true);

        let msg = make_message(1, "alice@example.com", "Need help", "please");
        let outcome = proc.process_message(&msg).await.unwrap();
        assert!(matches!(
            outcome,
            MessageOutcome::Failed { reason } if reason == "response_generation_failed"
        ));
        assert!(mailbox.sent.lock().unwrap().is_empty());
        assert!(mailbox.labels.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn generator_error_is_error_outcome() {
        let (_dir, store) = rule_store(RULES);
        let llm = Arc::new(StubLlm::scripted(vec![Err(LlmError::RequestFailed {
            provider: "stub".into(),
            reason: "timeout".into(),
        })]));
        let mailbox = Arc::new(MockMailbox::default());
        let proc = processor(store, llm, Arc::clone(&mailbox), true);

        let msg = make_message(1, "alice@example.com", "Need help", "please");
        let outcome = proc.process_message(&msg).await.unwrap();
        assert!(matches!(outcome, MessageOutcome::Error { .. }));
        assert!(mailbox.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn send_failure_is_error_outcome() {
        let (_dir, store) = rule_store(RULES);
        let llm = Arc::new(StubLlm::replying("A reply"));
        let mailbox = Arc::new(MockMailbox {
            fail_send: true,
            ..Default::default()
        });
        let proc = processor(store, llm, Arc::clone(&mailbox), true);

        let msg = make_message(1, "alice@example.com", "Need help", "please");
        let outcome = proc.process_message(&msg).await.unwrap();
        assert!(matches!(outcome, MessageOutcome::Error { .. }));
        // No flag updates after a failed send
        assert!(mailbox.read_uids.lock().unwrap().is_empty());
        assert!(mailbox.labels.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn mark_read_disabled_still_labels() {
        let (_dir, store) = rule_store(RULES);
        let llm = Arc::new(StubLlm::replying("A reply"));
        let mailbox = Arc::new(MockMailbox::default());
        let proc = processor(store, llm, Arc::clone(&mailbox), false);

        let msg = make_message(1, "alice@example.com", "Need help", "please");
        let outcome = proc.process_message(&msg).await.unwrap();
        assert!(matches!(outcome, MessageOutcome::Success { .. }));
        assert!(mailbox.read_uids.lock().unwrap().is_empty());
        assert_eq!(mailbox.labels.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn label_failure_does_not_sink_the_message() {
        let (_dir, store) = rule_store(RULES);
        let llm = Arc::new(StubLlm::replying("A reply"));
        let mailbox = Arc::new(MockMailbox {
            fail_label: true,
            ..Default::default()
        });
        let proc = processor(store, llm, Arc::clone(&mailbox), true);

        let msg = make_message(1, "alice@example.com", "Need help", "please");
        let outcome = proc.process_message(&msg).await.unwrap();
        assert!(matches!(outcome, MessageOutcome::Success { .. }));
        assert_eq!(mailbox.sent.lock().unwrap().len(), 1);
        assert_eq!(*mailbox.read_uids.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn mark_read_failure_is_error_outcome() {
        let (_dir, store) = rule_store(RULES);
        let llm = Arc::new(StubLlm::replying("A reply"));
        let mailbox = Arc::new(MockMailbox {
            fail_mark_read: true,
            ..Default::default()
        });
        let proc = processor(store, llm, Arc::clone(&mailbox), true);

        let msg = make_message(1, "alice@example.com", "Need help", "please");
        let outcome = proc.process_message(&msg).await.unwrap();
        // The reply went out but the message stays unread, so it is
        // surfaced as an error rather than silently double-counted
        assert!(matches!(outcome, MessageOutcome::Error { .. }));
        assert_eq!(mailbox.sent.lock().unwrap().len(), 1);
    }

    // ── Batch behavior ──────────────────────────────────────────────

    #[tokio::test]
    async fn empty_mailbox_returns_all_zero() {
        let (_dir, store) = rule_store(RULES);
        let llm = Arc::new(StubLlm::replying("never used"));
        let mailbox = Arc::new(MockMailbox::default());
        let proc = processor(store, Arc::clone(&llm), mailbox, true);

        let result = proc.process_unread(10).await.unwrap();
        assert_eq!(result, BatchResult::default());
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn empty_slice_batch_is_all_zero() {
        let (_dir, store) = rule_store(RULES);
        let llm = Arc::new(StubLlm::replying("never used"));
        let proc = processor(store, llm, Arc::new(MockMailbox::default()), true);

        let result = proc.process_batch(&[]).await.unwrap();
        assert_eq!(result, BatchResult::default());
    }

    #[tokio::test]
    async fn fetch_limit_is_forwarded() {
        let (_dir, store) = rule_store(RULES);
        let llm = Arc::new(StubLlm::replying("x"));
        let mailbox = Arc::new(MockMailbox::default());
        let proc = processor(store, llm, Arc::clone(&mailbox), true);

        proc.process_unread(3).await.unwrap();
        assert_eq!(*mailbox.fetch_limits.lock().unwrap(), vec![3]);
    }

    #[tokio::test]
    async fn per_message_error_does_not_abort_batch() {
        let (_dir, store) = rule_store(RULES);
        let llm = Arc::new(StubLlm::scripted(vec![
            Err(LlmError::RequestFailed {
                provider: "stub".into(),
                reason: "timeout".into(),
            }),
            Ok("Second reply".to_string()),
        ]));
        let mailbox = Arc::new(MockMailbox::with_unread(vec![
            make_message(1, "alice@example.com", "Need help", "please"),
            make_message(2, "bob@example.com", "support ticket", "still broken"),
        ]));
        let proc = processor(store, llm, Arc::clone(&mailbox), true);

        let result = proc.process_unread(10).await.unwrap();
        assert_eq!(
            result,
            BatchResult {
                total: 2,
                processed: 1,
                skipped: 0,
                failed: 1
            }
        );
        let sent = mailbox.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "bob@example.com");
    }

    #[tokio::test]
    async fn mixed_batch_counts_add_up() {
        let (_dir, store) = rule_store(RULES);
        let llm = Arc::new(StubLlm::scripted(vec![
            Ok("Reply one".to_string()),
            Ok(String::new()),
        ]));
        let mailbox = Arc::new(MockMailbox::with_unread(vec![
            make_message(1, "alice@example.com", "Need help", "please"),
            make_message(2, "noreply@foo.com", "Need help", "please"),
            make_message(3, "carol@example.com", "unrelated", "nothing"),
            make_message(4, "dave@example.com", "support question", "broken"),
        ]));
        let proc = processor(store, llm, mailbox, true);

        let result = proc.process_unread(10).await.unwrap();
        assert_eq!(result.total, 4);
        assert_eq!(result.processed, 1);
        assert_eq!(result.skipped, 2);
        assert_eq!(result.failed, 1);
    }

    #[tokio::test]
    async fn missing_rules_file_aborts_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(RuleStore::new(dir.path().join("absent.json")));
        let llm = Arc::new(StubLlm::replying("never used"));
        let mailbox = Arc::new(MockMailbox::with_unread(vec![make_message(
            1,
            "alice@example.com",
            "Need help",
            "please",
        )]));
        let proc = processor(store, llm, Arc::clone(&mailbox), true);

        assert!(proc.process_unread(10).await.is_err());
        assert!(mailbox.sent.lock().unwrap().is_empty());
    }

    // ── Pacing ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn pacing_gap_applies_between_messages() {
        let (_dir, store) = rule_store(RULES);
        let llm = Arc::new(StubLlm::scripted(vec![
            Ok("one".to_string()),
            Ok("two".to_string()),
            Ok("three".to_string()),
        ]));
        let mailbox = Arc::new(MockMailbox::with_unread(vec![
            make_message(1, "a@example.com", "help", ""),
            make_message(2, "b@example.com", "help", ""),
            make_message(3, "c@example.com", "help", ""),
        ]));
        let proc = BatchProcessor::new(
            store,
            ReplyGenerator::new(llm),
            mailbox,
            PacingPolicy::FixedDelay(Duration::from_millis(50)),
            true,
        );

        let started = std::time::Instant::now();
        let result = proc.process_unread(10).await.unwrap();
        assert_eq!(result.processed, 3);
        // Two gaps for three messages
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn single_message_batch_never_sleeps() {
        let (_dir, store) = rule_store(RULES);
        let llm = Arc::new(StubLlm::replying("one"));
        let mailbox = Arc::new(MockMailbox::with_unread(vec![make_message(
            1,
            "a@example.com",
            "help",
            "",
        )]));
        let proc = BatchProcessor::new(
            store,
            ReplyGenerator::new(llm),
            mailbox,
            PacingPolicy::FixedDelay(Duration::from_secs(30)),
            true,
        );

        let started = std::time::Instant::now();
        proc.process_unread(10).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
