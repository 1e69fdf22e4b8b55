//! IMAP/SMTP mailbox — raw IMAP over rustls for fetching and flag
//! updates, lettre for sending replies.
//!
//! All socket work is blocking and runs under `spawn_blocking`. Each
//! operation opens its own short-lived IMAP session; message handles are
//! UIDs, so flag updates stay valid across sessions.
//!
//! Fetching uses `BODY.PEEK[]` deliberately: reading mail must not set
//! `\Seen`. Only an explicit `mark_read` does that, and skipped messages
//! stay unread for the next poll.

use std::io::Write as IoWrite;
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use mail_parser::MessageParser;
use tracing::{debug, info, warn};

use crate::error::{ConfigError, MailboxError};
use crate::mailbox::{EmailMessage, Mailbox};

// ── Configuration ───────────────────────────────────────────────────

/// Mail server settings, built from environment variables.
#[derive(Debug, Clone)]
pub struct EmailSettings {
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: String,
    pub from_address: String,
    /// IMAP folder to poll.
    pub folder: String,
}

impl EmailSettings {
    /// Build settings from `EMAIL_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let imap_host = std::env::var("EMAIL_IMAP_HOST")
            .map_err(|_| ConfigError::MissingEnvVar("EMAIL_IMAP_HOST".into()))?;

        let imap_port: u16 = std::env::var("EMAIL_IMAP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(993);

        let smtp_host =
            std::env::var("EMAIL_SMTP_HOST").unwrap_or_else(|_| imap_host.replace("imap", "smtp"));

        let smtp_port: u16 = std::env::var("EMAIL_SMTP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(587);

        let username = std::env::var("EMAIL_USERNAME")
            .map_err(|_| ConfigError::MissingEnvVar("EMAIL_USERNAME".into()))?;
        let password = std::env::var("EMAIL_PASSWORD")
            .map_err(|_| ConfigError::MissingEnvVar("EMAIL_PASSWORD".into()))?;
        let from_address =
            std::env::var("EMAIL_FROM_ADDRESS").unwrap_or_else(|_| username.clone());

        let folder = std::env::var("EMAIL_MAILBOX").unwrap_or_else(|_| "INBOX".to_string());

        Ok(Self {
            imap_host,
            imap_port,
            smtp_host,
            smtp_port,
            username,
            password,
            from_address,
            folder,
        })
    }
}

// ── Mailbox implementation ──────────────────────────────────────────

/// Production mailbox speaking IMAP (fetch, flags) and SMTP (replies).
pub struct ImapMailbox {
    settings: EmailSettings,
}

impl ImapMailbox {
    pub fn new(settings: EmailSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Mailbox for ImapMailbox {
    fn name(&self) -> &str {
        "imap"
    }

    async fn fetch_unread(&self, limit: usize) -> Result<Vec<EmailMessage>, MailboxError> {
        let settings = self.settings.clone();
        tokio::task::spawn_blocking(move || fetch_unread_blocking(&settings, limit))
            .await
            .map_err(|e| MailboxError::FetchFailed(format!("fetch task panicked: {e}")))?
    }

    async fn send_reply(&self, original: &EmailMessage, body: &str) -> Result<(), MailboxError> {
        let settings = self.settings.clone();
        let to = original.from.clone();
        let subject = reply_subject(&original.subject);
        let original_id = original.id.clone();
        let body = body.to_string();

        tokio::task::spawn_blocking(move || {
            send_email_blocking(&settings, &to, &subject, &original_id, &body)
        })
        .await
        .map_err(|e| MailboxError::SendFailed {
            to: original.from.clone(),
            reason: format!("send task panicked: {e}"),
        })?
    }

    async fn mark_read(&self, message: &EmailMessage) -> Result<(), MailboxError> {
        let settings = self.settings.clone();
        let uid = message.uid;
        tokio::task::spawn_blocking(move || store_flag_blocking(&settings, uid, "\\Seen"))
            .await
            .map_err(|e| MailboxError::FlagUpdateFailed {
                uid,
                reason: format!("store task panicked: {e}"),
            })?
    }

    async fn add_label(&self, message: &EmailMessage, label: &str) -> Result<(), MailboxError> {
        let settings = self.settings.clone();
        let uid = message.uid;
        // IMAP keyword flag; servers without PERMANENTFLAGS \* reject it
        let flag = label.to_string();
        tokio::task::spawn_blocking(move || store_flag_blocking(&settings, uid, &flag))
            .await
            .map_err(|e| MailboxError::FlagUpdateFailed {
                uid,
                reason: format!("store task panicked: {e}"),
            })?
    }
}

// ── IMAP session ────────────────────────────────────────────────────

/// One logged-in IMAP connection with a running tag counter.
struct ImapSession {
    tls: rustls::StreamOwned<rustls::ClientConnection, TcpStream>,
    tag: u32,
}

impl ImapSession {
    /// Connect, authenticate, and select the configured folder.
    fn connect(settings: &EmailSettings) -> Result<Self, MailboxError> {
        let tcp = TcpStream::connect((&*settings.imap_host, settings.imap_port)).map_err(|e| {
            MailboxError::ConnectFailed {
                host: settings.imap_host.clone(),
                reason: e.to_string(),
            }
        })?;
        tcp.set_read_timeout(Some(Duration::from_secs(30)))?;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        let server_name: rustls::pki_types::ServerName<'_> =
            rustls::pki_types::ServerName::try_from(settings.imap_host.clone()).map_err(|e| {
                MailboxError::ConnectFailed {
                    host: settings.imap_host.clone(),
                    reason: format!("invalid server name: {e}"),
                }
            })?;
        let conn = rustls::ClientConnection::new(tls_config, server_name).map_err(|e| {
            MailboxError::ConnectFailed {
                host: settings.imap_host.clone(),
                reason: e.to_string(),
            }
        })?;
        let tls = rustls::StreamOwned::new(conn, tcp);

        let mut session = Self { tls, tag: 0 };
        let _greeting = session.read_line()?;

        let login = session.command(&format!(
            "LOGIN \"{}\" \"{}\"",
            settings.username, settings.password
        ))?;
        if !response_ok(&login) {
            return Err(MailboxError::AuthFailed {
                user: settings.username.clone(),
            });
        }

        let select = session.command(&format!("SELECT \"{}\"", settings.folder))?;
        if !response_ok(&select) {
            return Err(MailboxError::FetchFailed(format!(
                "SELECT {} failed: {}",
                settings.folder,
                select.last().map(String::as_str).unwrap_or("").trim()
            )));
        }

        Ok(session)
    }

    /// Read one CRLF-terminated line, including the terminator.
    fn read_line(&mut self) -> Result<String, MailboxError> {
        let mut buf = Vec::new();
        loop {
            let mut byte = [0u8; 1];
            match std::io::Read::read(&mut self.tls, &mut byte) {
                Ok(0) => {
                    return Err(MailboxError::Io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "IMAP connection closed",
                    )));
                }
                Ok(_) => {
                    buf.push(byte[0]);
                    if buf.ends_with(b"\r\n") {
                        return Ok(String::from_utf8_lossy(&buf).to_string());
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Send one tagged command and collect lines up to the tagged reply.
    fn command(&mut self, cmd: &str) -> Result<Vec<String>, MailboxError> {
        self.tag += 1;
        let tag = format!("A{}", self.tag);
        let full = format!("{tag} {cmd}\r\n");
        IoWrite::write_all(&mut self.tls, full.as_bytes())?;
        IoWrite::flush(&mut self.tls)?;

        let tag_prefix = format!("{tag} ");
        let mut lines = Vec::new();
        loop {
            let line = self.read_line()?;
            let done = line.starts_with(&tag_prefix);
            lines.push(line);
            if done {
                break;
            }
        }
        Ok(lines)
    }

    /// Best-effort LOGOUT; the session is gone either way.
    fn logout(mut self) {
        let _ = self.command("LOGOUT");
    }
}

/// True when the tagged reply line reports OK.
fn response_ok(lines: &[String]) -> bool {
    lines
        .last()
        .is_some_and(|l| l.split_whitespace().nth(1) == Some("OK"))
}

// ── Blocking operations ─────────────────────────────────────────────

/// Fetch up to `limit` unseen messages without touching their flags.
fn fetch_unread_blocking(
    settings: &EmailSettings,
    limit: usize,
) -> Result<Vec<EmailMessage>, MailboxError> {
    let mut session = ImapSession::connect(settings)?;

    let search = session.command("UID SEARCH UNSEEN")?;
    if !response_ok(&search) {
        return Err(MailboxError::FetchFailed(
            "UID SEARCH UNSEEN rejected".into(),
        ));
    }

    let mut uids: Vec<u32> = Vec::new();
    for line in &search {
        if line.starts_with("* SEARCH") {
            uids.extend(
                line.split_whitespace()
                    .skip(2)
                    .filter_map(|t| t.parse::<u32>().ok()),
            );
        }
    }
    uids.truncate(limit);

    let mut messages = Vec::with_capacity(uids.len());
    for uid in uids {
        // BODY.PEEK[] so the fetch itself never sets \Seen
        let fetch = session.command(&format!("UID FETCH {uid} (BODY.PEEK[])"))?;

        // Drop the untagged FETCH header line and the tagged reply;
        // stray framing like the closing paren is parser-tolerated
        let raw: String = fetch
            .iter()
            .skip(1)
            .take(fetch.len().saturating_sub(2))
            .cloned()
            .collect();

        match parse_email(uid, raw.as_bytes()) {
            Some(message) => messages.push(message),
            None => warn!(uid, "Skipping unparseable message"),
        }
    }

    session.logout();
    debug!(count = messages.len(), "Fetched unread messages");
    Ok(messages)
}

/// Add one flag (system flag or keyword) to a message.
fn store_flag_blocking(
    settings: &EmailSettings,
    uid: u32,
    flag: &str,
) -> Result<(), MailboxError> {
    let mut session = ImapSession::connect(settings)?;
    let store = session.command(&format!("UID STORE {uid} +FLAGS ({flag})"))?;
    session.logout();

    if response_ok(&store) {
        Ok(())
    } else {
        Err(MailboxError::FlagUpdateFailed {
            uid,
            reason: store
                .last()
                .map(|l| l.trim().to_string())
                .unwrap_or_default(),
        })
    }
}

/// Send a threaded reply via SMTP.
fn send_email_blocking(
    settings: &EmailSettings,
    to: &str,
    subject: &str,
    original_id: &str,
    body: &str,
) -> Result<(), MailboxError> {
    let send_err = |reason: String| MailboxError::SendFailed {
        to: to.to_string(),
        reason,
    };

    let creds = Credentials::new(settings.username.clone(), settings.password.clone());
    let transport = SmtpTransport::relay(&settings.smtp_host)
        .map_err(|e| send_err(format!("SMTP relay error: {e}")))?
        .port(settings.smtp_port)
        .credentials(creds)
        .build();

    let mut builder = Message::builder()
        .from(
            settings
                .from_address
                .parse()
                .map_err(|e| send_err(format!("Invalid from address: {e}")))?,
        )
        .to(to
            .parse()
            .map_err(|e| send_err(format!("Invalid to address: {e}")))?)
        .subject(subject);

    // Thread the reply when the original carried a real Message-ID;
    // synthetic uid-derived ids are not valid header values
    if original_id.contains('@') {
        let msgid = bracketed(original_id);
        builder = builder.in_reply_to(msgid.clone()).references(msgid);
    }

    let email = builder
        .body(body.to_string())
        .map_err(|e| send_err(format!("Failed to build email: {e}")))?;

    transport
        .send(&email)
        .map_err(|e| send_err(format!("SMTP send failed: {e}")))?;

    info!(to = %to, "Reply sent");
    Ok(())
}

// ── Message assembly ────────────────────────────────────────────────

/// Parse raw RFC822 bytes into an `EmailMessage`.
fn parse_email(uid: u32, raw: &[u8]) -> Option<EmailMessage> {
    let parsed = MessageParser::default().parse(raw)?;

    let from = parsed
        .from()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "unknown".into());

    let subject = parsed.subject().unwrap_or_default().to_string();
    let body = extract_text(&parsed);
    let id = parsed
        .message_id()
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("uid-{uid}"));

    let received_at = parsed
        .date()
        .and_then(|d| {
            chrono::NaiveDate::from_ymd_opt(i32::from(d.year), u32::from(d.month), u32::from(d.day))
                .and_then(|date| {
                    date.and_hms_opt(u32::from(d.hour), u32::from(d.minute), u32::from(d.second))
                })
                .map(|naive| naive.and_utc())
        })
        .unwrap_or_else(Utc::now);

    Some(EmailMessage {
        id,
        uid,
        from,
        subject,
        body,
        received_at,
    })
}

/// Extract readable text from a parsed email, preferring the plain part.
fn extract_text(parsed: &mail_parser::Message) -> String {
    if let Some(text) = parsed.body_text(0) {
        return text.to_string();
    }
    if let Some(html) = parsed.body_html(0) {
        return strip_html(html.as_ref());
    }
    String::new()
}

/// Strip HTML tags from content (basic).
fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    // Normalize whitespace
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Subject line for a reply: prefix `Re:` unless one is already there.
fn reply_subject(original: &str) -> String {
    let trimmed = original.trim();
    if trimmed.is_empty() {
        "Re: (no subject)".to_string()
    } else if trimmed.to_lowercase().starts_with("re:") {
        trimmed.to_string()
    } else {
        format!("Re: {trimmed}")
    }
}

/// Wrap a Message-ID in angle brackets unless it already has them.
fn bracketed(id: &str) -> String {
    if id.starts_with('<') {
        id.to_string()
    } else {
        format!("<{id}>")
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── Reply subject tests ─────────────────────────────────────────

    #[test]
    fn reply_subject_prefixes_re() {
        assert_eq!(reply_subject("Need help"), "Re: Need help");
    }

    #[test]
    fn reply_subject_keeps_existing_re() {
        assert_eq!(reply_subject("Re: Need help"), "Re: Need help");
        assert_eq!(reply_subject("RE: Need help"), "RE: Need help");
    }

    #[test]
    fn reply_subject_handles_empty() {
        assert_eq!(reply_subject(""), "Re: (no subject)");
        assert_eq!(reply_subject("   "), "Re: (no subject)");
    }

    // ── Message-ID bracket tests ────────────────────────────────────

    #[test]
    fn bracketed_wraps_bare_ids() {
        assert_eq!(bracketed("abc@mail.example"), "<abc@mail.example>");
        assert_eq!(bracketed("<abc@mail.example>"), "<abc@mail.example>");
    }

    // ── HTML stripping tests ────────────────────────────────────────

    #[test]
    fn strip_html_basic() {
        assert_eq!(strip_html("<p>Hello</p>"), "Hello");
    }

    #[test]
    fn strip_html_nested_tags() {
        assert_eq!(
            strip_html("<div><b>Bold</b> and <i>italic</i></div>"),
            "Bold and italic"
        );
    }

    #[test]
    fn strip_html_whitespace_normalized() {
        assert_eq!(strip_html("<p>  Hello   World  </p>"), "Hello World");
    }

    #[test]
    fn strip_html_plain_text_passthrough() {
        assert_eq!(strip_html("No HTML here"), "No HTML here");
    }

    // ── RFC822 parsing tests ────────────────────────────────────────

    #[test]
    fn parse_email_extracts_fields() {
        let raw = b"Message-ID: <abc@mail.example>\r\n\
            From: Alice <alice@example.com>\r\n\
            To: support@shop.example\r\n\
            Subject: Need help\r\n\
            Date: Mon, 5 Jan 2026 10:00:00 +0000\r\n\
            \r\n\
            My login is broken.\r\n";

        let msg = parse_email(42, raw).unwrap();
        assert_eq!(msg.uid, 42);
        assert_eq!(msg.id, "abc@mail.example");
        assert_eq!(msg.from, "alice@example.com");
        assert_eq!(msg.subject, "Need help");
        assert!(msg.body.contains("My login is broken."));
    }

    #[test]
    fn parse_email_without_message_id_uses_uid() {
        let raw = b"From: bob@example.com\r\nSubject: Hi\r\n\r\nHello.\r\n";
        let msg = parse_email(7, raw).unwrap();
        assert_eq!(msg.id, "uid-7");
    }

    #[test]
    fn parse_email_missing_subject_is_empty() {
        let raw = b"From: bob@example.com\r\n\r\nNo subject here.\r\n";
        let msg = parse_email(8, raw).unwrap();
        assert_eq!(msg.subject, "");
    }

    #[test]
    fn parse_email_html_only_body_is_stripped() {
        let raw = b"From: bob@example.com\r\n\
            Subject: Promo\r\n\
            Content-Type: text/html; charset=utf-8\r\n\
            \r\n\
            <html><body><p>Big <b>sale</b> today</p></body></html>\r\n";

        let msg = parse_email(9, raw).unwrap();
        assert!(msg.body.contains("Big sale today"));
        assert!(!msg.body.contains('<'));
    }

    // ── Response status tests ───────────────────────────────────────

    #[test]
    fn response_ok_reads_tagged_status() {
        let ok = vec!["* 2 EXISTS\r\n".to_string(), "A2 OK done\r\n".to_string()];
        assert!(response_ok(&ok));

        let no = vec!["A2 NO [AUTHENTICATIONFAILED]\r\n".to_string()];
        assert!(!response_ok(&no));
    }

    // ── Settings tests ──────────────────────────────────────────────

    #[test]
    fn settings_from_env_requires_imap_host() {
        // SAFETY: no other test in this crate reads EMAIL_IMAP_HOST concurrently.
        unsafe { std::env::remove_var("EMAIL_IMAP_HOST") };
        assert!(matches!(
            EmailSettings::from_env(),
            Err(ConfigError::MissingEnvVar(var)) if var == "EMAIL_IMAP_HOST"
        ));
    }
}
