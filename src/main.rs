use std::sync::Arc;
use std::sync::atomic::Ordering;

use mailpilot::api::{AppState, management_routes};
use mailpilot::config::ServiceConfig;
use mailpilot::llm::{LlmBackend, LlmConfig, ReplyGenerator, create_provider};
use mailpilot::mailbox::imap::{EmailSettings, ImapMailbox};
use mailpilot::pipeline::BatchProcessor;
use mailpilot::rules::store::RuleStore;
use mailpilot::scheduler::{Scheduler, spawn_scheduler};
use mailpilot::stats::ProcessingStats;

fn env_filter() -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Initialize tracing; MAILPILOT_LOG_DIR switches output to daily
    // rolling log files instead of stderr
    let _log_guard = match std::env::var("MAILPILOT_LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(&dir, "mailpilot.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer)
                .init();
            Some(guard)
        }
        Err(_) => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_target(false)
                .init();
            None
        }
    };

    // Read API key from environment; Anthropic wins when both are set
    let (backend, api_key, default_model) = if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
        (LlmBackend::Anthropic, key, "claude-sonnet-4-20250514")
    } else if let Ok(key) = std::env::var("OPENAI_API_KEY") {
        (LlmBackend::OpenAi, key, "gpt-4o-mini")
    } else {
        eprintln!("Error: no LLM API key set");
        eprintln!("  export ANTHROPIC_API_KEY=sk-ant-...");
        eprintln!("  (or OPENAI_API_KEY=sk-... to use OpenAI)");
        std::process::exit(1);
    };

    let model = std::env::var("MAILPILOT_MODEL").unwrap_or_else(|_| default_model.to_string());

    let config = ServiceConfig::from_env();

    let settings = EmailSettings::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        eprintln!("  export EMAIL_IMAP_HOST=imap.example.com");
        eprintln!("  export EMAIL_USERNAME=you@example.com EMAIL_PASSWORD=...");
        std::process::exit(1);
    });

    eprintln!("📬 Mailpilot v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", model);
    eprintln!(
        "   Mailbox: {} ({} on {})",
        settings.username, settings.folder, settings.imap_host
    );
    eprintln!(
        "   Poll: every {}s, up to {} messages per batch",
        config.poll_interval.as_secs(),
        config.batch_limit
    );
    eprintln!("   API: http://0.0.0.0:{}/api/status\n", config.http_port);

    // Create LLM provider
    let llm_config = LlmConfig {
        backend,
        api_key: secrecy::SecretString::from(api_key),
        model,
    };
    let llm = create_provider(&llm_config)?;

    // ── Rules ────────────────────────────────────────────────────────────
    let store = Arc::new(RuleStore::new(config.rules_path.clone()));
    let rules = store.load().await.unwrap_or_else(|e| {
        eprintln!(
            "Error: failed to load rules from {}: {}",
            config.rules_path.display(),
            e
        );
        std::process::exit(1);
    });
    eprintln!(
        "   Rules: {} loaded, {} enabled ({})",
        rules.rules.len(),
        rules.enabled_rules().count(),
        config.rules_path.display()
    );

    // ── Pipeline ─────────────────────────────────────────────────────────
    let mailbox = Arc::new(ImapMailbox::new(settings));
    let processor = Arc::new(BatchProcessor::new(
        Arc::clone(&store),
        ReplyGenerator::new(llm),
        mailbox,
        config.pacing,
        config.mark_as_read,
    ));

    // ── Scheduler ────────────────────────────────────────────────────────
    let stats = Arc::new(ProcessingStats::new());
    let scheduler = Arc::new(Scheduler::new(
        Arc::clone(&processor),
        Arc::clone(&stats),
        config.poll_interval,
        config.batch_limit,
    ));
    let (_scheduler_handle, scheduler_shutdown) = spawn_scheduler(Arc::clone(&scheduler));

    // Spawn Axum server for the management API
    let app = management_routes(AppState {
        store,
        scheduler,
        stats,
    });
    let http_port = config.http_port;
    tokio::spawn(async move {
        let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", http_port))
            .await
            .expect("Failed to bind management API port");
        tracing::info!(port = http_port, "Management API started");
        axum::serve(listener, app).await.ok();
    });

    tokio::signal::ctrl_c().await?;
    eprintln!("\nShutting down");
    scheduler_shutdown.store(true, Ordering::Relaxed);

    Ok(())
}
