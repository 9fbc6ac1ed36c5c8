use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use inbox_triage::config::{PollerConfig, TriageConfig};
use inbox_triage::llm::{LlmConfig, create_provider_with_retries};
use inbox_triage::mail::{GmailClient, GmailConfig, InboxSource, MailCapability};
use inbox_triage::tools::ToolRegistry;
use inbox_triage::tools::builtin::register_mail_tools;
use inbox_triage::triage::{Orchestrator, poll_once, spawn_inbox_poller, stop_inbox_poller};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let _log_guard = init_tracing();

    let once = std::env::args().skip(1).any(|a| a == "--once");

    let llm_config = LlmConfig::from_env().context("LLM configuration")?;
    let triage_config = TriageConfig::from_env().context("triage configuration")?;
    let poller_config = PollerConfig::from_env().context("poller configuration")?;
    let gmail_config = GmailConfig::from_env().context("Gmail configuration")?;

    eprintln!("📬 Inbox Triage v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", llm_config.model);
    eprintln!("   Max turns: {}", triage_config.max_turns);
    if once {
        eprintln!("   Mode: single pass");
    } else {
        eprintln!(
            "   Polling every {}s (batch {})\n",
            poller_config.poll_interval.as_secs(),
            poller_config.batch_size
        );
    }

    let llm = create_provider_with_retries(&llm_config)?;

    let gmail = Arc::new(GmailClient::new(gmail_config)?);
    let tools = Arc::new(ToolRegistry::new());
    let mailbox: Arc<dyn MailCapability> = gmail.clone();
    register_mail_tools(&tools, mailbox);
    tracing::info!(tools = tools.count(), "Tool registry ready");

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&llm),
        llm,
        tools,
        triage_config,
        llm_config.temperature,
    ));

    let source: Arc<dyn InboxSource> = gmail;

    if once {
        let mut seen = HashSet::new();
        let report = poll_once(
            source.as_ref(),
            &orchestrator,
            &mut seen,
            poller_config.batch_size,
        )
        .await;
        eprintln!(
            "Fetched {}, triaged {}, failed {}",
            report.fetched, report.triaged, report.failed
        );
        return Ok(());
    }

    let grace = poller_config.shutdown_grace;
    let (handle, shutdown) = spawn_inbox_poller(source, orchestrator, poller_config);

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    tracing::info!(grace_secs = grace.as_secs(), "Shutdown requested, finishing in-flight triages");
    if !stop_inbox_poller(handle, &shutdown, grace).await {
        tracing::warn!("In-flight triages were cut short");
    }

    Ok(())
}

/// Stderr logging, plus a daily rolling file when `TRIAGE_LOG_DIR` is set.
/// The returned guard must live until exit so buffered lines are flushed.
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    let (file_layer, guard) = match std::env::var("TRIAGE_LOG_DIR") {
        Ok(dir) if !dir.trim().is_empty() => {
            let appender = tracing_appender::rolling::daily(dir.trim(), "inbox-triage.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    guard
}
