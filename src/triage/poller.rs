//! Background inbox polling.
//!
//! Fetches unread mail on an interval, feeds it into the orchestrator and
//! marks each triaged email handled at the source.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::PollerConfig;
use crate::error::TriageError;
use crate::mail::InboxSource;
use crate::triage::orchestrator::Orchestrator;
use crate::triage::types::TriageAction;

/// Counts from one polling tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    pub fetched: usize,
    pub triaged: usize,
    pub failed: usize,
}

/// How often an idle poller checks its shutdown flag.
const SHUTDOWN_CHECK: Duration = Duration::from_millis(200);

/// Spawn the polling loop. Setting the returned flag stops it once the current
/// pass, if any, has finished.
pub fn spawn_inbox_poller(
    source: Arc<dyn InboxSource>,
    orchestrator: Arc<Orchestrator>,
    config: PollerConfig,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!(
            interval_secs = config.poll_interval.as_secs(),
            batch = config.batch_size,
            "Inbox poller started"
        );

        let mut seen = HashSet::new();
        let mut tick = tokio::time::interval(config.poll_interval);

        // First tick fires immediately.
        loop {
            tokio::select! {
                _ = tick.tick() => {}
                _ = wait_for_flag(&shutdown) => {}
            }

            if shutdown.load(Ordering::Relaxed) {
                info!("Inbox poller shutting down");
                return;
            }

            let report = poll_once(source.as_ref(), &orchestrator, &mut seen, config.batch_size).await;
            if report.fetched > 0 {
                info!(
                    fetched = report.fetched,
                    triaged = report.triaged,
                    failed = report.failed,
                    "Poll complete"
                );
            }
        }
    });

    (handle, shutdown_flag)
}

/// Ask the poller to stop and wait up to `grace` for the pass in flight.
///
/// Returns `false` if the grace period ran out and the task was aborted.
pub async fn stop_inbox_poller(
    mut handle: JoinHandle<()>,
    shutdown: &AtomicBool,
    grace: Duration,
) -> bool {
    shutdown.store(true, Ordering::Relaxed);
    match tokio::time::timeout(grace, &mut handle).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            error!(error = %e, "Inbox poller task failed");
            true
        }
        Err(_) => {
            warn!(grace_secs = grace.as_secs(), "Poller still busy after grace period, aborting");
            handle.abort();
            false
        }
    }
}

async fn wait_for_flag(flag: &AtomicBool) {
    while !flag.load(Ordering::Relaxed) {
        tokio::time::sleep(SHUTDOWN_CHECK).await;
    }
}

/// One polling pass.
///
/// Triaged emails are marked handled at the source so neither a later tick nor
/// a restart picks them up again. Emails whose classifier call failed on the
/// model side stay unread and are retried next tick. `seen` only covers ids
/// from the latest fetch; it guards against a source that failed to mark.
pub async fn poll_once(
    source: &dyn InboxSource,
    orchestrator: &Orchestrator,
    seen: &mut HashSet<String>,
    batch_size: usize,
) -> PollReport {
    let emails = match source.fetch_unread(batch_size).await {
        Ok(emails) => emails,
        Err(e) => {
            error!(error = %e, "Failed to fetch unread mail");
            return PollReport::default();
        }
    };

    let fetched_ids: HashSet<&str> = emails
        .iter()
        .filter_map(|e| e.message_id.as_deref())
        .collect();
    seen.retain(|id| fetched_ids.contains(id.as_str()));

    let fresh: Vec<_> = emails
        .into_iter()
        .filter(|e| e.message_id.as_ref().is_none_or(|id| !seen.contains(id)))
        .collect();
    let mut report = PollReport {
        fetched: fresh.len(),
        ..PollReport::default()
    };
    if fresh.is_empty() {
        return report;
    }

    for (id, result) in orchestrator.triage_batch(fresh).await {
        match result {
            Ok(outcome) => {
                report.triaged += 1;
                match &outcome.action {
                    TriageAction::Acted {
                        termination,
                        tool_calls,
                        ..
                    } => info!(
                        id = ?id,
                        subject = %outcome.email.subject,
                        termination = %termination,
                        tool_calls,
                        "Email handled"
                    ),
                    other => info!(
                        id = ?id,
                        subject = %outcome.email.subject,
                        action = ?other,
                        "Email handled"
                    ),
                }
            }
            Err(TriageError::Llm(e)) => {
                report.failed += 1;
                warn!(id = ?id, error = %e, "Classifier unavailable, will retry next poll");
                continue;
            }
            Err(e) => {
                report.failed += 1;
                warn!(id = ?id, error = %e, "Email could not be triaged");
            }
        }

        if let Some(id) = id {
            if let Err(e) = source.mark_handled(&id).await {
                warn!(id = %id, error = %e, "Failed to mark email handled");
            }
            seen.insert(id);
        }
    }

    report
}
