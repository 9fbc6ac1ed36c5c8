//! Mailbox capability consumed by the triage loop.
//!
//! The capability is deliberately stringly: every operation returns text the
//! model can read, and failures are formatted into that text rather than
//! raised. The structured `InboxSource` side feeds the poller.

pub mod format;
pub mod gmail;
pub mod memory;

pub use gmail::{GmailClient, GmailConfig};
pub use memory::InMemoryMailbox;

use async_trait::async_trait;

use crate::error::MailError;
use crate::triage::types::Email;

/// The four mailbox operations available to the action agent.
#[async_trait]
pub trait MailCapability: Send + Sync {
    /// Sender and subject of the latest unread messages.
    async fn list_unread(&self, count: usize) -> String;

    /// Ids of the latest unread messages.
    async fn list_unread_ids(&self, count: usize) -> String;

    /// Subject, sender and a bounded preview of one message. Read-only.
    async fn get_message(&self, id: &str) -> String;

    /// Send a message, threading it under `reply_to_id` when given.
    ///
    /// Not idempotent: every successful call sends an email.
    async fn send_message(
        &self,
        to: &str,
        subject: &str,
        body: &str,
        reply_to_id: Option<&str>,
    ) -> String;
}

/// Structured access to unread mail for the poller.
#[async_trait]
pub trait InboxSource: Send + Sync {
    async fn fetch_unread(&self, count: usize) -> Result<Vec<Email>, MailError>;

    /// Take a triaged message out of the unread set so later fetches skip it.
    async fn mark_handled(&self, id: &str) -> Result<(), MailError>;
}
