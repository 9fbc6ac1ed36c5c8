//! In-process mailbox for tests and dry runs.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::MailError;
use crate::mail::format::{self, MessageSummary};
use crate::mail::{InboxSource, MailCapability};
use crate::triage::types::Email;

/// A message held by the mailbox.
#[derive(Debug, Clone)]
pub struct StoredMail {
    pub id: String,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub unread: bool,
}

/// A message sent through the mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMail {
    pub id: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub reply_to_id: Option<String>,
}

#[derive(Debug, Default)]
struct Inner {
    messages: Vec<StoredMail>,
    sent: Vec<SentMail>,
    failing_sends: u32,
    calls: usize,
    next_id: u64,
}

/// Mailbox kept in memory. Every capability call is counted.
#[derive(Debug, Default)]
pub struct InMemoryMailbox {
    inner: Mutex<Inner>,
}

impl InMemoryMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add an unread message and return its id.
    pub fn add_message(&self, from: &str, to: &str, subject: &str, body: &str) -> String {
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = format!("mem-{:04}", inner.next_id);
        inner.messages.push(StoredMail {
            id: id.clone(),
            from: from.to_string(),
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            unread: true,
        });
        id
    }

    /// Make the next `n` sends fail as if the network dropped.
    pub fn fail_next_sends(&self, n: u32) {
        self.lock().failing_sends = n;
    }

    /// Messages sent so far, oldest first.
    pub fn sent(&self) -> Vec<SentMail> {
        self.lock().sent.clone()
    }

    /// Number of capability calls made (all four operations).
    pub fn call_count(&self) -> usize {
        self.lock().calls
    }

    fn unread_latest_first(inner: &Inner, count: usize) -> Vec<StoredMail> {
        inner
            .messages
            .iter()
            .rev()
            .filter(|m| m.unread)
            .take(count)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl MailCapability for InMemoryMailbox {
    async fn list_unread(&self, count: usize) -> String {
        let mut inner = self.lock();
        inner.calls += 1;
        let summaries: Vec<MessageSummary> = Self::unread_latest_first(&inner, count)
            .into_iter()
            .map(|m| MessageSummary {
                from: m.from,
                subject: m.subject,
            })
            .collect();
        format::format_listing(&summaries)
    }

    async fn list_unread_ids(&self, count: usize) -> String {
        let mut inner = self.lock();
        inner.calls += 1;
        let ids: Vec<String> = Self::unread_latest_first(&inner, count)
            .into_iter()
            .map(|m| m.id)
            .collect();
        format::format_id_listing(&ids)
    }

    async fn get_message(&self, id: &str) -> String {
        let mut inner = self.lock();
        inner.calls += 1;
        match inner.messages.iter().find(|m| m.id == id) {
            Some(m) => format::format_message(&m.subject, &m.from, &m.body),
            None => format!(
                "Error retrieving message content for ID {id}: {}",
                MailError::NotFound { id: id.to_string() }
            ),
        }
    }

    async fn send_message(
        &self,
        to: &str,
        subject: &str,
        body: &str,
        reply_to_id: Option<&str>,
    ) -> String {
        let mut inner = self.lock();
        inner.calls += 1;

        if inner.failing_sends > 0 {
            inner.failing_sends -= 1;
            return "Error sending message: simulated network failure".to_string();
        }
        if let Some(original) = reply_to_id
            && !inner.messages.iter().any(|m| m.id == original)
        {
            return format!(
                "Error sending message: {}",
                MailError::NotFound {
                    id: original.to_string()
                }
            );
        }
        if !to.contains('@') {
            return format!(
                "Error sending message: {}",
                MailError::InvalidAddress {
                    address: to.to_string(),
                    reason: "missing @".into(),
                }
            );
        }

        inner.next_id += 1;
        let id = format!("sent-{:04}", inner.next_id);
        inner.sent.push(SentMail {
            id: id.clone(),
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            reply_to_id: reply_to_id.map(String::from),
        });
        format!("Message sent successfully to {to} with ID: {id}")
    }
}

#[async_trait]
impl InboxSource for InMemoryMailbox {
    async fn fetch_unread(&self, count: usize) -> Result<Vec<Email>, MailError> {
        let inner = self.lock();
        Ok(Self::unread_latest_first(&inner, count)
            .into_iter()
            .map(|m| Email {
                author: m.from,
                to: m.to,
                subject: m.subject,
                body_text: m.body,
                message_id: Some(m.id),
                thread_id: None,
                received_at: Some(Utc::now()),
            })
            .collect())
    }

    async fn mark_handled(&self, id: &str) -> Result<(), MailError> {
        let mut inner = self.lock();
        match inner.messages.iter_mut().find(|m| m.id == id) {
            Some(m) => {
                m.unread = false;
                Ok(())
            }
            None => Err(MailError::NotFound { id: id.to_string() }),
        }
    }
}
