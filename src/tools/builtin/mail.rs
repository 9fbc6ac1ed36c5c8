//! Mailbox tools exposed to the action agent.
//!
//! Each tool is a thin argument-validating shim over `MailCapability`. The
//! capability already folds provider failures into its returned text, so
//! these tools only fail on bad arguments.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::mail::{MailCapability, format};
use crate::tools::tool::{
    Tool, ToolContext, ToolError, ToolOutput, clamped_count, optional_str, require_str,
};

const DEFAULT_COUNT: usize = 5;
const MAX_COUNT: usize = 50;

fn count_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "count": {
                "type": "integer",
                "description": "How many messages to return (default: 5, max: 50)",
                "default": DEFAULT_COUNT
            }
        }
    })
}

// ── list_latest_gmail_messages ──────────────────────────────────────

pub struct ListMessagesTool {
    mailbox: Arc<dyn MailCapability>,
}

impl ListMessagesTool {
    pub fn new(mailbox: Arc<dyn MailCapability>) -> Self {
        Self { mailbox }
    }
}

#[async_trait]
impl Tool for ListMessagesTool {
    fn name(&self) -> &str {
        "list_latest_gmail_messages"
    }

    fn description(&self) -> &str {
        "List the sender and subject of the latest unread messages in the inbox."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        count_schema()
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let count = clamped_count(self.name(), &params, "count", DEFAULT_COUNT, 1, MAX_COUNT)?;
        let text = self.mailbox.list_unread(count).await;
        Ok(ToolOutput::text(text, start.elapsed()))
    }
}

// ── list_latest_messages_id ─────────────────────────────────────────

pub struct ListMessageIdsTool {
    mailbox: Arc<dyn MailCapability>,
}

impl ListMessageIdsTool {
    pub fn new(mailbox: Arc<dyn MailCapability>) -> Self {
        Self { mailbox }
    }
}

#[async_trait]
impl Tool for ListMessageIdsTool {
    fn name(&self) -> &str {
        "list_latest_messages_id"
    }

    fn description(&self) -> &str {
        "List the ids of the latest unread messages. Use an id with \
         get_gmail_message_content or as reply_to_id when replying."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        count_schema()
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let count = clamped_count(self.name(), &params, "count", DEFAULT_COUNT, 1, MAX_COUNT)?;
        let text = self.mailbox.list_unread_ids(count).await;
        Ok(ToolOutput::text(text, start.elapsed()))
    }
}

// ── get_gmail_message_content ───────────────────────────────────────

pub struct GetMessageTool {
    mailbox: Arc<dyn MailCapability>,
}

impl GetMessageTool {
    pub fn new(mailbox: Arc<dyn MailCapability>) -> Self {
        Self { mailbox }
    }
}

#[async_trait]
impl Tool for GetMessageTool {
    fn name(&self) -> &str {
        "get_gmail_message_content"
    }

    fn description(&self) -> &str {
        "Read the subject, sender and the start of the body of one message by id."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "message_id": {
                    "type": "string",
                    "description": "Id of the message to read"
                }
            },
            "required": ["message_id"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let id = require_str(self.name(), &params, "message_id")?;
        let text = self.mailbox.get_message(id).await;
        Ok(ToolOutput::text(text, start.elapsed()))
    }
}

// ── send_gmail_message ──────────────────────────────────────────────

pub struct SendMessageTool {
    mailbox: Arc<dyn MailCapability>,
}

impl SendMessageTool {
    pub fn new(mailbox: Arc<dyn MailCapability>) -> Self {
        Self { mailbox }
    }
}

#[async_trait]
impl Tool for SendMessageTool {
    fn name(&self) -> &str {
        "send_gmail_message"
    }

    fn description(&self) -> &str {
        "Send an email. Pass reply_to_id to reply inside the thread of an \
         existing message."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "to": {
                    "type": "string",
                    "description": "Recipient email address"
                },
                "subject": {
                    "type": "string",
                    "description": "Subject line"
                },
                "body": {
                    "type": "string",
                    "description": "Plain-text body"
                },
                "reply_to_id": {
                    "type": "string",
                    "description": "Id of the message being answered (optional)"
                }
            },
            "required": ["to", "subject", "body"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        // Models often pass the From header verbatim.
        let to = format::bare_address(require_str(self.name(), &params, "to")?);
        let subject = require_str(self.name(), &params, "subject")?;
        let body = require_str(self.name(), &params, "body")?;
        let reply_to_id = optional_str(self.name(), &params, "reply_to_id")?;

        tracing::info!(
            run = %ctx.run_id,
            to = %to,
            reply_to = ?reply_to_id,
            "Sending email"
        );
        let text = self
            .mailbox
            .send_message(&to, subject, body, reply_to_id)
            .await;
        Ok(ToolOutput::text(text, start.elapsed()))
    }

    fn is_idempotent(&self) -> bool {
        false
    }

    fn execution_timeout(&self) -> Duration {
        Duration::from_secs(60)
    }
}
