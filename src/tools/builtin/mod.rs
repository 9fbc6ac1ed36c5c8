//! Built-in tools: the mailbox operations and the stop tool.

pub mod done;
pub mod mail;

pub use done::{DONE_TOOL_NAME, DoneTool};
pub use mail::{GetMessageTool, ListMessageIdsTool, ListMessagesTool, SendMessageTool};

use std::sync::Arc;

use crate::mail::MailCapability;
use crate::tools::ToolRegistry;

/// Register the four mailbox tools and `done`.
pub fn register_mail_tools(registry: &ToolRegistry, mailbox: Arc<dyn MailCapability>) {
    registry.register_sync(Arc::new(ListMessagesTool::new(Arc::clone(&mailbox))));
    registry.register_sync(Arc::new(ListMessageIdsTool::new(Arc::clone(&mailbox))));
    registry.register_sync(Arc::new(GetMessageTool::new(Arc::clone(&mailbox))));
    registry.register_sync(Arc::new(SendMessageTool::new(mailbox)));
    registry.register_sync(Arc::new(DoneTool));
}
