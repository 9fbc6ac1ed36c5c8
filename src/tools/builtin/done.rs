//! Stop tool: the agent calls it once the email has been handled.

use std::time::Instant;

use async_trait::async_trait;

use crate::tools::tool::{Tool, ToolContext, ToolError, ToolOutput, optional_str};

pub const DONE_TOOL_NAME: &str = "done";

pub struct DoneTool;

#[async_trait]
impl Tool for DoneTool {
    fn name(&self) -> &str {
        DONE_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Finish handling this email. Call it after the reply is sent, or when \
         no further action is needed. Optionally summarise what was done."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "summary": {
                    "type": "string",
                    "description": "One-line summary of the action taken"
                }
            }
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let summary = optional_str(self.name(), &params, "summary")?.unwrap_or("");
        let text = if summary.is_empty() {
            "Done.".to_string()
        } else {
            format!("Done: {summary}")
        };
        Ok(ToolOutput::text(text, start.elapsed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn done_echoes_summary() {
        let out = DoneTool
            .execute(serde_json::json!({"summary": "replied"}), &ToolContext::default())
            .await
            .unwrap();
        assert_eq!(out.as_text(), "Done: replied");

        let out = DoneTool
            .execute(serde_json::json!({}), &ToolContext::default())
            .await
            .unwrap();
        assert_eq!(out.as_text(), "Done.");
    }
}
