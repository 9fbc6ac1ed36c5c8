//! Prompt construction for the classifier and the action agent.

use crate::mail::format::reply_subject;
use crate::triage::types::Email;

/// Max body characters shown to the classifier.
const CLASSIFIER_BODY_CHARS: usize = 4000;

pub const DEFAULT_BACKGROUND: &str = "I am a busy professional. I receive a mix of \
work email, automated notifications, newsletters and personal messages.";

pub const DEFAULT_TRIAGE_INSTRUCTIONS: &str = "\
Emails that are not worth responding to (ignore):
- Marketing newsletters and promotional emails
- Spam or suspicious emails
- CC'd threads with no direct question

Emails to know about but that need no reply (notify):
- Team member out sick or on vacation
- Build system, deployment or monitoring notifications
- Project status updates without action items
- Important company announcements

Emails that deserve a reply (respond):
- Direct questions from colleagues or clients
- Meeting requests
- Critical bug reports addressed to me
- Requests from management that need acknowledgement";

pub const DEFAULT_RESPONSE_PREFERENCES: &str = "\
Use professional and concise language.
Acknowledge the request in the first sentence.
If the email mentions a deadline, state it explicitly in the reply.
Sign off with the sender's first name only when it is clearly known.";

pub const DEFAULT_CAL_PREFERENCES: &str = "\
30-minute meetings are preferred, 15 minutes is acceptable.
Avoid proposing times before 9am or after 5pm.";

/// Appended when the model answers in prose before taking any action.
pub const NUDGE_MESSAGE: &str = "You have not taken any action yet. Use one of \
the available tools to handle this email, or call `done` if no action is needed.";

/// Text that frames the agent's instructions.
#[derive(Debug, Clone)]
pub struct PromptContext {
    pub background: String,
    pub triage_instructions: String,
    pub response_preferences: String,
    pub cal_preferences: String,
}

impl Default for PromptContext {
    fn default() -> Self {
        Self {
            background: DEFAULT_BACKGROUND.to_string(),
            triage_instructions: DEFAULT_TRIAGE_INSTRUCTIONS.to_string(),
            response_preferences: DEFAULT_RESPONSE_PREFERENCES.to_string(),
            cal_preferences: DEFAULT_CAL_PREFERENCES.to_string(),
        }
    }
}

// ── Classifier ──────────────────────────────────────────────────────

/// Build the classifier system prompt.
pub fn build_triage_system_prompt(ctx: &PromptContext) -> String {
    format!(
        "You are an email triage assistant. Decide how each incoming email \
         should be handled.\n\n\
         <background>\n{background}\n</background>\n\n\
         <triage_rules>\n{rules}\n</triage_rules>\n\n\
         Classify the email into exactly one category:\n\
         - \"ignore\": irrelevant, no action needed\n\
         - \"notify\": important information that does not need a reply\n\
         - \"respond\": needs a reply\n\n\
         Respond with ONLY a JSON object:\n\
         {{\"reasoning\": \"step-by-step reasoning\", \"classification\": \"ignore\" | \"respond\" | \"notify\"}}",
        background = ctx.background.trim(),
        rules = ctx.triage_instructions.trim(),
    )
}

/// Build the classifier user prompt from an email.
pub fn build_triage_user_prompt(email: &Email) -> String {
    let mut prompt = String::with_capacity(512);
    prompt.push_str("Classify the following email:\n\n");
    prompt.push_str(&format!("From: {}\n", email.author));
    prompt.push_str(&format!("To: {}\n", email.to));
    prompt.push_str(&format!("Subject: {}\n", email.subject));
    if let Some(at) = email.received_at {
        prompt.push_str(&format!("Date: {}\n", at.to_rfc2822()));
    }

    let body: String = email.body_text.chars().take(CLASSIFIER_BODY_CHARS).collect();
    prompt.push_str(&format!("\n{body}"));
    prompt
}

// ── Action agent ────────────────────────────────────────────────────

/// Build the agent system prompt.
pub fn build_agent_system_prompt(ctx: &PromptContext, tool_catalogue: &str) -> String {
    format!(
        "You are an email assistant acting on the user's behalf. The email \
         below was classified as needing a reply.\n\n\
         Take action by calling tools. Typical flow: read the message if you \
         need more context, send a reply threaded with reply_to_id, then call \
         `done`.\n\n\
         <tools>\n{tools}\n</tools>\n\n\
         <background>\n{background}\n</background>\n\n\
         <response_preferences>\n{response}\n</response_preferences>\n\n\
         <calendar_preferences>\n{calendar}\n</calendar_preferences>",
        tools = tool_catalogue.trim(),
        background = ctx.background.trim(),
        response = ctx.response_preferences.trim(),
        calendar = ctx.cal_preferences.trim(),
    )
}

/// The original email as the agent's first user message.
pub fn build_agent_email_prompt(email: &Email) -> String {
    let mut prompt = String::with_capacity(256 + email.body_text.len());
    prompt.push_str("Respond to this email:\n\n");
    if let Some(ref id) = email.message_id {
        prompt.push_str(&format!("Message ID: {id}\n"));
    }
    prompt.push_str(&format!("From: {}\n", email.author));
    prompt.push_str(&format!("To: {}\n", email.to));
    prompt.push_str(&format!("Subject: {}\n", email.subject));
    prompt.push_str(&format!("Reply subject: {}\n\n", reply_subject(&email.subject)));
    prompt.push_str(&email.body_text);
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email() -> Email {
        Email::new(
            "alice@x.com",
            "me@x.com",
            "Meeting Request",
            "Can we meet Tuesday at 2pm?",
        )
        .with_message_id("m1")
    }

    #[test]
    fn triage_system_prompt_lists_categories_and_schema() {
        let prompt = build_triage_system_prompt(&PromptContext::default());
        assert!(prompt.contains("\"ignore\""));
        assert!(prompt.contains("\"notify\""));
        assert!(prompt.contains("\"respond\""));
        assert!(prompt.contains("\"reasoning\""));
        assert!(prompt.contains("Marketing newsletters"));
    }

    #[test]
    fn triage_user_prompt_includes_headers_and_body() {
        let prompt = build_triage_user_prompt(&email());
        assert!(prompt.contains("From: alice@x.com"));
        assert!(prompt.contains("Subject: Meeting Request"));
        assert!(prompt.contains("Tuesday at 2pm"));
    }

    #[test]
    fn triage_user_prompt_truncates_body() {
        let mut long = email();
        long.body_text = "z".repeat(10_000);
        let prompt = build_triage_user_prompt(&long);
        assert_eq!(prompt.matches('z').count(), CLASSIFIER_BODY_CHARS);
    }

    #[test]
    fn triage_user_prompt_allows_empty_body() {
        let mut empty = email();
        empty.body_text.clear();
        assert!(build_triage_user_prompt(&empty).ends_with("Subject: Meeting Request\n\n"));
    }

    #[test]
    fn agent_prompt_embeds_catalogue_and_preferences() {
        let ctx = PromptContext {
            response_preferences: "Always be brief.".into(),
            ..PromptContext::default()
        };
        let prompt = build_agent_system_prompt(&ctx, "1. send_gmail_message: Send");
        assert!(prompt.contains("1. send_gmail_message: Send"));
        assert!(prompt.contains("Always be brief."));
        assert!(prompt.contains("<calendar_preferences>"));
    }

    #[test]
    fn agent_email_prompt_carries_message_id() {
        let prompt = build_agent_email_prompt(&email());
        assert!(prompt.contains("Message ID: m1"));
        assert!(prompt.contains("Reply subject: Re: Meeting Request"));
        assert!(prompt.ends_with("Can we meet Tuesday at 2pm?"));
    }
}
