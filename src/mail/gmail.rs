//! Gmail REST client implementing the mail capability.
//!
//! Reads go through `users.messages` (`raw` format decoded with mail-parser,
//! `metadata` format for headers). Replies are assembled with lettre and
//! posted to `users.messages.send`. Token acquisition happens elsewhere; this
//! client only carries a bearer token.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use chrono::{DateTime, Utc};
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use mail_parser::MessageParser;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::OnceCell;

use crate::error::{ConfigError, MailError};
use crate::mail::format::{self, MessageSummary};
use crate::mail::{InboxSource, MailCapability};
use crate::triage::types::Email;

const DEFAULT_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";

/// Gmail emits unpadded base64url but accepts either form.
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

// ── Configuration ───────────────────────────────────────────────────

/// Gmail client configuration.
#[derive(Debug, Clone)]
pub struct GmailConfig {
    pub access_token: SecretString,
    /// Base URL up to and including the user segment.
    pub api_base: String,
    /// Address used in the From header; resolved from the profile when unset.
    pub from_address: Option<String>,
    pub request_timeout: Duration,
}

impl GmailConfig {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: SecretString::from(access_token.into()),
            api_base: DEFAULT_API_BASE.to_string(),
            from_address: None,
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Build config from environment variables.
    ///
    /// `GMAIL_ACCESS_TOKEN` is required; `GMAIL_API_BASE`, `GMAIL_FROM_ADDRESS`
    /// and `GMAIL_TIMEOUT_SECS` are optional.
    pub fn from_env() -> Result<Self, ConfigError> {
        let token = std::env::var("GMAIL_ACCESS_TOKEN")
            .map_err(|_| ConfigError::MissingEnvVar("GMAIL_ACCESS_TOKEN".into()))?;

        let mut config = Self::new(token);
        if let Ok(base) = std::env::var("GMAIL_API_BASE") {
            config.api_base = base.trim_end_matches('/').to_string();
        }
        config.from_address = std::env::var("GMAIL_FROM_ADDRESS")
            .ok()
            .filter(|s| !s.trim().is_empty());
        if let Some(secs) = std::env::var("GMAIL_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.request_timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }
}

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMessage {
    id: String,
    thread_id: Option<String>,
    raw: String,
    internal_date: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetadataMessage {
    thread_id: Option<String>,
    payload: Option<MetadataPayload>,
}

#[derive(Debug, Deserialize)]
struct MetadataPayload {
    #[serde(default)]
    headers: Vec<Header>,
}

#[derive(Debug, Deserialize)]
struct Header {
    name: String,
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Profile {
    email_address: String,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    id: String,
}

impl MetadataMessage {
    fn header(&self, name: &str) -> Option<&str> {
        self.payload
            .as_ref()?
            .headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }
}

/// A fetched and decoded message.
#[derive(Debug, Clone)]
struct ParsedMail {
    id: String,
    thread_id: Option<String>,
    from: String,
    to: String,
    subject: String,
    body: String,
    received_at: Option<DateTime<Utc>>,
}

/// Threading headers of the message being answered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplyThreading {
    pub thread_id: Option<String>,
    pub in_reply_to: Option<String>,
    pub references: Option<String>,
}

// ── Client ──────────────────────────────────────────────────────────

/// Gmail-backed mailbox.
pub struct GmailClient {
    http: reqwest::Client,
    config: GmailConfig,
    sender: OnceCell<String>,
}

impl GmailClient {
    pub fn new(config: GmailConfig) -> Result<Self, MailError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            http,
            config,
            sender: OnceCell::new(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_base, path)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, MailError> {
        let response = self
            .http
            .get(self.url(path))
            .bearer_auth(self.config.access_token.expose_secret())
            .query(query)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MailError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }

    async fn unread_ids(&self, count: usize) -> Result<Vec<String>, MailError> {
        let max = count.to_string();
        let list: ListResponse = self
            .get_json(
                "messages",
                &[
                    ("labelIds", "INBOX"),
                    ("labelIds", "UNREAD"),
                    ("maxResults", max.as_str()),
                ],
            )
            .await?;
        Ok(list.messages.into_iter().map(|m| m.id).collect())
    }

    async fn metadata(&self, id: &str, headers: &[&str]) -> Result<MetadataMessage, MailError> {
        let mut query = vec![("format", "metadata")];
        query.extend(headers.iter().map(|h| ("metadataHeaders", *h)));
        self.get_json(&format!("messages/{id}"), &query).await
    }

    async fn fetch_parsed(&self, id: &str) -> Result<ParsedMail, MailError> {
        let raw: RawMessage = self
            .get_json(&format!("messages/{id}"), &[("format", "raw")])
            .await?;
        parse_raw_message(raw)
    }

    async fn sender_address(&self) -> Result<String, MailError> {
        if let Some(ref from) = self.config.from_address {
            return Ok(from.clone());
        }
        self.sender
            .get_or_try_init(|| async {
                let profile: Profile = self.get_json("profile", &[]).await?;
                tracing::debug!(address = %profile.email_address, "Resolved sender from Gmail profile");
                Ok::<_, MailError>(profile.email_address)
            })
            .await
            .cloned()
    }

    async fn reply_threading(&self, reply_to_id: &str) -> Result<ReplyThreading, MailError> {
        let meta = self
            .metadata(reply_to_id, &["Message-ID", "In-Reply-To", "References"])
            .await?;
        let in_reply_to = meta.header("Message-ID").map(String::from);
        let references = in_reply_to.as_ref().map(|mid| {
            let existing = meta.header("References").unwrap_or("");
            format!("{existing} {mid}").trim().to_string()
        });
        Ok(ReplyThreading {
            thread_id: meta.thread_id.clone(),
            in_reply_to,
            references,
        })
    }

    async fn try_list_unread(&self, count: usize) -> Result<String, MailError> {
        let ids = self.unread_ids(count).await?;
        let mut summaries = Vec::with_capacity(ids.len());
        for id in &ids {
            let meta = self.metadata(id, &["Subject", "From"]).await?;
            summaries.push(MessageSummary {
                from: meta.header("From").unwrap_or("Unknown Sender").to_string(),
                subject: meta.header("Subject").unwrap_or("No Subject").to_string(),
            });
        }
        Ok(format::format_listing(&summaries))
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        payload: &serde_json::Value,
    ) -> Result<T, MailError> {
        let response = self
            .http
            .post(self.url(path))
            .bearer_auth(self.config.access_token.expose_secret())
            .json(payload)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MailError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }

    async fn try_send(
        &self,
        to: &str,
        subject: &str,
        body: &str,
        reply_to_id: Option<&str>,
    ) -> Result<String, MailError> {
        let from = self.sender_address().await?;
        let threading = match reply_to_id {
            Some(id) => Some(self.reply_threading(id).await?),
            None => None,
        };
        let raw = build_raw_message(&from, to, subject, body, threading.as_ref())?;

        let mut payload = serde_json::json!({ "raw": URL_SAFE_LENIENT.encode(raw) });
        if let Some(thread_id) = threading.as_ref().and_then(|t| t.thread_id.as_ref()) {
            payload["threadId"] = serde_json::Value::String(thread_id.clone());
        }

        let sent: SendResponse = self.post_json("messages/send", &payload).await?;
        tracing::info!(to = %to, id = %sent.id, threaded = threading.is_some(), "Email sent");
        Ok(sent.id)
    }
}

#[async_trait]
impl MailCapability for GmailClient {
    async fn list_unread(&self, count: usize) -> String {
        match self.try_list_unread(count).await {
            Ok(out) => out,
            Err(e) => format!("Error retrieving Gmail messages: {e}"),
        }
    }

    async fn list_unread_ids(&self, count: usize) -> String {
        match self.unread_ids(count).await {
            Ok(ids) => format::format_id_listing(&ids),
            Err(e) => format!("Error retrieving Gmail message IDs: {e}"),
        }
    }

    async fn get_message(&self, id: &str) -> String {
        match self.fetch_parsed(id).await {
            Ok(mail) => format::format_message(&mail.subject, &mail.from, &mail.body),
            Err(e) => format!("Error retrieving message content for ID {id}: {e}"),
        }
    }

    async fn send_message(
        &self,
        to: &str,
        subject: &str,
        body: &str,
        reply_to_id: Option<&str>,
    ) -> String {
        match self.try_send(to, subject, body, reply_to_id).await {
            Ok(id) => format!("Message sent successfully to {to} with ID: {id}"),
            Err(e) => format!("Error sending message: {e}"),
        }
    }
}

#[async_trait]
impl InboxSource for GmailClient {
    async fn fetch_unread(&self, count: usize) -> Result<Vec<Email>, MailError> {
        let ids = self.unread_ids(count).await?;
        let mut emails = Vec::with_capacity(ids.len());
        for id in ids {
            match self.fetch_parsed(&id).await {
                Ok(mail) => emails.push(Email {
                    author: mail.from,
                    to: mail.to,
                    subject: mail.subject,
                    body_text: mail.body,
                    message_id: Some(mail.id),
                    thread_id: mail.thread_id,
                    received_at: mail.received_at,
                }),
                Err(e) => tracing::warn!(id = %id, error = %e, "Skipping unreadable message"),
            }
        }
        Ok(emails)
    }

    async fn mark_handled(&self, id: &str) -> Result<(), MailError> {
        let payload = serde_json::json!({ "removeLabelIds": ["UNREAD"] });
        let _: serde_json::Value = self
            .post_json(&format!("messages/{id}/modify"), &payload)
            .await?;
        tracing::debug!(id = %id, "Marked message read");
        Ok(())
    }
}

// ── Pure helpers ────────────────────────────────────────────────────

fn parse_raw_message(raw: RawMessage) -> Result<ParsedMail, MailError> {
    let bytes = URL_SAFE_LENIENT
        .decode(raw.raw.trim())
        .map_err(|e| MailError::Decode {
            id: raw.id.clone(),
            reason: e.to_string(),
        })?;
    let parsed = MessageParser::default()
        .parse(bytes.as_slice())
        .ok_or_else(|| MailError::Decode {
            id: raw.id.clone(),
            reason: "not an RFC 5322 message".into(),
        })?;

    let from = first_address(parsed.from()).unwrap_or_else(|| "Unknown Sender".into());
    let to = first_address(parsed.to()).unwrap_or_default();
    let subject = parsed.subject().unwrap_or("No Subject").to_string();
    let body = if let Some(text) = parsed.body_text(0) {
        text.to_string()
    } else if let Some(html) = parsed.body_html(0) {
        format::strip_html(html.as_ref())
    } else {
        "No content found for this message.".to_string()
    };
    let received_at = raw
        .internal_date
        .as_deref()
        .and_then(|ms| ms.parse::<i64>().ok())
        .and_then(DateTime::from_timestamp_millis);

    Ok(ParsedMail {
        id: raw.id,
        thread_id: raw.thread_id,
        from,
        to,
        subject,
        body,
        received_at,
    })
}

fn first_address(addr: Option<&mail_parser::Address>) -> Option<String> {
    addr?
        .first()
        .and_then(|a| a.address())
        .map(|s| s.to_string())
}

/// Assemble an RFC 5322 plain-text message.
pub fn build_raw_message(
    from: &str,
    to: &str,
    subject: &str,
    body: &str,
    threading: Option<&ReplyThreading>,
) -> Result<Vec<u8>, MailError> {
    let parse_mailbox = |address: &str| {
        address
            .parse::<Mailbox>()
            .map_err(|e| MailError::InvalidAddress {
                address: address.to_string(),
                reason: e.to_string(),
            })
    };

    let mut builder = lettre::Message::builder()
        .from(parse_mailbox(from)?)
        .to(parse_mailbox(to)?)
        .subject(subject)
        .header(ContentType::TEXT_PLAIN);

    if let Some(thread) = threading
        && let Some(ref in_reply_to) = thread.in_reply_to
    {
        builder = builder.in_reply_to(in_reply_to.clone());
        if let Some(ref references) = thread.references {
            builder = builder.references(references.clone());
        }
    }

    let message = builder
        .body(body.to_string())
        .map_err(|e| MailError::Build(e.to_string()))?;
    Ok(message.formatted())
}
