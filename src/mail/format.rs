//! Text formatting shared by mailbox implementations.

use std::sync::LazyLock;

use regex::Regex;

/// Body characters shown by `get_message`.
pub const PREVIEW_CHARS: usize = 500;

pub const NO_UNREAD: &str = "No unread messages found.";

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid regex"));
static BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>").expect("valid regex")
});
static ANGLE_ADDR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<([^<>@\s]+@[^<>\s]+)>").expect("valid regex"));
static BLANK_RUN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

/// Sender/subject pair for listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSummary {
    pub from: String,
    pub subject: String,
}

/// `"Latest unread Gmail messages:\n- From: …, Subject: …\n"` or the empty notice.
pub fn format_listing(messages: &[MessageSummary]) -> String {
    if messages.is_empty() {
        return NO_UNREAD.to_string();
    }
    let mut out = String::from("Latest unread Gmail messages:\n");
    for m in messages {
        out.push_str(&format!("- From: {}, Subject: {}\n", m.from, m.subject));
    }
    out
}

/// `"Latest unread Gmail message IDs:\n- Message ID: …\n"` or the empty notice.
pub fn format_id_listing<S: AsRef<str>>(ids: &[S]) -> String {
    if ids.is_empty() {
        return NO_UNREAD.to_string();
    }
    let mut out = String::from("Latest unread Gmail message IDs:\n");
    for id in ids {
        out.push_str(&format!("- Message ID: {}\n", id.as_ref()));
    }
    out
}

/// Message view handed to the model; the body is cut to `PREVIEW_CHARS`.
pub fn format_message(subject: &str, from: &str, body: &str) -> String {
    format!(
        "Subject: {subject}\nFrom: {from}\n\n{}...",
        truncate_chars(body, PREVIEW_CHARS)
    )
}

/// First `max_chars` characters, never splitting a code point.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Crude HTML to text: drops script/style blocks and tags, collapses blank runs.
pub fn strip_html(html: &str) -> String {
    let without_blocks = BLOCK_RE.replace_all(html, "");
    let with_breaks = without_blocks
        .replace("<br>", "\n")
        .replace("<br/>", "\n")
        .replace("<br />", "\n")
        .replace("</p>", "\n\n");
    let text = TAG_RE.replace_all(&with_breaks, "");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'");
    BLANK_RUN_RE.replace_all(text.trim(), "\n\n").into_owned()
}

/// `"Alice <alice@x.com>"` → `"alice@x.com"`; bare addresses pass through.
pub fn bare_address(header: &str) -> String {
    ANGLE_ADDR_RE
        .captures(header)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| header.trim().to_string())
}

/// Prefix `Re: ` unless the subject already carries it.
pub fn reply_subject(subject: &str) -> String {
    let trimmed = subject.trim();
    if trimmed
        .get(..3)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("re:"))
    {
        trimmed.to_string()
    } else {
        format!("Re: {trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_listing_uses_notice() {
        assert_eq!(format_listing(&[]), NO_UNREAD);
        assert_eq!(format_id_listing::<&str>(&[]), NO_UNREAD);
    }

    #[test]
    fn listing_has_one_line_per_message() {
        let out = format_listing(&[
            MessageSummary {
                from: "alice@x.com".into(),
                subject: "Lunch".into(),
            },
            MessageSummary {
                from: "bob@x.com".into(),
                subject: "Report".into(),
            },
        ]);
        assert!(out.starts_with("Latest unread Gmail messages:\n"));
        assert!(out.contains("- From: alice@x.com, Subject: Lunch\n"));
        assert!(out.contains("- From: bob@x.com, Subject: Report\n"));
    }

    #[test]
    fn id_listing_format() {
        let out = format_id_listing(&["18c1", "18c2"]);
        assert_eq!(
            out,
            "Latest unread Gmail message IDs:\n- Message ID: 18c1\n- Message ID: 18c2\n"
        );
    }

    #[test]
    fn message_body_is_truncated_to_preview() {
        let body = "y".repeat(2000);
        let out = format_message("Hi", "a@x.com", &body);
        assert!(out.starts_with("Subject: Hi\nFrom: a@x.com\n\n"));
        assert_eq!(out.matches('y').count(), PREVIEW_CHARS);
        assert!(out.ends_with("..."));
    }

    #[test]
    fn truncation_respects_multibyte() {
        assert_eq!(truncate_chars("😀😁😂", 2), "😀😁");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[test]
    fn strip_html_removes_tags_and_scripts() {
        let html = "<html><style>p{}</style><p>Hello&nbsp;there</p><script>x()</script><b>Bye</b></html>";
        let text = strip_html(html);
        assert!(text.contains("Hello there"));
        assert!(text.contains("Bye"));
        assert!(!text.contains('<'));
        assert!(!text.contains("x()"));
    }

    #[test]
    fn bare_address_extraction() {
        assert_eq!(bare_address("Alice Smith <alice@x.com>"), "alice@x.com");
        assert_eq!(bare_address("  bob@x.com "), "bob@x.com");
    }

    #[test]
    fn reply_subject_not_doubled() {
        assert_eq!(reply_subject("Meeting Request"), "Re: Meeting Request");
        assert_eq!(reply_subject("RE: Meeting Request"), "RE: Meeting Request");
    }
}
