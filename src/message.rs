//! RFC 5322 / RFC 2045 message composition.
//!
//! A [`MailEnvelope`] carries everything needed for one delivery. [`Message`]
//! renders it as a `multipart/alternative` document with a plain-text and an
//! HTML part.

use core::fmt;

use base64::prelude::*;
use chrono::{DateTime, Utc};

pub mod address;
pub use address::{EmailAddress, ParseError};

/// Separates the alternative parts.
pub const BOUNDARY: &str = "=_contact-smtp-alternative_=";

/// Display names are cut to this many characters before escaping.
pub const MAX_DISPLAY_NAME: usize = 100;

// encoded-words may be at most 75 characters; 45 bytes encode to 60
const ENCODED_WORD_CHUNK: usize = 45;

/// Makes a display name safe to place between double quotes in a header.
///
/// Control characters (CR, LF, TAB, the rest of C0, DEL and C1) are removed,
/// the result is trimmed and cut to [`MAX_DISPLAY_NAME`] characters, then `\`
/// and `"` are backslash-escaped.
pub fn sanitize_display_name(name: &str) -> String {
    let stripped = strip_display_name(name);
    let mut out = String::with_capacity(stripped.len());
    for c in stripped.chars() {
        if c == '\\' || c == '"' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

// controls removed, trimmed and capped, nothing escaped yet
fn strip_display_name(name: &str) -> String {
    let stripped: String = name.chars().filter(|c| !c.is_control()).collect();
    stripped.trim().chars().take(MAX_DISPLAY_NAME).collect()
}

/// Escapes `& < > " '` for inclusion in HTML.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            c => out.push(c),
        }
    }
    out
}

/// Escapes plain text and turns its line breaks into `<br>`.
pub fn text_to_html(text: &str) -> String {
    escape_html(text).replace("\r\n", "<br>").replace('\n', "<br>")
}

// RFC 2047 B-encoded words for header text that is not plain ascii
fn encoded_words(text: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut start = 0;
    while start < text.len() {
        let mut end = (start + ENCODED_WORD_CHUNK).min(text.len());
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        words.push(format!(
            "=?UTF-8?B?{}?=",
            BASE64_STANDARD.encode(&text[start..end])
        ));
        start = end;
    }
    words
}

// folded across lines, for the Subject
fn encode_header_text(text: &str) -> String {
    if text.is_ascii() {
        return text.to_owned();
    }
    encoded_words(text).join("\r\n ")
}

/// Problems that make an envelope unusable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    #[error("missing {0}")]
    Missing(&'static str),
    #[error("invalid {0} address")]
    InvalidAddress(&'static str),
    #[error("{0} contains a line break")]
    InvalidHeader(&'static str),
}

/// Everything needed to deliver one message. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailEnvelope {
    sender: String,
    recipient: String,
    reply_to: Option<String>,
    sender_name: Option<String>,
    subject: String,
    text_body: String,
    html_body: String,
}

impl MailEnvelope {
    pub fn builder() -> MailEnvelopeBuilder {
        MailEnvelopeBuilder::default()
    }

    /// The authenticated mailbox: `MAIL FROM` and the `From` address.
    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    pub fn reply_to(&self) -> Option<&str> {
        self.reply_to.as_deref()
    }

    /// The display name as given, before sanitising.
    pub fn sender_name(&self) -> Option<&str> {
        self.sender_name.as_deref()
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn text_body(&self) -> &str {
        &self.text_body
    }

    pub fn html_body(&self) -> &str {
        &self.html_body
    }

    /// domain part of the sender address
    pub fn sender_domain(&self) -> &str {
        self.sender
            .rsplit_once('@')
            .map_or(self.sender.as_str(), |(_, domain)| domain)
    }

    /// The `From` header value.
    pub fn from_header(&self) -> String {
        let name = self
            .sender_name
            .as_deref()
            .map(strip_display_name)
            .unwrap_or_default();
        if name.is_empty() {
            self.sender.clone()
        } else if name.is_ascii() {
            format!("\"{}\" <{}>", sanitize_display_name(&name), self.sender)
        } else {
            // kept on one line, the From header never carries CR or LF
            format!("{} <{}>", encoded_words(&name).join(" "), self.sender)
        }
    }

    /// Renders the message with a fresh Date and Message-ID.
    pub fn message(&self) -> Message<'_> {
        let message_id = Message::generate_message_id(self.sender_domain());
        Message::new(self, Utc::now(), message_id)
    }
}

/// Builds a [`MailEnvelope`], checking every field that ends up in a header.
#[derive(Debug, Default, Clone)]
pub struct MailEnvelopeBuilder {
    sender: Option<String>,
    recipient: Option<String>,
    reply_to: Option<String>,
    sender_name: Option<String>,
    subject: Option<String>,
    text_body: Option<String>,
    html_body: Option<String>,
}

impl MailEnvelopeBuilder {
    #[must_use]
    pub fn sender(mut self, address: impl Into<String>) -> Self {
        self.sender = Some(address.into());
        self
    }

    #[must_use]
    pub fn recipient(mut self, address: impl Into<String>) -> Self {
        self.recipient = Some(address.into());
        self
    }

    #[must_use]
    pub fn reply_to(mut self, address: impl Into<String>) -> Self {
        self.reply_to = Some(address.into());
        self
    }

    #[must_use]
    pub fn sender_name(mut self, name: impl Into<String>) -> Self {
        self.sender_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    #[must_use]
    pub fn text_body(mut self, body: impl Into<String>) -> Self {
        self.text_body = Some(body.into());
        self
    }

    /// Without this the HTML part is derived from the text body.
    #[must_use]
    pub fn html_body(mut self, body: impl Into<String>) -> Self {
        self.html_body = Some(body.into());
        self
    }

    pub fn build(self) -> Result<MailEnvelope, EnvelopeError> {
        fn address(value: Option<String>, name: &'static str) -> Result<String, EnvelopeError> {
            let value = value.ok_or(EnvelopeError::Missing(name))?;
            if value.contains(['\r', '\n']) {
                return Err(EnvelopeError::InvalidHeader(name));
            }
            if !EmailAddress::is_valid(&value) {
                return Err(EnvelopeError::InvalidAddress(name));
            }
            Ok(value)
        }

        let sender = address(self.sender, "sender")?;
        let recipient = address(self.recipient, "recipient")?;
        let reply_to = self
            .reply_to
            .map(|r| address(Some(r), "reply-to"))
            .transpose()?;
        let subject = self.subject.unwrap_or_default();
        if subject.contains(['\r', '\n']) {
            return Err(EnvelopeError::InvalidHeader("subject"));
        }
        let text_body = self.text_body.ok_or(EnvelopeError::Missing("text body"))?;
        let html_body = self
            .html_body
            .unwrap_or_else(|| format!("<p>{}</p>", text_to_html(&text_body)));

        Ok(MailEnvelope {
            sender,
            recipient,
            reply_to,
            sender_name: self.sender_name,
            subject,
            text_body,
            html_body,
        })
    }
}

/// A [`MailEnvelope`] rendered at a point in time.
#[derive(Debug, Clone)]
pub struct Message<'a> {
    envelope: &'a MailEnvelope,
    date: DateTime<Utc>,
    message_id: String,
}

impl<'a> Message<'a> {
    /// - `message_id`: Unique identifier without angle brackets, e.g. `"abc123@example.com"`
    #[must_use]
    pub fn new(envelope: &'a MailEnvelope, date: DateTime<Utc>, message_id: String) -> Self {
        Message {
            envelope,
            date,
            message_id,
        }
    }

    #[must_use]
    pub fn date(&self) -> &DateTime<Utc> {
        &self.date
    }

    /// Get the Message-ID (without angle brackets).
    #[must_use]
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Generate a unique Message-ID using current time.
    #[must_use]
    pub fn generate_message_id(domain: &str) -> String {
        use std::time::{SystemTime, UNIX_EPOCH};
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        format!("{ts:x}@{domain}")
    }
}

impl fmt::Display for Message<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let env = self.envelope;
        writeln!(f, "Date: {}\r", self.date.to_rfc2822())?;
        writeln!(f, "From: {}\r", env.from_header())?;
        writeln!(f, "To: {}\r", env.recipient)?;
        if let Some(reply_to) = &env.reply_to {
            writeln!(f, "Reply-To: {reply_to}\r")?;
        }
        writeln!(f, "Subject: {}\r", encode_header_text(&env.subject))?;
        writeln!(f, "Message-ID: <{}>\r", self.message_id)?;
        writeln!(f, "MIME-Version: 1.0\r")?;
        writeln!(
            f,
            "Content-Type: multipart/alternative; boundary=\"{BOUNDARY}\"\r"
        )?;
        write!(f, "\r\n")?;

        for (kind, body) in [("plain", &env.text_body), ("html", &env.html_body)] {
            writeln!(f, "--{BOUNDARY}\r")?;
            writeln!(f, "Content-Type: text/{kind}; charset=\"UTF-8\"\r")?;
            writeln!(f, "Content-Transfer-Encoding: 8bit\r")?;
            write!(f, "\r\n{body}\r\n")?;
        }
        write!(f, "--{BOUNDARY}--\r\n")
    }
}
