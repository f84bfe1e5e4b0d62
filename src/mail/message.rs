//! Outgoing mail message model.

use std::collections::BTreeMap;
use std::fmt;

use mailparse::MailAddr;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Boundary used between the text and HTML parts of a rendered message
const ALTERNATIVE_BOUNDARY: &str = "=_mail-queue-alternative";

/// Headers produced by [`MailMessage::render`]; extra headers may not reuse them
const RESERVED_HEADERS: &[&str] = &[
    "from",
    "sender",
    "to",
    "cc",
    "bcc",
    "reply-to",
    "subject",
    "mime-version",
    "content-type",
    "content-transfer-encoding",
];

/// Structural problems with a message.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("Message has no recipients")]
    NoRecipients,

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid header {0}: header values must not contain line breaks")]
    InvalidHeader(String),

    #[error("Header {0} is set by the message itself and cannot be added")]
    ReservedHeader(String),

    #[error("Message has no body")]
    NoBody,

    #[error("Malformed message: {0}")]
    Malformed(String),
}

/// A single mailbox, `Name <address>` or a bare address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Mailbox {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Mailbox {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: None,
        }
    }

    pub fn with_name(address: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: Some(name.into()),
        }
    }

    /// Check that the mailbox renders as exactly one address that parses back
    /// unchanged.
    pub fn validate(&self) -> Result<(), MessageError> {
        let invalid = || MessageError::InvalidAddress(self.address.clone());

        let mut parts = self.address.split('@');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(local), Some(domain), None) if !local.is_empty() && !domain.is_empty() => {}
            _ => return Err(invalid()),
        }
        if self.address.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(invalid());
        }
        if self.name.as_deref().is_some_and(has_line_break) {
            return Err(invalid());
        }

        let parsed = mailparse::addrparse(&self.to_string()).map_err(|_| invalid())?;
        let expected_name = self.name.as_deref().filter(|name| !name.is_empty());
        match parsed.as_slice() {
            [MailAddr::Single(single)]
                if single.addr == self.address
                    && single.display_name.as_deref() == expected_name =>
            {
                Ok(())
            }
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) if !name.is_empty() => write!(f, "\"{}\" <{}>", name, self.address),
            _ => write!(f, "{}", self.address),
        }
    }
}

/// A fully composed mail ready to be handed to a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MailMessage {
    pub from: Mailbox,
    pub to: Vec<Mailbox>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cc: Vec<Mailbox>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bcc: Vec<Mailbox>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reply_to: Vec<Mailbox>,
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_body: Option<String>,
    /// Additional headers, kept sorted so encoding stays deterministic
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl MailMessage {
    pub fn builder(from: impl Into<String>) -> MessageBuilder {
        MessageBuilder::new(from)
    }

    /// Replace every `To` recipient with a single address.
    pub fn set_to(&mut self, address: impl Into<String>) {
        self.to = vec![Mailbox::new(address)];
    }

    /// All envelope recipients (to, cc and bcc).
    pub fn recipients(&self) -> impl Iterator<Item = &Mailbox> {
        self.to.iter().chain(self.cc.iter()).chain(self.bcc.iter())
    }

    pub fn validate(&self) -> Result<(), MessageError> {
        if self.to.is_empty() {
            return Err(MessageError::NoRecipients);
        }

        self.from.validate()?;
        for mailbox in self.recipients().chain(self.reply_to.iter()) {
            mailbox.validate()?;
        }

        if has_line_break(&self.subject) {
            return Err(MessageError::InvalidHeader("Subject".to_string()));
        }

        for (name, value) in &self.headers {
            let valid_name = !name.is_empty()
                && name
                    .chars()
                    .all(|c| c.is_ascii_graphic() && c != ':');
            if !valid_name || has_line_break(value) {
                return Err(MessageError::InvalidHeader(name.clone()));
            }
            if is_reserved_header(name) {
                return Err(MessageError::ReservedHeader(name.clone()));
            }
        }

        Ok(())
    }

    /// Render the message in RFC 5322 form. Bcc recipients are not rendered.
    pub fn render(&self) -> Result<String, MessageError> {
        self.validate()?;

        let mut out = String::new();
        push_header(&mut out, "From", &self.from.to_string());
        push_header(&mut out, "To", &join_mailboxes(&self.to));
        if !self.cc.is_empty() {
            push_header(&mut out, "Cc", &join_mailboxes(&self.cc));
        }
        if !self.reply_to.is_empty() {
            push_header(&mut out, "Reply-To", &join_mailboxes(&self.reply_to));
        }
        push_header(&mut out, "Subject", &self.subject);
        for (name, value) in &self.headers {
            push_header(&mut out, name, value);
        }
        push_header(&mut out, "MIME-Version", "1.0");

        match (&self.text_body, &self.html_body) {
            (Some(text), Some(html)) => {
                push_header(
                    &mut out,
                    "Content-Type",
                    &format!("multipart/alternative; boundary=\"{}\"", ALTERNATIVE_BOUNDARY),
                );
                out.push_str("\r\n");
                push_part(&mut out, "text/plain", text);
                push_part(&mut out, "text/html", html);
                out.push_str(&format!("--{}--\r\n", ALTERNATIVE_BOUNDARY));
            }
            (Some(text), None) => {
                push_header(&mut out, "Content-Type", "text/plain; charset=utf-8");
                out.push_str("\r\n");
                out.push_str(&normalize_newlines(text));
            }
            (None, Some(html)) => {
                push_header(&mut out, "Content-Type", "text/html; charset=utf-8");
                out.push_str("\r\n");
                out.push_str(&normalize_newlines(html));
            }
            (None, None) => return Err(MessageError::NoBody),
        }

        Ok(out)
    }
}

/// Builder for [`MailMessage`]
pub struct MessageBuilder {
    message: MailMessage,
}

impl MessageBuilder {
    pub fn new(from: impl Into<String>) -> Self {
        Self {
            message: MailMessage {
                from: Mailbox::new(from),
                to: Vec::new(),
                cc: Vec::new(),
                bcc: Vec::new(),
                reply_to: Vec::new(),
                subject: String::new(),
                text_body: None,
                html_body: None,
                headers: BTreeMap::new(),
            },
        }
    }

    pub fn from_name(mut self, name: impl Into<String>) -> Self {
        self.message.from.name = Some(name.into());
        self
    }

    pub fn to(mut self, address: impl Into<String>) -> Self {
        self.message.to.push(Mailbox::new(address));
        self
    }

    pub fn to_mailbox(mut self, mailbox: Mailbox) -> Self {
        self.message.to.push(mailbox);
        self
    }

    pub fn cc(mut self, address: impl Into<String>) -> Self {
        self.message.cc.push(Mailbox::new(address));
        self
    }

    pub fn bcc(mut self, address: impl Into<String>) -> Self {
        self.message.bcc.push(Mailbox::new(address));
        self
    }

    pub fn reply_to(mut self, address: impl Into<String>) -> Self {
        self.message.reply_to.push(Mailbox::new(address));
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.message.subject = subject.into();
        self
    }

    pub fn text_body(mut self, body: impl Into<String>) -> Self {
        self.message.text_body = Some(body.into());
        self
    }

    pub fn html_body(mut self, body: impl Into<String>) -> Self {
        self.message.html_body = Some(body.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.message.headers.insert(name.into(), value.into());
        self
    }

    pub fn build(self) -> MailMessage {
        self.message
    }
}

fn is_reserved_header(name: &str) -> bool {
    RESERVED_HEADERS
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(name))
}

fn has_line_break(value: &str) -> bool {
    value.contains('\r') || value.contains('\n')
}

fn join_mailboxes(mailboxes: &[Mailbox]) -> String {
    mailboxes
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn push_header(out: &mut String, name: &str, value: &str) {
    out.push_str(name);
    out.push_str(": ");
    out.push_str(value);
    out.push_str("\r\n");
}

fn push_part(out: &mut String, content_type: &str, body: &str) {
    out.push_str(&format!("--{}\r\n", ALTERNATIVE_BOUNDARY));
    out.push_str(&format!("Content-Type: {}; charset=utf-8\r\n\r\n", content_type));
    out.push_str(&normalize_newlines(body));
    out.push_str("\r\n");
}

fn normalize_newlines(body: &str) -> String {
    body.replace("\r\n", "\n").replace('\n', "\r\n")
}
