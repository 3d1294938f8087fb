//! Mailbox data model shared by the pipeline stages.
//!
//! These types are what the mailbox client hands us. They are deliberately plain: the
//! pipeline only ever *reads* them, and the only mailbox state it changes (body and read
//! flag) is changed through [`crate::mailbox::Mailbox`], never by mutating these values.

use chrono::{DateTime, Utc};

/// How the body content is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BodyKind {
    #[default]
    Text,
    Html,
}

impl BodyKind {
    /// The content type label the mailbox API uses for this body kind.
    pub fn as_str(self) -> &'static str {
        match self {
            BodyKind::Text => "text",
            BodyKind::Html => "html",
        }
    }
}

/// A message body: content plus how to interpret it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Body {
    pub kind: BodyKind,
    pub content: String,
}

impl Body {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            kind: BodyKind::Text,
            content: content.into(),
        }
    }

    pub fn html(content: impl Into<String>) -> Self {
        Self {
            kind: BodyKind::Html,
            content: content.into(),
        }
    }
}

/// Reference to a binary attachment. The bytes are fetched lazily by id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub id: String,
    pub filename: String,
    pub content_type: Option<String>,
    pub size: Option<u64>,
}

/// One mailbox item as listed by the mailbox client.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Stable, opaque identifier assigned by the mailbox.
    pub id: String,
    pub received_at: DateTime<Utc>,
    pub is_read: bool,
    pub body: Body,
    /// Attachments in the order the mailbox lists them.
    pub attachments: Vec<Attachment>,

    // Informational only (logging).
    pub subject: Option<String>,
    pub sender: Option<String>,
}

impl Message {
    /// A one-line description for logs: subject, sender and received time.
    pub fn describe(&self) -> String {
        format!(
            "'{}' from {} ({})",
            crate::text::truncate(self.subject.as_deref().unwrap_or("(no subject)"), 50),
            self.sender.as_deref().unwrap_or("unknown sender"),
            self.received_at.format("%Y-%m-%d %H:%M"),
        )
    }
}
