//! Mailbox client contract.
//!
//! The pipeline talks to the mailbox only through [`Mailbox`]. Every operation may fail
//! independently and nothing is atomic, so errors carry a [`MailboxErrorKind`] that tells
//! the caller whether a failed mutation might still have been applied.

use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::message::{Body, Message};

/// How much we know about a failed mailbox call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MailboxErrorKind {
    /// The mailbox could not be reached or authenticated against.
    Connectivity,
    /// The mailbox definitively refused the request. Nothing was changed.
    Rejected,
    /// The outcome is unknown: the request may or may not have been applied.
    Indeterminate,
}

impl MailboxErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MailboxErrorKind::Connectivity => "connectivity",
            MailboxErrorKind::Rejected => "rejected",
            MailboxErrorKind::Indeterminate => "indeterminate",
        }
    }
}

impl fmt::Display for MailboxErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} mailbox error: {message}")]
pub struct MailboxError {
    pub kind: MailboxErrorKind,
    pub message: String,
}

impl MailboxError {
    pub fn new(kind: MailboxErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn connectivity(message: impl Into<String>) -> Self {
        Self::new(MailboxErrorKind::Connectivity, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(MailboxErrorKind::Rejected, message)
    }

    pub fn indeterminate(message: impl Into<String>) -> Self {
        Self::new(MailboxErrorKind::Indeterminate, message)
    }

    /// A rejected request left the mailbox untouched.
    pub fn is_rejected(&self) -> bool {
        self.kind == MailboxErrorKind::Rejected
    }
}

pub type MailboxResult<T> = std::result::Result<T, MailboxError>;

/// Operations the pipeline needs from a mailbox.
///
/// Implementations are blocking. Listing should order messages by received time, oldest
/// first, so a capped run always makes progress on the backlog.
pub trait Mailbox {
    /// Messages received at or after `since`. `limit` is a hint; callers re-check.
    fn list_messages(
        &self,
        since: DateTime<Utc>,
        limit: Option<usize>,
    ) -> MailboxResult<Vec<Message>>;

    fn get_attachment_bytes(&self, message_id: &str, attachment_id: &str)
    -> MailboxResult<Vec<u8>>;

    /// Replace the message body. Mailboxes commonly mark a message read as a side effect.
    fn update_body(&self, message_id: &str, body: &Body) -> MailboxResult<()>;

    fn set_read_state(&self, message_id: &str, is_read: bool) -> MailboxResult<()>;
}

impl<M: Mailbox + ?Sized> Mailbox for &M {
    fn list_messages(
        &self,
        since: DateTime<Utc>,
        limit: Option<usize>,
    ) -> MailboxResult<Vec<Message>> {
        (**self).list_messages(since, limit)
    }

    fn get_attachment_bytes(
        &self,
        message_id: &str,
        attachment_id: &str,
    ) -> MailboxResult<Vec<u8>> {
        (**self).get_attachment_bytes(message_id, attachment_id)
    }

    fn update_body(&self, message_id: &str, body: &Body) -> MailboxResult<()> {
        (**self).update_body(message_id, body)
    }

    fn set_read_state(&self, message_id: &str, is_read: bool) -> MailboxResult<()> {
        (**self).set_read_state(message_id, is_read)
    }
}
