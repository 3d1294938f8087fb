//! Message processor: one eligible message from attachments to annotated body.
//!
//! Steps, in order:
//!
//! 1. capture the read flag,
//! 2. fetch each eligible attachment (duplicates by id removed),
//! 3. transcribe it,
//! 4. render the new body,
//! 5. write the body back,
//! 6. restore the captured read flag.
//!
//! The read flag is only ever written back around step 5. A message that fails or aborts
//! before the write leaves the mailbox untouched, including its read flag.
//!
//! Nothing in here returns an error. Every path ends in a [`MessageOutcome`].

use tracing::{info, warn};

use crate::formatter;
use crate::mailbox::{Mailbox, MailboxResult};
use crate::marker::MarkerPolicy;
use crate::message::{Attachment, Message};
use crate::transcriber::{FailureKind, Transcriber, TranscriptionFailure, TranscriptionResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    /// The transcript block was written.
    Annotated { transcribed: usize, failed: usize },
    /// Nothing usable was written; the message stays eligible for the next run.
    Failed { reason: String },
    /// The engine ran out of resources. The caller should stop the run.
    Aborted { reason: String },
}

/// Restores a message's read flag when dropped, unless disarmed.
///
/// Mailboxes tend to mark a message read when its body changes. The guard is armed right
/// before the body write, so restoring on drop covers a panicking write too.
struct ReadStateGuard<'a, M: Mailbox + ?Sized> {
    mailbox: &'a M,
    message_id: &'a str,
    was_read: bool,
    armed: bool,
}

impl<'a, M: Mailbox + ?Sized> ReadStateGuard<'a, M> {
    fn arm(mailbox: &'a M, message_id: &'a str, was_read: bool) -> Self {
        Self {
            mailbox,
            message_id,
            was_read,
            armed: true,
        }
    }

    /// The mailbox refused our write, so the flag was never touched.
    fn disarm(mut self) {
        self.armed = false;
    }

    fn restore(mut self) -> MailboxResult<()> {
        self.armed = false;
        self.mailbox.set_read_state(self.message_id, self.was_read)
    }
}

impl<M: Mailbox + ?Sized> Drop for ReadStateGuard<'_, M> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(err) = self.mailbox.set_read_state(self.message_id, self.was_read) {
            warn!(
                message_id = self.message_id,
                error = %err,
                "failed to restore read state"
            );
        }
    }
}

pub struct MessageProcessor<'a, M: Mailbox + ?Sized> {
    mailbox: &'a M,
    transcriber: &'a Transcriber,
    policy: &'a MarkerPolicy,
}

impl<'a, M: Mailbox + ?Sized> MessageProcessor<'a, M> {
    pub fn new(mailbox: &'a M, transcriber: &'a Transcriber, policy: &'a MarkerPolicy) -> Self {
        Self {
            mailbox,
            transcriber,
            policy,
        }
    }

    pub fn process(&self, message: &Message) -> MessageOutcome {
        info!(message_id = %message.id, "processing {}", message.describe());
        let was_read = message.is_read;

        let attachments = eligible_attachments(message, self.policy);
        let mut results = Vec::with_capacity(attachments.len());
        for attachment in attachments {
            let result = self.transcribe_attachment(message, attachment);
            if let Some(failure) = result.failure()
                && failure.kind.aborts_run()
            {
                warn!(
                    message_id = %message.id,
                    reason = %failure.reason,
                    "engine exhausted, abandoning message"
                );
                return MessageOutcome::Aborted {
                    reason: failure.reason.clone(),
                };
            }
            results.push(result);
        }

        let transcribed = results.iter().filter(|r| r.is_success()).count();
        let failed = results.len() - transcribed;
        if transcribed == 0 {
            warn!(message_id = %message.id, failed, "no attachment could be transcribed");
            return MessageOutcome::Failed {
                reason: format!("all {failed} attachment(s) failed"),
            };
        }

        let body = formatter::format(&message.body, &results, self.policy.marker());
        let guard = ReadStateGuard::arm(self.mailbox, &message.id, was_read);
        if let Err(err) = self.mailbox.update_body(&message.id, &body) {
            warn!(message_id = %message.id, error = %err, "body update failed");
            if err.is_rejected() {
                guard.disarm();
            } else if let Err(restore_err) = guard.restore() {
                warn!(
                    message_id = %message.id,
                    error = %restore_err,
                    "failed to restore read state"
                );
            }
            return MessageOutcome::Failed {
                reason: format!("body update failed: {err}"),
            };
        }

        if let Err(err) = guard.restore() {
            warn!(
                message_id = %message.id,
                error = %err,
                "annotated, but failed to restore read state"
            );
        }

        info!(message_id = %message.id, transcribed, failed, "message annotated");
        MessageOutcome::Annotated {
            transcribed,
            failed,
        }
    }

    fn transcribe_attachment(
        &self,
        message: &Message,
        attachment: &Attachment,
    ) -> TranscriptionResult {
        match self
            .mailbox
            .get_attachment_bytes(&message.id, &attachment.id)
        {
            Ok(bytes) => self.transcriber.transcribe(&attachment.filename, &bytes),
            Err(err) => {
                warn!(
                    message_id = %message.id,
                    attachment = %attachment.filename,
                    error = %err,
                    "attachment fetch failed"
                );
                TranscriptionResult {
                    filename: attachment.filename.clone(),
                    outcome: Err(TranscriptionFailure::new(FailureKind::Fetch, err.to_string())),
                }
            }
        }
    }
}

/// Eligible attachments in mailbox order, first occurrence of each id only.
pub fn eligible_attachments<'m>(
    message: &'m Message,
    policy: &MarkerPolicy,
) -> Vec<&'m Attachment> {
    let mut seen = std::collections::HashSet::new();
    message
        .attachments
        .iter()
        .filter(|a| policy.is_eligible_extension(&a.filename))
        .filter(|a| seen.insert(a.id.as_str()))
        .collect()
}
