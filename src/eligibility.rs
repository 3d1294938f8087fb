//! Eligibility filter: which listed messages still need a transcript.

use chrono::{DateTime, Utc};

use crate::marker::MarkerPolicy;
use crate::message::Message;

/// Why a listed message is not processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    BeforeCutoff,
    AlreadyAnnotated,
    NoEligibleAttachment,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::BeforeCutoff => "before_cutoff",
            SkipReason::AlreadyAnnotated => "already_annotated",
            SkipReason::NoEligibleAttachment => "no_eligible_attachment",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    Selected,
    Skipped(SkipReason),
}

/// Classify one message. Checks run in a fixed order and the first failing one wins:
/// cutoff, then marker, then attachments.
///
/// The cutoff is re-checked here even though the mailbox query is already bounded by it.
pub fn classify(message: &Message, cutoff: DateTime<Utc>, policy: &MarkerPolicy) -> Eligibility {
    if message.received_at < cutoff {
        return Eligibility::Skipped(SkipReason::BeforeCutoff);
    }
    if policy.body_has_marker(&message.body) {
        return Eligibility::Skipped(SkipReason::AlreadyAnnotated);
    }
    if !message
        .attachments
        .iter()
        .any(|a| policy.is_eligible_extension(&a.filename))
    {
        return Eligibility::Skipped(SkipReason::NoEligibleAttachment);
    }
    Eligibility::Selected
}

/// Keep only the messages that need processing, in input order.
pub fn select<'a>(
    messages: &'a [Message],
    cutoff: DateTime<Utc>,
    policy: &MarkerPolicy,
) -> Vec<&'a Message> {
    messages
        .iter()
        .filter(|m| classify(m, cutoff, policy) == Eligibility::Selected)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Attachment, Body};
    use chrono::{Duration, TimeZone};

    fn cutoff() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn msg(id: &str, received_at: DateTime<Utc>, body: &str, files: &[&str]) -> Message {
        Message {
            id: id.into(),
            received_at,
            is_read: false,
            body: Body::text(body),
            attachments: files
                .iter()
                .enumerate()
                .map(|(i, f)| Attachment {
                    id: format!("{id}-att{i}"),
                    filename: (*f).into(),
                    content_type: None,
                    size: None,
                })
                .collect(),
            subject: None,
            sender: None,
        }
    }

    #[test]
    fn cutoff_is_inclusive_to_the_millisecond() {
        let policy = MarkerPolicy::default();
        let at = msg("at", cutoff(), "", &["v.wav"]);
        let before = msg("before", cutoff() - Duration::milliseconds(1), "", &["v.wav"]);

        assert_eq!(classify(&at, cutoff(), &policy), Eligibility::Selected);
        assert_eq!(
            classify(&before, cutoff(), &policy),
            Eligibility::Skipped(SkipReason::BeforeCutoff)
        );
    }

    #[test]
    fn marked_messages_are_skipped() {
        let policy = MarkerPolicy::default();
        let body = format!("Hi\n\n{}\n[v.wav]\nhello", policy.marker());
        let m = msg("m", cutoff(), &body, &["v.wav"]);
        assert_eq!(
            classify(&m, cutoff(), &policy),
            Eligibility::Skipped(SkipReason::AlreadyAnnotated)
        );
    }

    #[test]
    fn mixed_attachments_are_eligible_when_any_is_wav() {
        let policy = MarkerPolicy::default();
        let m = msg("m", cutoff(), "", &["note.txt", "voice.WAV"]);
        assert_eq!(classify(&m, cutoff(), &policy), Eligibility::Selected);

        let none = msg("n", cutoff(), "", &["note.txt", "scan.pdf"]);
        assert_eq!(
            classify(&none, cutoff(), &policy),
            Eligibility::Skipped(SkipReason::NoEligibleAttachment)
        );
    }

    #[test]
    fn cutoff_takes_precedence_over_other_reasons() {
        let policy = MarkerPolicy::default();
        let m = msg("m", cutoff() - Duration::days(1), policy.marker(), &[]);
        assert_eq!(
            classify(&m, cutoff(), &policy),
            Eligibility::Skipped(SkipReason::BeforeCutoff)
        );
    }

    #[test]
    fn select_preserves_input_order() {
        let policy = MarkerPolicy::default();
        let later = cutoff() + Duration::hours(2);
        let messages = vec![
            msg("c", later, "", &["c.wav"]),
            msg("skip", later, "", &["x.txt"]),
            msg("a", cutoff(), "", &["a.wav"]),
            msg("b", later, "", &["b.wav"]),
        ];

        let ids: Vec<_> = select(&messages, cutoff(), &policy)
            .into_iter()
            .map(|m| m.id.as_str())
            .collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }
}
