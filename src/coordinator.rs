//! Run coordinator: one pass over the mailbox, ending in a [`RunSummary`].

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::Result;
use crate::eligibility::{Eligibility, SkipReason, classify};
use crate::mailbox::Mailbox;
use crate::marker::MarkerPolicy;
use crate::processor::{MessageOutcome, MessageProcessor};
use crate::text::format_duration;
use crate::transcriber::Transcriber;

/// Why a run stopped before processing every selected message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// The stop flag was set (shutdown signal).
    Shutdown,
    /// The engine could not obtain resources.
    ResourceExhausted(String),
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Shutdown => f.write_str("shutdown requested"),
            AbortReason::ResourceExhausted(reason) => {
                write!(f, "engine resources exhausted: {reason}")
            }
        }
    }
}

/// Aggregate result of one run. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Messages returned by the mailbox listing.
    pub examined: usize,
    pub skipped_before_cutoff: usize,
    pub skipped_already_annotated: usize,
    pub skipped_no_eligible_attachment: usize,
    pub annotated: usize,
    pub failed: usize,
    /// Eligible but left for a later run (per-run cap, shutdown, or abort).
    pub deferred: usize,
    pub elapsed: Duration,
    /// Why the run stopped early, if it did.
    pub aborted: Option<AbortReason>,
}

impl RunSummary {
    pub fn skipped(&self) -> usize {
        self.skipped_before_cutoff
            + self.skipped_already_annotated
            + self.skipped_no_eligible_attachment
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.is_some()
    }

    fn record_skip(&mut self, reason: SkipReason) {
        match reason {
            SkipReason::BeforeCutoff => self.skipped_before_cutoff += 1,
            SkipReason::AlreadyAnnotated => self.skipped_already_annotated += 1,
            SkipReason::NoEligibleAttachment => self.skipped_no_eligible_attachment += 1,
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "examined={} skipped={} annotated={} failed={} deferred={} in {}",
            self.examined,
            self.skipped(),
            self.annotated,
            self.failed,
            self.deferred,
            format_duration(self.elapsed)
        )?;
        if let Some(reason) = &self.aborted {
            write!(f, " (aborted: {reason})")?;
        }
        Ok(())
    }
}

/// Owns everything a run needs. Built once per process and reused for every run.
pub struct Coordinator<M> {
    mailbox: M,
    transcriber: Transcriber,
    policy: MarkerPolicy,
    stop: Arc<AtomicBool>,
}

impl<M: Mailbox> Coordinator<M> {
    pub fn new(mailbox: M, transcriber: Transcriber, policy: MarkerPolicy) -> Self {
        Self {
            mailbox,
            transcriber,
            policy,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag checked before each message. Setting it ends the current run after the message
    /// in progress.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// One pass: list, filter, process sequentially.
    ///
    /// Only a listing failure is an error. Everything that happens to individual messages
    /// is counted in the summary.
    pub fn run(&self, cutoff: DateTime<Utc>, max_messages: Option<usize>) -> Result<RunSummary> {
        let started = Instant::now();
        let listing = self.mailbox.list_messages(cutoff, None)?;

        let mut summary = RunSummary {
            examined: listing.len(),
            ..RunSummary::default()
        };

        let mut selected = Vec::new();
        for message in &listing {
            match classify(message, cutoff, &self.policy) {
                Eligibility::Selected => selected.push(message),
                Eligibility::Skipped(reason) => summary.record_skip(reason),
            }
        }

        if let Some(cap) = max_messages
            && selected.len() > cap
        {
            summary.deferred += selected.len() - cap;
            selected.truncate(cap);
        }

        info!(
            examined = summary.examined,
            selected = selected.len(),
            skipped = summary.skipped(),
            deferred = summary.deferred,
            "mailbox listed"
        );

        let processor = MessageProcessor::new(&self.mailbox, &self.transcriber, &self.policy);
        for (index, message) in selected.iter().enumerate() {
            if self.stop.load(Ordering::SeqCst) {
                summary.deferred += selected.len() - index;
                summary.aborted = Some(AbortReason::Shutdown);
                break;
            }

            match processor.process(message) {
                MessageOutcome::Annotated { .. } => summary.annotated += 1,
                MessageOutcome::Failed { reason } => {
                    warn!(message_id = %message.id, %reason, "message failed");
                    summary.failed += 1;
                }
                MessageOutcome::Aborted { reason } => {
                    summary.failed += 1;
                    summary.deferred += selected.len() - index - 1;
                    summary.aborted = Some(AbortReason::ResourceExhausted(reason));
                    break;
                }
            }
        }

        summary.elapsed = started.elapsed();
        if let Some(reason) = &summary.aborted {
            warn!(%reason, "run stopped early");
        }
        info!(
            examined = summary.examined,
            skipped = summary.skipped(),
            annotated = summary.annotated,
            failed = summary.failed,
            deferred = summary.deferred,
            "run complete: {summary}"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_line_includes_counts_and_abort_reason() {
        let summary = RunSummary {
            examined: 5,
            skipped_already_annotated: 2,
            skipped_no_eligible_attachment: 1,
            annotated: 1,
            failed: 1,
            deferred: 0,
            elapsed: Duration::from_millis(2_500),
            aborted: Some(AbortReason::Shutdown),
            ..RunSummary::default()
        };
        assert_eq!(
            summary.to_string(),
            "examined=5 skipped=3 annotated=1 failed=1 deferred=0 in 2.5s \
             (aborted: shutdown requested)"
        );
    }
}
