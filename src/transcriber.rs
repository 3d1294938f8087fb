//! Transcription adapter: audio bytes in, transcript or typed failure out.
//!
//! The adapter never panics and never returns `Err` to its caller. Every problem becomes a
//! [`TranscriptionFailure`] with a [`FailureKind`], so the message processor can isolate
//! content problems to one attachment while the run coordinator can still tell when the
//! engine itself is out of resources.
//!
//! The engine lives on a single worker thread that owns the loaded model and handles one job
//! at a time. A caller that times out leaves its job running. The next caller never queues
//! behind it: it waits a bounded grace period for the engine to go idle and only then
//! starts its own clock. An engine that stays busy past the grace period is reported as
//! exhausted, which stops the run.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex, PoisonError, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::Result;
use crate::backend::{Backend, EngineError};
use crate::decoder::decode_to_mono;
use crate::opts::Opts;
use crate::text::{format_duration, truncate};

/// Classes of per-attachment failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The attachment bytes could not be downloaded.
    Fetch,
    /// The bytes are not decodable audio.
    UnreadableAudio,
    /// The engine ran but failed on this input.
    Engine,
    /// The engine did not answer within the configured timeout.
    Timeout,
    /// The engine could not obtain resources, or its worker is gone.
    ResourceExhausted,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Fetch => "fetch_failed",
            FailureKind::UnreadableAudio => "unreadable_audio",
            FailureKind::Engine => "engine_error",
            FailureKind::Timeout => "timeout",
            FailureKind::ResourceExhausted => "resource_exhausted",
        }
    }

    /// Whether this failure should stop the whole run rather than one attachment.
    pub fn aborts_run(self) -> bool {
        matches!(self, FailureKind::ResourceExhausted)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {reason}")]
pub struct TranscriptionFailure {
    pub kind: FailureKind,
    pub reason: String,
}

impl TranscriptionFailure {
    pub fn new(kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}

/// Outcome for one attachment. `Ok("")` means the audio contained no speech.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptionResult {
    pub filename: String,
    pub outcome: std::result::Result<String, TranscriptionFailure>,
}

impl TranscriptionResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn failure(&self) -> Option<&TranscriptionFailure> {
        self.outcome.as_ref().err()
    }
}

/// How many timeouts' worth of time a new job waits for a stale one to finish.
const STALE_DRAIN_FACTOR: u32 = 4;

type EngineReply = std::result::Result<String, EngineError>;

struct Job {
    samples: Vec<f32>,
    language: Option<String>,
    reply: mpsc::SyncSender<EngineReply>,
}

/// Whether the worker holds a job. Claimed by the caller before sending, released by the
/// worker once the engine returns.
#[derive(Default)]
struct EngineSlot {
    busy: Mutex<bool>,
    idle: Condvar,
}

impl EngineSlot {
    /// Wait for the engine to go idle, then claim it. `false` if `wait` elapsed first.
    fn claim(&self, wait: Option<Duration>) -> bool {
        let busy = self.busy.lock().unwrap_or_else(PoisonError::into_inner);
        let mut busy = match wait {
            Some(wait) => {
                self.idle
                    .wait_timeout_while(busy, wait, |b| *b)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0
            }
            None => self
                .idle
                .wait_while(busy, |b| *b)
                .unwrap_or_else(PoisonError::into_inner),
        };
        if *busy {
            return false;
        }
        *busy = true;
        true
    }

    fn release(&self) {
        *self.busy.lock().unwrap_or_else(PoisonError::into_inner) = false;
        self.idle.notify_all();
    }
}

/// Owns the engine worker and turns attachment bytes into [`TranscriptionResult`]s.
pub struct Transcriber {
    jobs: mpsc::Sender<Job>,
    slot: Arc<EngineSlot>,
    opts: Opts,
}

impl Transcriber {
    /// Move `backend` onto a dedicated worker thread.
    pub fn new<B: Backend>(backend: B, opts: Opts) -> Result<Self> {
        let (jobs, rx) = mpsc::channel::<Job>();
        let slot = Arc::new(EngineSlot::default());

        let worker_slot = Arc::clone(&slot);
        thread::Builder::new()
            .name("mailscribe-engine".to_owned())
            .spawn(move || run_worker(backend, rx, &worker_slot))?;

        Ok(Self { jobs, slot, opts })
    }

    pub fn opts(&self) -> &Opts {
        &self.opts
    }

    /// Transcribe one attachment.
    pub fn transcribe(&self, filename: &str, audio: &[u8]) -> TranscriptionResult {
        let started = Instant::now();
        info!(attachment = filename, bytes = audio.len(), "transcribing");

        let outcome = self.transcribe_bytes(filename, audio);
        match &outcome {
            Ok(text) => info!(
                attachment = filename,
                elapsed = %format_duration(started.elapsed()),
                preview = %truncate(text, 60),
                "transcription complete"
            ),
            Err(failure) => warn!(
                attachment = filename,
                kind = %failure.kind,
                reason = %failure.reason,
                "transcription failed"
            ),
        }

        TranscriptionResult {
            filename: filename.to_owned(),
            outcome,
        }
    }

    fn transcribe_bytes(
        &self,
        filename: &str,
        audio: &[u8],
    ) -> std::result::Result<String, TranscriptionFailure> {
        let hint = Path::new(filename).extension().and_then(|e| e.to_str());
        let samples = decode_to_mono(audio, hint).map_err(|e| {
            TranscriptionFailure::new(FailureKind::UnreadableAudio, format!("{e:#}"))
        })?;

        if samples.is_empty() {
            debug!(attachment = filename, "audio has no frames");
            return Ok(String::new());
        }

        let drain = self.opts.timeout.map(|limit| limit * STALE_DRAIN_FACTOR);
        if !self.slot.claim(drain) {
            return Err(TranscriptionFailure::new(
                FailureKind::ResourceExhausted,
                "engine still busy with a timed-out attachment",
            ));
        }

        let (reply, reply_rx) = mpsc::sync_channel(1);
        let job = Job {
            samples,
            language: self.opts.language.clone(),
            reply,
        };
        if self.jobs.send(job).is_err() {
            self.slot.release();
            return Err(worker_gone());
        }

        let reply = match self.opts.timeout {
            Some(limit) => reply_rx.recv_timeout(limit).map_err(|err| match err {
                mpsc::RecvTimeoutError::Timeout => TranscriptionFailure::new(
                    FailureKind::Timeout,
                    format!("no transcript after {}", format_duration(limit)),
                ),
                mpsc::RecvTimeoutError::Disconnected => worker_gone(),
            })?,
            None => reply_rx.recv().map_err(|_| worker_gone())?,
        };

        reply.map_err(|err| match err {
            EngineError::ResourceExhausted(reason) => {
                TranscriptionFailure::new(FailureKind::ResourceExhausted, reason)
            }
            EngineError::Inference(reason) => {
                TranscriptionFailure::new(FailureKind::Engine, reason)
            }
        })
    }
}

fn worker_gone() -> TranscriptionFailure {
    TranscriptionFailure::new(FailureKind::ResourceExhausted, "engine worker stopped")
}

fn run_worker<B: Backend>(mut backend: B, jobs: mpsc::Receiver<Job>, slot: &EngineSlot) {
    for job in jobs {
        let result = catch_unwind(AssertUnwindSafe(|| {
            backend.transcribe(&job.samples, job.language.as_deref())
        }))
        .unwrap_or_else(|_| Err(EngineError::Inference("engine panicked".to_owned())));
        slot.release();

        // The caller may have timed out and dropped its receiver.
        let _ = job.reply.send(result);
    }
    debug!("engine worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn wav(frames: usize) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut w = hound::WavWriter::new(&mut cursor, spec).expect("wav writer");
            for i in 0..frames {
                w.write_sample((i % 100) as i16 * 50).expect("sample");
            }
            w.finalize().expect("finalize");
        }
        cursor.into_inner()
    }

    /// Replies with a scripted result per call, optionally sleeping first.
    struct Scripted {
        replies: Vec<(Duration, EngineReply)>,
        calls: Arc<Mutex<Vec<usize>>>,
    }

    impl Backend for Scripted {
        fn transcribe(&mut self, samples: &[f32], _language: Option<&str>) -> EngineReply {
            self.calls.lock().expect("lock").push(samples.len());
            let (delay, reply) = self.replies.remove(0);
            thread::sleep(delay);
            reply
        }
    }

    fn scripted(replies: Vec<(Duration, EngineReply)>) -> (Scripted, Arc<Mutex<Vec<usize>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        (
            Scripted {
                replies,
                calls: Arc::clone(&calls),
            },
            calls,
        )
    }

    struct Panics;

    impl Backend for Panics {
        fn transcribe(&mut self, _samples: &[f32], _language: Option<&str>) -> EngineReply {
            panic!("boom");
        }
    }

    #[test]
    fn successful_transcription_returns_text() -> anyhow::Result<()> {
        let (backend, calls) = scripted(vec![(Duration::ZERO, Ok("Hallo Welt".into()))]);
        let t = Transcriber::new(backend, Opts::default())?;

        let result = t.transcribe("voice.wav", &wav(1_600));
        assert_eq!(result.filename, "voice.wav");
        assert_eq!(result.outcome, Ok("Hallo Welt".to_owned()));
        assert_eq!(*calls.lock().expect("lock"), vec![1_600]);
        Ok(())
    }

    #[test]
    fn malformed_audio_is_a_content_failure() -> anyhow::Result<()> {
        let (backend, calls) = scripted(Vec::new());
        let t = Transcriber::new(backend, Opts::default())?;

        let result = t.transcribe("voice.wav", b"not audio at all");
        let failure = result.failure().expect("expected failure");
        assert_eq!(failure.kind, FailureKind::UnreadableAudio);
        assert!(!failure.kind.aborts_run());
        assert!(calls.lock().expect("lock").is_empty());
        Ok(())
    }

    #[test]
    fn engine_errors_keep_their_class() -> anyhow::Result<()> {
        let (backend, _) = scripted(vec![
            (Duration::ZERO, Err(EngineError::Inference("bad input".into()))),
            (Duration::ZERO, Err(EngineError::ResourceExhausted("oom".into()))),
        ]);
        let t = Transcriber::new(backend, Opts::default())?;

        let first = t.transcribe("a.wav", &wav(800));
        assert_eq!(first.failure().map(|f| f.kind), Some(FailureKind::Engine));

        let second = t.transcribe("b.wav", &wav(800));
        let failure = second.failure().expect("expected failure");
        assert_eq!(failure.kind, FailureKind::ResourceExhausted);
        assert!(failure.kind.aborts_run());
        assert_eq!(failure.reason, "oom");
        Ok(())
    }

    #[test]
    fn a_timeout_does_not_eat_into_the_next_attachment() -> anyhow::Result<()> {
        let (backend, calls) = scripted(vec![
            (Duration::from_millis(700), Ok("late".into())),
            (Duration::ZERO, Ok("second".into())),
        ]);
        let opts = Opts {
            timeout: Some(Duration::from_millis(200)),
            ..Opts::default()
        };
        let t = Transcriber::new(backend, opts)?;

        let first = t.transcribe("slow.wav", &wav(1_000));
        assert_eq!(first.failure().map(|f| f.kind), Some(FailureKind::Timeout));

        let second = t.transcribe("fast.wav", &wav(2_000));
        assert_eq!(second.outcome, Ok("second".to_owned()));
        assert_eq!(*calls.lock().expect("lock"), vec![1_000, 2_000]);
        Ok(())
    }

    #[test]
    fn a_stuck_engine_is_exhausted_and_nothing_queues_behind_it() -> anyhow::Result<()> {
        let (backend, calls) = scripted(vec![(Duration::from_millis(1_500), Ok("late".into()))]);
        let opts = Opts {
            timeout: Some(Duration::from_millis(50)),
            ..Opts::default()
        };
        let t = Transcriber::new(backend, opts)?;

        let first = t.transcribe("slow.wav", &wav(1_000));
        assert_eq!(first.failure().map(|f| f.kind), Some(FailureKind::Timeout));

        let second = t.transcribe("next.wav", &wav(2_000));
        let failure = second.failure().expect("expected failure");
        assert_eq!(failure.kind, FailureKind::ResourceExhausted);
        assert!(failure.kind.aborts_run());
        assert_eq!(*calls.lock().expect("lock"), vec![1_000]);
        Ok(())
    }

    #[test]
    fn a_panicking_engine_fails_only_the_attachment() -> anyhow::Result<()> {
        let t = Transcriber::new(Panics, Opts::default())?;
        let first = t.transcribe("a.wav", &wav(800));
        assert_eq!(first.failure().map(|f| f.kind), Some(FailureKind::Engine));

        let second = t.transcribe("b.wav", &wav(800));
        assert_eq!(second.failure().map(|f| f.kind), Some(FailureKind::Engine));
        Ok(())
    }
}
