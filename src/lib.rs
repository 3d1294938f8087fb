//! `mailscribe`: transcribe voice-message attachments in a mailbox, exactly once per email.
//!
//! This crate provides:
//! - An idempotent processing pipeline: eligibility, transcription, annotation, read-state
//!   preservation
//! - A Microsoft Graph mailbox client
//! - A Whisper speech-to-text backend with WAV decoding and resampling
//! - Configuration, model management and logging for the `mailscribe` binary
//!
//! The pipeline keeps no state of its own. Whether a message was already handled is read
//! from the marker in its body on every run.

// Pipeline (most consumers should start here).
pub mod coordinator;
pub mod eligibility;
pub mod formatter;
pub mod marker;
pub mod processor;
pub mod transcriber;

// Mailbox contract, data model and the Graph implementation.
pub mod graph;
pub mod mailbox;
pub mod message;

// Speech-to-text engine seam and backends.
pub mod backend;
pub mod backends;
pub mod opts;

// Audio preprocessing.
pub mod decoder;
pub mod resample;

// Service plumbing.
pub mod config;
pub mod models;
pub mod text;

// Logging configuration and control.
#[cfg(feature = "logging")]
pub mod logging;

mod error;

pub use backend::{Backend, EngineError};
pub use backends::whisper::WhisperBackend;
pub use config::{RunMode, ServiceConfig, Settings};
pub use coordinator::{AbortReason, Coordinator, RunSummary};
pub use error::{Error, Result};
pub use graph::{GraphConfig, GraphMailbox};
pub use mailbox::{Mailbox, MailboxError, MailboxErrorKind};
pub use marker::MarkerPolicy;
pub use message::{Attachment, Body, BodyKind, Message};
pub use opts::Opts;
pub use transcriber::{FailureKind, Transcriber, TranscriptionFailure, TranscriptionResult};

#[cfg(feature = "logging")]
pub use logging::init as init_logging;
