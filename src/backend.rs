use thiserror::Error;

/// Pluggable speech-to-text engine used by [`crate::transcriber::Transcriber`].
///
/// A backend turns mono `f32` samples at [`crate::decoder::TARGET_SAMPLE_RATE`] into text.
/// It owns its loaded model for the lifetime of the process; the transcriber moves it onto a
/// dedicated worker thread, hence the `Send + 'static` bound.
pub trait Backend: Send + 'static {
    /// Transcribe one complete buffer.
    ///
    /// Backends should return the plain transcript (segments joined, whitespace trimmed). An
    /// empty string means no speech was recognised, not a failure.
    fn transcribe(
        &mut self,
        samples: &[f32],
        language: Option<&str>,
    ) -> std::result::Result<String, EngineError>;
}

/// Failures reported by a [`Backend`].
///
/// The split matters to the run coordinator: resource exhaustion stops the run, an inference
/// failure only fails the attachment.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine could not obtain the memory/compute it needs.
    #[error("engine resources exhausted: {0}")]
    ResourceExhausted(String),

    /// The engine ran but could not produce a transcript for this input.
    #[error("inference failed: {0}")]
    Inference(String),
}
