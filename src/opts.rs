use std::time::Duration;

/// Options that control how an attachment is transcribed.
///
/// This struct represents *library-level configuration*, not CLI flags directly.
/// The binary maps its settings into this type so the transcription adapter can be
/// constructed programmatically (tests, other frontends) without a CLI.
#[derive(Debug, Clone)]
pub struct Opts {
    /// Spoken language hint (e.g. `"de"`). `None` lets the engine auto-detect.
    pub language: Option<String>,

    /// Upper bound on how long one attachment may spend in the engine.
    ///
    /// When it elapses the attachment is recorded as a timeout failure; the run continues.
    pub timeout: Option<Duration>,
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            language: Some("de".to_owned()),
            timeout: None,
        }
    }
}
