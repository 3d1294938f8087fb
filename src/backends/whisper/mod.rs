use std::path::Path;

use anyhow::Context;
use whisper_rs::{WhisperContext, WhisperContextParameters};

use crate::backend::{Backend, EngineError};
use crate::{Error, Result};

mod inference;
mod logging;

use logging::init_whisper_logging;

/// Built-in backend powered by `whisper-rs` / `whisper.cpp`.
///
/// Owns the loaded model. Construct it once at startup; every transcription creates a fresh
/// inference state against the same context.
pub struct WhisperBackend {
    ctx: WhisperContext,
}

impl WhisperBackend {
    /// Load a ggml model file from disk.
    pub fn new(model_path: impl AsRef<Path>) -> Result<Self> {
        let path = model_path.as_ref();
        if !path.is_file() {
            return Err(Error::model(format!(
                "model file not found: {}",
                path.display()
            )));
        }
        let model_path = path
            .to_str()
            .ok_or_else(|| Error::model(format!("model path is not UTF-8: {}", path.display())))?;

        init_whisper_logging();

        let ctx = WhisperContext::new_with_params(model_path, WhisperContextParameters::default())
            .with_context(|| format!("failed to load model from path: {model_path}"))
            .map_err(|e| Error::model(format!("{e:#}")))?;

        tracing::info!(model = %model_path, "whisper model loaded");
        Ok(Self { ctx })
    }
}

impl Backend for WhisperBackend {
    fn transcribe(
        &mut self,
        samples: &[f32],
        language: Option<&str>,
    ) -> std::result::Result<String, EngineError> {
        inference::transcribe(&self.ctx, samples, language)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_model_is_a_model_error() {
        let err = match WhisperBackend::new("models/definitely-missing.bin") {
            Ok(_) => panic!("expected error for missing model"),
            Err(err) => err,
        };
        assert!(matches!(err, Error::Model(_)));
        assert!(err.to_string().contains("model file not found"));
    }
}
