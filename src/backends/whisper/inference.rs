use std::borrow::Cow;

use whisper_rs::{FullParams, SamplingStrategy, WhisperContext};

use crate::backend::EngineError;
use crate::decoder::TARGET_SAMPLE_RATE;

/// Segment text whisper.cpp emits for silence.
const BLANK_AUDIO: &str = "[BLANK_AUDIO]";

/// whisper.cpp refuses inputs shorter than one second; shorter clips are padded with silence.
const MIN_SAMPLES: usize = TARGET_SAMPLE_RATE as usize * 21 / 20;

/// Decoding parameters tuned for short, single-speaker voicemails:
/// deterministic greedy decoding (temperature 0, no fallback), no conditioning on previously
/// decoded text, and stricter quality thresholds.
fn build_full_params(language: Option<&str>) -> FullParams<'_, '_> {
    let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });

    params.set_n_threads(num_cpus::get() as i32);
    params.set_translate(false);
    params.set_language(language);
    params.set_no_context(true);
    params.set_single_segment(false);

    params.set_temperature(0.0);
    params.set_temperature_inc(0.0);
    params.set_entropy_thold(2.4);
    params.set_logprob_thold(-1.0);
    params.set_no_speech_thold(0.6);

    params.set_print_progress(false);
    params.set_print_special(false);
    params.set_print_realtime(false);
    params.set_print_timestamps(false);

    params
}

/// Run one full inference pass and return the joined segment text.
pub(super) fn transcribe(
    ctx: &WhisperContext,
    samples: &[f32],
    language: Option<&str>,
) -> Result<String, EngineError> {
    let samples: Cow<'_, [f32]> = if samples.len() < MIN_SAMPLES {
        let mut buf = samples.to_vec();
        buf.resize(MIN_SAMPLES, 0.0);
        Cow::Owned(buf)
    } else {
        Cow::Borrowed(samples)
    };

    // State allocation is where whisper.cpp reserves its KV caches and compute buffers.
    let mut state = ctx.create_state().map_err(|e| {
        EngineError::ResourceExhausted(format!("failed to create whisper state: {e}"))
    })?;

    state
        .full(build_full_params(language), &samples)
        .map_err(|e| EngineError::Inference(format!("whisper full() failed: {e}")))?;

    let n_segments = state.full_n_segments().max(0);
    let mut parts = Vec::new();
    for idx in 0..n_segments {
        let segment = state
            .get_segment(idx)
            .ok_or_else(|| EngineError::Inference(format!("whisper segment {idx} was missing")))?;
        let text = segment
            .to_str()
            .map_err(|e| EngineError::Inference(format!("failed to get segment text: {e}")))?;
        let text = text.trim();
        if !text.is_empty() && text != BLANK_AUDIO {
            parts.push(text.to_owned());
        }
    }

    Ok(parts.join(" "))
}
