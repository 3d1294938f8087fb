//! Sample-rate conversion for decoded mono audio.

use anyhow::{Context, Result, anyhow, bail};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

/// Source frames fed to rubato per `process()` call.
const INPUT_BLOCK_FRAMES: usize = 2048;

/// Resample a whole mono buffer from `src_rate` to `dst_rate`.
///
/// rubato consumes fixed-size blocks, so the tail is zero-padded to a full block. The output
/// is then cut (or padded) to exactly `ceil(len * dst_rate / src_rate)` samples so callers
/// can rely on the duration being preserved.
pub fn resample_mono(input: &[f32], src_rate: u32, dst_rate: u32) -> Result<Vec<f32>> {
    if src_rate == 0 || dst_rate == 0 {
        bail!("invalid sample rates: {src_rate} Hz -> {dst_rate} Hz");
    }
    if src_rate == dst_rate || input.is_empty() {
        return Ok(input.to_vec());
    }

    let ratio = dst_rate as f64 / src_rate as f64;
    let mut rs = SincFixedIn::<f32>::new(
        ratio,
        2.0,
        SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        },
        INPUT_BLOCK_FRAMES,
        1,
    )
    .map_err(|e| anyhow!(e))
    .context("failed to init resampler")?;

    let expected = (input.len() as f64 * ratio).ceil() as usize;
    let mut out = Vec::with_capacity(expected + INPUT_BLOCK_FRAMES * 2);

    for block in input.chunks(INPUT_BLOCK_FRAMES) {
        let mut chan = block.to_vec();
        chan.resize(INPUT_BLOCK_FRAMES, 0.0);
        let wave_in = vec![chan];

        let resampled = rs
            .process(&wave_in, None)
            .map_err(|e| anyhow!(e))
            .context("resampler process failed")?;

        let [mono] = resampled.as_slice() else {
            bail!("expected mono output from resampler");
        };
        out.extend_from_slice(mono);
    }

    out.resize(expected, 0.0);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_rate_is_a_copy() -> anyhow::Result<()> {
        let input = vec![0.25, -0.5, 0.75];
        assert_eq!(resample_mono(&input, 16_000, 16_000)?, input);
        Ok(())
    }

    #[test]
    fn upsampling_preserves_duration() -> anyhow::Result<()> {
        let input = vec![0.0; 8_000 + 7];
        let out = resample_mono(&input, 8_000, 16_000)?;
        assert_eq!(out.len(), 16_014);
        Ok(())
    }

    #[test]
    fn downsampling_preserves_duration() -> anyhow::Result<()> {
        let input = vec![0.0; 44_100];
        let out = resample_mono(&input, 44_100, 16_000)?;
        assert_eq!(out.len(), 16_000);
        Ok(())
    }

    #[test]
    fn zero_rate_is_rejected() {
        let err = resample_mono(&[0.0], 0, 16_000).unwrap_err();
        assert!(err.to_string().contains("invalid sample rates"));
    }
}
