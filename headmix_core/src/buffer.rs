use crate::HeadmixError;

/// Allocate a zeroed interleaved block of `frames * channels` samples.
///
/// Allocation goes through `try_reserve_exact`, so an oversized request is
/// reported as [`HeadmixError::Allocation`] instead of aborting the process.
pub(crate) fn alloc_block(frames: usize, channels: usize) -> Result<Vec<f32>, HeadmixError> {
    let samples = frames
        .checked_mul(channels)
        .ok_or(HeadmixError::Allocation { samples: usize::MAX })?;

    let mut block = Vec::new();
    block
        .try_reserve_exact(samples)
        .map_err(|_| HeadmixError::Allocation { samples })?;
    block.resize(samples, 0.0);
    Ok(block)
}

/// Saturate a sample into `[-1.0, 1.0]`.
///
/// NaN maps to silence so a corrupt input can never leak out of range.
#[inline]
pub fn clamp_sample(sample: f32) -> f32 {
    if sample.is_nan() {
        0.0
    } else {
        sample.clamp(-1.0, 1.0)
    }
}
