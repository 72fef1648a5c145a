use std::num::NonZeroUsize;

use log::{debug, warn};

use crate::buffer::{alloc_block, clamp_sample};
use crate::progress::{NoProgress, ProgressReporter, Stage};
use crate::stream::{FrameSink, FrameSource};
use crate::HeadmixError;

/// Frames per block when mixing.
pub const DEFAULT_MIX_BLOCK_FRAMES: usize = 1024;

const CHANNELS: usize = 2;

/// Counters collected during one mixing pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MixMetrics {
    pub frames_written: u64,
    pub blocks_written: u64,
    pub peak_frames_per_block: usize,
    /// Samples whose normalized value fell outside `[-1.0, 1.0]`.
    pub clamped_samples: u64,
}

/// Block-synchronous reduction of N stereo streams into one.
///
/// Every output sample is the sum of the matching input samples divided by
/// the number of inputs, then clamped. Inputs that run out early contribute
/// silence; the output is exactly as long as the longest input.
#[derive(Clone, Copy, Debug)]
pub struct Mixer {
    block_frames: NonZeroUsize,
}

impl Mixer {
    pub fn new(block_frames: NonZeroUsize) -> Self {
        Self { block_frames }
    }

    pub fn block_frames(&self) -> NonZeroUsize {
        self.block_frames
    }

    pub fn mix<S, W>(&self, sources: &mut [S], sink: &mut W) -> Result<MixMetrics, HeadmixError>
    where
        S: FrameSource,
        W: FrameSink + ?Sized,
    {
        self.mix_with_progress(sources, sink, &mut NoProgress)
    }

    pub fn mix_with_progress<S, W, P>(
        &self,
        sources: &mut [S],
        sink: &mut W,
        progress: &mut P,
    ) -> Result<MixMetrics, HeadmixError>
    where
        S: FrameSource,
        W: FrameSink + ?Sized,
        P: ProgressReporter + ?Sized,
    {
        let first = sources.first().ok_or(HeadmixError::NoInputs)?;
        let sample_rate = first.spec().sample_rate;

        for source in sources.iter() {
            let channels = source.spec().channels;
            if channels != CHANNELS {
                return Err(HeadmixError::ChannelCountMismatch {
                    stream: source.name().to_owned(),
                    expected: CHANNELS,
                    found: channels,
                });
            }
        }

        let sink_spec = sink.spec();
        if sink_spec.channels != CHANNELS {
            return Err(HeadmixError::ChannelCountMismatch {
                stream: "mix output".to_owned(),
                expected: CHANNELS,
                found: sink_spec.channels,
            });
        }
        if sink_spec.sample_rate != sample_rate {
            return Err(HeadmixError::SampleRateMismatch {
                expected: sample_rate,
                found: sink_spec.sample_rate,
            });
        }

        let block = self.block_frames.get();
        let mut accumulator = alloc_block(block, CHANNELS)?;
        let mut scratch = alloc_block(block, CHANNELS)?;
        let mut exhausted = vec![false; sources.len()];
        let divisor = sources.len() as f32;

        let total = sources
            .iter()
            .map(|source| source.frame_count())
            .try_fold(0u64, |longest, count| count.map(|count| longest.max(count)));
        progress.start(Stage::Mix, total);

        let mut metrics = MixMetrics::default();
        loop {
            accumulator.fill(0.0);
            let mut block_frames = 0;

            for (source, done) in sources.iter_mut().zip(exhausted.iter_mut()) {
                if *done {
                    continue;
                }

                let frames = source.read_frames(&mut scratch)?;
                let used = frames * CHANNELS;
                for (acc, sample) in accumulator[..used].iter_mut().zip(&scratch[..used]) {
                    *acc += *sample;
                }

                block_frames = block_frames.max(frames);
                *done = frames < block || source.is_drained();
            }

            if block_frames > 0 {
                let used = block_frames * CHANNELS;
                for sample in &mut accumulator[..used] {
                    let normalized = *sample / divisor;
                    let clamped = clamp_sample(normalized);
                    if clamped != normalized {
                        metrics.clamped_samples += 1;
                    }
                    *sample = clamped;
                }

                sink.write_frames(&accumulator[..used])?;
                metrics.frames_written += block_frames as u64;
                metrics.blocks_written += 1;
                metrics.peak_frames_per_block = metrics.peak_frames_per_block.max(block_frames);
                progress.advance(block_frames as u64);
            }

            if exhausted.iter().all(|&done| done) {
                break;
            }
        }

        let sealed = sink.finalize()?;
        debug_assert_eq!(sealed, metrics.frames_written);

        if metrics.clamped_samples > 0 {
            warn!(
                "mix clipped {} sample(s) into [-1.0, 1.0]",
                metrics.clamped_samples
            );
        }
        debug!(
            "mixed {} input(s) into {} frame(s) over {} block(s)",
            sources.len(),
            metrics.frames_written,
            metrics.blocks_written
        );
        progress.finish(Stage::Mix);

        Ok(metrics)
    }
}

impl Default for Mixer {
    fn default() -> Self {
        Self::new(NonZeroUsize::new(DEFAULT_MIX_BLOCK_FRAMES).unwrap_or(NonZeroUsize::MIN))
    }
}
