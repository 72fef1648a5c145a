use std::num::NonZeroUsize;

use log::debug;

use crate::buffer::alloc_block;
use crate::progress::{NoProgress, ProgressReporter, Stage};
use crate::stream::{FrameSink, FrameSource};
use crate::HeadmixError;

/// Channel count the splitter expects from its input by default.
pub const DEFAULT_INPUT_CHANNELS: usize = 6;

/// Frames per block when extracting channels.
pub const DEFAULT_SPLIT_BLOCK_FRAMES: usize = 2048;

const OUTPUT_CHANNELS: usize = 2;

/// Projects one channel of an interleaved stream into a dual-mono stereo
/// stream, one block at a time.
///
/// Working buffers are allocated on first use and reused for every later
/// extraction, so splitting all channels of a file costs one allocation pair.
#[derive(Debug)]
pub struct Demultiplexer {
    block_frames: NonZeroUsize,
    expected_channels: usize,
    input: Vec<f32>,
    output: Vec<f32>,
    peak_frames: usize,
}

impl Demultiplexer {
    pub fn new(block_frames: NonZeroUsize, expected_channels: usize) -> Self {
        Self {
            block_frames,
            expected_channels,
            input: Vec::new(),
            output: Vec::new(),
            peak_frames: 0,
        }
    }

    pub fn block_frames(&self) -> NonZeroUsize {
        self.block_frames
    }

    pub fn expected_channels(&self) -> usize {
        self.expected_channels
    }

    /// Largest number of frames handled in a single block so far.
    pub fn peak_frames_per_block(&self) -> usize {
        self.peak_frames
    }

    /// Extract `channel_index` (0-based) from `source` into `sink`.
    ///
    /// See [`Demultiplexer::extract_with_progress`].
    pub fn extract<S, W>(
        &mut self,
        source: &mut S,
        channel_index: usize,
        sink: &mut W,
    ) -> Result<u64, HeadmixError>
    where
        S: FrameSource + ?Sized,
        W: FrameSink + ?Sized,
    {
        self.extract_with_progress(source, channel_index, sink, &mut NoProgress)
    }

    /// Rewind `source`, copy `channel_index` into both slots of every output
    /// frame, and finalize `sink`. Returns the number of frames written.
    pub fn extract_with_progress<S, W, P>(
        &mut self,
        source: &mut S,
        channel_index: usize,
        sink: &mut W,
        progress: &mut P,
    ) -> Result<u64, HeadmixError>
    where
        S: FrameSource + ?Sized,
        W: FrameSink + ?Sized,
        P: ProgressReporter + ?Sized,
    {
        let spec = source.spec();
        if spec.channels != self.expected_channels {
            return Err(HeadmixError::ChannelCountMismatch {
                stream: source.name().to_owned(),
                expected: self.expected_channels,
                found: spec.channels,
            });
        }
        if channel_index >= spec.channels {
            return Err(HeadmixError::InvalidChannelIndex {
                index: channel_index,
                channels: spec.channels,
            });
        }
        let sink_spec = sink.spec();
        if sink_spec.channels != OUTPUT_CHANNELS {
            return Err(HeadmixError::ChannelCountMismatch {
                stream: "demultiplexer output".to_owned(),
                expected: OUTPUT_CHANNELS,
                found: sink_spec.channels,
            });
        }

        self.ensure_buffers(spec.channels)?;

        let stage = Stage::Split {
            channel: channel_index + 1,
        };
        progress.start(stage, source.frame_count());
        if source.position() != 0 {
            source.rewind()?;
        }

        let channels = spec.channels;
        let mut written = 0u64;
        loop {
            let frames = source.read_frames(&mut self.input)?;
            if frames == 0 {
                break;
            }

            let input = self.input[..frames * channels].chunks_exact(channels);
            let output = self.output[..frames * OUTPUT_CHANNELS].chunks_exact_mut(OUTPUT_CHANNELS);
            for (frame, pair) in input.zip(output) {
                let sample = frame[channel_index];
                pair[0] = sample;
                pair[1] = sample;
            }

            sink.write_frames(&self.output[..frames * OUTPUT_CHANNELS])?;
            written += frames as u64;
            self.peak_frames = self.peak_frames.max(frames);
            progress.advance(frames as u64);
        }

        let sealed = sink.finalize()?;
        debug!(
            "extracted channel {} of '{}': {written} frame(s)",
            channel_index + 1,
            source.name()
        );
        progress.finish(stage);
        Ok(sealed)
    }

    fn ensure_buffers(&mut self, channels: usize) -> Result<(), HeadmixError> {
        let frames = self.block_frames.get();
        if self.input.len() != frames * channels {
            self.input = alloc_block(frames, channels)?;
        }
        if self.output.len() != frames * OUTPUT_CHANNELS {
            self.output = alloc_block(frames, OUTPUT_CHANNELS)?;
        }
        Ok(())
    }
}

impl Default for Demultiplexer {
    fn default() -> Self {
        Self::new(
            NonZeroUsize::new(DEFAULT_SPLIT_BLOCK_FRAMES).unwrap_or(NonZeroUsize::MIN),
            DEFAULT_INPUT_CHANNELS,
        )
    }
}
