//! Block-oriented access to interleaved `f32` audio streams.
//!
//! The engine never sees a whole file: it pulls and pushes bounded blocks
//! through [`FrameSource`] and [`FrameSink`]. File-backed implementations live
//! in [`crate::wav`]; the in-memory ones here back the tests and callers that
//! already hold decoded audio.

use crate::HeadmixError;

/// Fixed attributes of a stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamSpec {
    pub channels: usize,
    pub sample_rate: u32,
}

impl StreamSpec {
    pub fn new(channels: usize, sample_rate: u32) -> Self {
        Self {
            channels,
            sample_rate,
        }
    }

    /// Same sample rate, two channels.
    pub fn stereo(self) -> Self {
        Self::new(2, self.sample_rate)
    }
}

/// A readable stream of interleaved frames.
pub trait FrameSource {
    /// Human-readable name used in diagnostics, usually the file path.
    fn name(&self) -> &str;

    fn spec(&self) -> StreamSpec;

    /// Total number of frames, when the container advertises it.
    fn frame_count(&self) -> Option<u64>;

    /// Number of frames consumed since open or the last rewind.
    fn position(&self) -> u64;

    /// Fill `buf` with up to `buf.len() / channels` whole frames.
    ///
    /// Returns the number of frames read. Fewer frames than requested means
    /// the stream is exhausted; every later call returns zero.
    fn read_frames(&mut self, buf: &mut [f32]) -> Result<usize, HeadmixError>;

    /// Reposition at the first frame.
    fn rewind(&mut self) -> Result<(), HeadmixError>;

    /// Whether the read position has reached the advertised length.
    fn is_drained(&self) -> bool {
        self.frame_count()
            .is_some_and(|total| self.position() >= total)
    }
}

/// A writable stream that accumulates frames strictly in order.
pub trait FrameSink {
    fn spec(&self) -> StreamSpec;

    /// Append whole interleaved frames.
    fn write_frames(&mut self, samples: &[f32]) -> Result<(), HeadmixError>;

    /// Seal the stream and return the number of frames it holds.
    fn finalize(&mut self) -> Result<u64, HeadmixError>;
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn spec(&self) -> StreamSpec {
        (**self).spec()
    }

    fn frame_count(&self) -> Option<u64> {
        (**self).frame_count()
    }

    fn position(&self) -> u64 {
        (**self).position()
    }

    fn read_frames(&mut self, buf: &mut [f32]) -> Result<usize, HeadmixError> {
        (**self).read_frames(buf)
    }

    fn rewind(&mut self) -> Result<(), HeadmixError> {
        (**self).rewind()
    }

    fn is_drained(&self) -> bool {
        (**self).is_drained()
    }
}

/// Decoded audio held in memory.
#[derive(Clone, Debug)]
pub struct MemorySource {
    name: String,
    spec: StreamSpec,
    samples: Vec<f32>,
    position: usize,
}

impl MemorySource {
    /// Build a source from interleaved samples. Trailing samples that do not
    /// form a whole frame are dropped.
    pub fn new<S: Into<String>>(name: S, spec: StreamSpec, mut samples: Vec<f32>) -> Self {
        let whole = samples.len() - samples.len() % spec.channels.max(1);
        samples.truncate(whole);
        Self {
            name: name.into(),
            spec,
            samples,
            position: 0,
        }
    }

    /// Build a stereo source from `(left, right)` pairs.
    pub fn stereo<S: Into<String>>(name: S, sample_rate: u32, frames: &[(f32, f32)]) -> Self {
        let samples = frames.iter().flat_map(|&(l, r)| [l, r]).collect();
        Self::new(name, StreamSpec::new(2, sample_rate), samples)
    }

    fn total_frames(&self) -> usize {
        self.samples.len() / self.spec.channels.max(1)
    }
}

impl FrameSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn spec(&self) -> StreamSpec {
        self.spec
    }

    fn frame_count(&self) -> Option<u64> {
        Some(self.total_frames() as u64)
    }

    fn position(&self) -> u64 {
        self.position as u64
    }

    fn read_frames(&mut self, buf: &mut [f32]) -> Result<usize, HeadmixError> {
        let channels = self.spec.channels.max(1);
        let wanted = buf.len() / channels;
        let frames = wanted.min(self.total_frames() - self.position);

        let start = self.position * channels;
        let end = start + frames * channels;
        buf[..frames * channels].copy_from_slice(&self.samples[start..end]);
        self.position += frames;
        Ok(frames)
    }

    fn rewind(&mut self) -> Result<(), HeadmixError> {
        self.position = 0;
        Ok(())
    }
}

/// Sink collecting frames into memory.
#[derive(Clone, Debug)]
pub struct MemorySink {
    spec: StreamSpec,
    samples: Vec<f32>,
    finalized: bool,
}

impl MemorySink {
    pub fn new(spec: StreamSpec) -> Self {
        Self {
            spec,
            samples: Vec::new(),
            finalized: false,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.spec.channels.max(1)
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Reopen the collected frames for reading.
    pub fn into_source<S: Into<String>>(self, name: S) -> MemorySource {
        MemorySource::new(name, self.spec, self.samples)
    }
}

impl FrameSink for MemorySink {
    fn spec(&self) -> StreamSpec {
        self.spec
    }

    fn write_frames(&mut self, samples: &[f32]) -> Result<(), HeadmixError> {
        debug_assert!(!self.finalized, "write after finalize");
        self.samples.extend_from_slice(samples);
        Ok(())
    }

    fn finalize(&mut self) -> Result<u64, HeadmixError> {
        self.finalized = true;
        Ok(self.frames() as u64)
    }
}
