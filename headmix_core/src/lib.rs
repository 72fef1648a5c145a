//! Streaming split/reduce engine for six-channel audio.
//!
//! [`split`] demultiplexes an interleaved multi-channel file into one
//! dual-mono stereo file per channel, [`run_filters`] hands each of those
//! files to an external [`ChannelFilter`], and [`mix`] reduces any number of
//! stereo files back into one. [`run_pipeline`] chains the three.

mod buffer;
pub mod demux;
pub mod filter;
pub mod mix;
pub mod orchestrator;
pub mod progress;
pub mod stream;
pub mod wav;

use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use log::info;
use symphonia::core::errors::Error as SymphoniaError;
use thiserror::Error;

pub use buffer::clamp_sample;
pub use demux::{Demultiplexer, DEFAULT_INPUT_CHANNELS, DEFAULT_SPLIT_BLOCK_FRAMES};
pub use filter::{ChannelFilter, CommandFilter, FilterError, PassthroughFilter};
pub use mix::{MixMetrics, Mixer, DEFAULT_MIX_BLOCK_FRAMES};
pub use orchestrator::{run_filters, FilterJob};
pub use progress::{NoProgress, ProgressEvent, ProgressReporter, Stage};
pub use stream::{FrameSink, FrameSource, MemorySink, MemorySource, StreamSpec};
pub use wav::{DecodedSource, WavSink};

/// File name prefix used for split channels when none is configured.
pub const DEFAULT_PREFIX: &str = "song";

/// Errors that can occur while splitting, filtering or mixing audio.
#[derive(Debug, Error)]
pub enum HeadmixError {
    /// A stream does not have the channel count the component requires.
    #[error("'{stream}' must have {expected} channel(s) but has {found}")]
    ChannelCountMismatch {
        stream: String,
        expected: usize,
        found: usize,
    },

    /// A resource could not be opened or created.
    #[error("failed to open '{}': {source}", .path.display())]
    StreamOpen {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A working buffer could not be allocated.
    #[error("failed to allocate a buffer of {samples} samples")]
    Allocation { samples: usize },

    #[error("channel index {index} is out of range for a {channels}-channel stream")]
    InvalidChannelIndex { index: usize, channels: usize },

    #[error("at least one input stream is required")]
    NoInputs,

    #[error("output sample rate {found} Hz does not match the first input's {expected} Hz")]
    SampleRateMismatch { expected: u32, found: u32 },

    #[error("'{}' does not contain a default audio track", .0.display())]
    MissingDefaultTrack(PathBuf),

    #[error("'{}' uses an unsupported codec", .0.display())]
    UnsupportedCodec(PathBuf),

    #[error("'{}' does not advertise a sample rate", .0.display())]
    MissingSampleRate(PathBuf),

    #[error("'{}' does not advertise a channel layout", .0.display())]
    MissingChannelLayout(PathBuf),

    /// Returned when a destination exists and overwriting is disabled.
    #[error("output file already exists: {}", .0.display())]
    OutputExists(PathBuf),

    #[error("output directory does not exist: {}", .0.display())]
    MissingOutputDirectory(PathBuf),

    #[error("failed to decode '{stream}': {source}")]
    Decode {
        stream: String,
        #[source]
        source: SymphoniaError,
    },

    #[error("failed to write '{stream}': {source}")]
    Write {
        stream: String,
        #[source]
        source: hound::Error,
    },

    /// A per-channel filter invocation failed.
    #[error("filter for channel {channel} failed: {source}")]
    Filter {
        channel: usize,
        #[source]
        source: FilterError,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Configuration for splitting one multi-channel file.
#[derive(Clone, Debug)]
pub struct SplitConfig {
    /// Canonicalized path of the interleaved source.
    pub input_path: PathBuf,
    /// Canonicalized directory receiving one file per channel.
    pub output_dir: PathBuf,
    /// Prefix of the generated file names (`<prefix>-<index>.wav`).
    pub prefix: String,
    /// Channel count the input must have.
    pub channels: usize,
    pub block_frames: NonZeroUsize,
    pub overwrite: bool,
}

impl SplitConfig {
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(input: P, output_dir: Q) -> Result<Self, HeadmixError> {
        Self::builder(input, output_dir).build()
    }

    pub fn builder<P: AsRef<Path>, Q: AsRef<Path>>(input: P, output_dir: Q) -> SplitConfigBuilder {
        SplitConfigBuilder {
            input: input.as_ref().to_path_buf(),
            output_dir: output_dir.as_ref().to_path_buf(),
            prefix: DEFAULT_PREFIX.to_owned(),
            channels: DEFAULT_INPUT_CHANNELS,
            block_frames: NonZeroUsize::new(DEFAULT_SPLIT_BLOCK_FRAMES).unwrap_or(NonZeroUsize::MIN),
            overwrite: false,
        }
    }

    /// Path of the file receiving `channel` (1-based).
    pub fn channel_path(&self, channel: usize) -> PathBuf {
        channel_file(&self.output_dir, &self.prefix, channel, None)
    }
}

/// Builder for [`SplitConfig`].
#[derive(Clone, Debug)]
pub struct SplitConfigBuilder {
    input: PathBuf,
    output_dir: PathBuf,
    prefix: String,
    channels: usize,
    block_frames: NonZeroUsize,
    overwrite: bool,
}

impl SplitConfigBuilder {
    pub fn prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn channels(mut self, channels: usize) -> Self {
        self.channels = channels;
        self
    }

    pub fn block_frames(mut self, block_frames: NonZeroUsize) -> Self {
        self.block_frames = block_frames;
        self
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn build(self) -> Result<SplitConfig, HeadmixError> {
        let input_path = fs::canonicalize(&self.input).map_err(|err| HeadmixError::StreamOpen {
            path: self.input.clone(),
            source: err.into(),
        })?;
        if !self.output_dir.is_dir() {
            return Err(HeadmixError::MissingOutputDirectory(self.output_dir));
        }
        let output_dir = fs::canonicalize(&self.output_dir)?;

        Ok(SplitConfig {
            input_path,
            output_dir,
            prefix: self.prefix,
            channels: self.channels,
            block_frames: self.block_frames,
            overwrite: self.overwrite,
        })
    }
}

/// Configuration for mixing stereo files into one.
#[derive(Clone, Debug)]
pub struct MixConfig {
    pub inputs: Vec<PathBuf>,
    pub output: PathBuf,
    pub block_frames: NonZeroUsize,
    pub overwrite: bool,
}

impl MixConfig {
    pub fn builder<I, P, Q>(inputs: I, output: Q) -> MixConfigBuilder
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
        Q: Into<PathBuf>,
    {
        MixConfigBuilder {
            inputs: inputs.into_iter().map(Into::into).collect(),
            output: output.into(),
            block_frames: NonZeroUsize::new(DEFAULT_MIX_BLOCK_FRAMES).unwrap_or(NonZeroUsize::MIN),
            overwrite: false,
        }
    }
}

/// Builder for [`MixConfig`].
#[derive(Clone, Debug)]
pub struct MixConfigBuilder {
    inputs: Vec<PathBuf>,
    output: PathBuf,
    block_frames: NonZeroUsize,
    overwrite: bool,
}

impl MixConfigBuilder {
    pub fn block_frames(mut self, block_frames: NonZeroUsize) -> Self {
        self.block_frames = block_frames;
        self
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn build(self) -> Result<MixConfig, HeadmixError> {
        if self.inputs.is_empty() {
            return Err(HeadmixError::NoInputs);
        }
        if let Some(parent) = self.output.parent() {
            if !parent.as_os_str().is_empty() && !parent.is_dir() {
                return Err(HeadmixError::MissingOutputDirectory(parent.to_path_buf()));
            }
        }

        Ok(MixConfig {
            inputs: self.inputs,
            output: self.output,
            block_frames: self.block_frames,
            overwrite: self.overwrite,
        })
    }
}

/// Configuration for the full split, filter, mix chain.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub split: SplitConfig,
    /// Destination of the final stereo mix.
    pub mix_output: PathBuf,
    pub mix_block_frames: NonZeroUsize,
    /// When set, filtered files are written next to the split ones as
    /// `<prefix>-<index>-<postfix>.wav`; otherwise the filter runs in place.
    pub filtered_postfix: Option<String>,
}

impl PipelineConfig {
    pub fn new<P: Into<PathBuf>>(split: SplitConfig, mix_output: P) -> Self {
        Self {
            split,
            mix_output: mix_output.into(),
            mix_block_frames: NonZeroUsize::new(DEFAULT_MIX_BLOCK_FRAMES).unwrap_or(NonZeroUsize::MIN),
            filtered_postfix: None,
        }
    }

    pub fn mix_block_frames(mut self, block_frames: NonZeroUsize) -> Self {
        self.mix_block_frames = block_frames;
        self
    }

    pub fn filtered_postfix<S: Into<String>>(mut self, postfix: Option<S>) -> Self {
        self.filtered_postfix = postfix.map(Into::into);
        self
    }

    /// Filter jobs, one per channel, in channel order.
    pub fn filter_jobs(&self) -> Vec<FilterJob> {
        filter_jobs(
            &self.split.output_dir,
            &self.split.prefix,
            self.split.channels,
            self.filtered_postfix.as_deref(),
        )
    }
}

/// Results of a split run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SplitMetrics {
    /// Files written, in channel order.
    pub outputs: Vec<PathBuf>,
    pub frames_per_channel: u64,
    pub peak_frames_per_block: usize,
}

/// Results of a full pipeline run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PipelineMetrics {
    pub split: SplitMetrics,
    pub mix: MixMetrics,
}

fn channel_file(dir: &Path, prefix: &str, channel: usize, postfix: Option<&str>) -> PathBuf {
    let file_name = match postfix {
        Some(postfix) => format!("{prefix}-{channel}-{postfix}.wav"),
        None => format!("{prefix}-{channel}.wav"),
    };
    dir.join(file_name)
}

/// Build one filter job per channel for files produced by [`split`].
pub fn filter_jobs(
    dir: &Path,
    prefix: &str,
    channels: usize,
    postfix: Option<&str>,
) -> Vec<FilterJob> {
    (1..=channels)
        .map(|channel| FilterJob {
            channel,
            input: channel_file(dir, prefix, channel, None),
            output: channel_file(dir, prefix, channel, postfix),
        })
        .collect()
}

/// List the files [`split`] would create, without touching the filesystem.
pub fn plan_split(config: &SplitConfig) -> Vec<PathBuf> {
    (1..=config.channels)
        .map(|channel| config.channel_path(channel))
        .collect()
}

fn ensure_writable(paths: &[PathBuf], overwrite: bool) -> Result<(), HeadmixError> {
    if overwrite {
        return Ok(());
    }
    match paths.iter().find(|path| path.exists()) {
        Some(path) => Err(HeadmixError::OutputExists(path.clone())),
        None => Ok(()),
    }
}

/// Split the configured input into one stereo file per channel.
pub fn split(config: SplitConfig) -> Result<SplitMetrics, HeadmixError> {
    split_with_progress(config, &mut NoProgress)
}

pub fn split_with_progress<P>(config: SplitConfig, progress: &mut P) -> Result<SplitMetrics, HeadmixError>
where
    P: ProgressReporter + ?Sized,
{
    let outputs = plan_split(&config);
    ensure_writable(&outputs, config.overwrite)?;

    let mut source = DecodedSource::open(&config.input_path)?;
    let spec = source.spec();
    if spec.channels != config.channels {
        return Err(HeadmixError::ChannelCountMismatch {
            stream: source.name().to_owned(),
            expected: config.channels,
            found: spec.channels,
        });
    }

    let mut demux = Demultiplexer::new(config.block_frames, config.channels);
    let mut frames_per_channel = 0;
    for (index, path) in outputs.iter().enumerate() {
        let mut sink = WavSink::create(path, spec.stereo(), config.overwrite)?;
        frames_per_channel = demux.extract_with_progress(&mut source, index, &mut sink, &mut *progress)?;
        info!("channel {} -> {}", index + 1, path.display());
    }

    Ok(SplitMetrics {
        outputs,
        frames_per_channel,
        peak_frames_per_block: demux.peak_frames_per_block(),
    })
}

/// Mix the configured stereo inputs into one stereo file.
pub fn mix(config: MixConfig) -> Result<MixMetrics, HeadmixError> {
    mix_with_progress(config, &mut NoProgress)
}

pub fn mix_with_progress<P>(config: MixConfig, progress: &mut P) -> Result<MixMetrics, HeadmixError>
where
    P: ProgressReporter + ?Sized,
{
    ensure_writable(std::slice::from_ref(&config.output), config.overwrite)?;

    let mut sources = config
        .inputs
        .iter()
        .map(DecodedSource::open)
        .collect::<Result<Vec<_>, _>>()?;
    let spec = sources
        .first()
        .map(|source| source.spec().stereo())
        .ok_or(HeadmixError::NoInputs)?;

    let mut sink = WavSink::create(&config.output, spec, config.overwrite)?;
    let metrics = Mixer::new(config.block_frames).mix_with_progress(&mut sources, &mut sink, progress)?;

    info!(
        "mixed {} input(s) into {} ({} frame(s))",
        sources.len(),
        config.output.display(),
        metrics.frames_written
    );
    Ok(metrics)
}

/// Split, filter every channel concurrently, then mix the filtered files.
///
/// Every destination (channel files, filtered files and the mix) is checked
/// against the overwrite policy before anything is written. Mixing starts
/// only after every filter job has finished; any failure stops the run before
/// the mix output is created.
pub fn run_pipeline<F, P>(
    config: PipelineConfig,
    filter: &F,
    progress: &mut P,
) -> Result<PipelineMetrics, HeadmixError>
where
    F: ChannelFilter + ?Sized,
    P: ProgressReporter + ?Sized,
{
    let jobs = config.filter_jobs();
    let overwrite = config.split.overwrite;

    let mut destinations = plan_split(&config.split);
    if config.filtered_postfix.is_some() {
        destinations.extend(jobs.iter().map(|job| job.output.clone()));
    }
    destinations.push(config.mix_output.clone());
    ensure_writable(&destinations, overwrite)?;

    let split_metrics = split_with_progress(config.split, &mut *progress)?;

    run_filters(filter, &jobs, &mut *progress)?;

    let mix_config = MixConfig::builder(jobs.into_iter().map(|job| job.output), config.mix_output)
        .block_frames(config.mix_block_frames)
        .overwrite(overwrite)
        .build()?;
    let mix_metrics = mix_with_progress(mix_config, progress)?;

    Ok(PipelineMetrics {
        split: split_metrics,
        mix: mix_metrics,
    })
}
