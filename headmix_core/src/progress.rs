use std::fmt;

/// Processing stage a [`ProgressEvent`] refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    /// Extraction of one channel (1-based index) into its own stereo file.
    Split { channel: usize },
    /// Per-channel filter fan-out.
    Filter,
    /// Reduction of the stereo inputs into the final mix.
    Mix,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Split { channel } => write!(f, "channel {channel}"),
            Stage::Filter => write!(f, "filter"),
            Stage::Mix => write!(f, "mix"),
        }
    }
}

/// Progress notifications emitted by the block loops.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProgressEvent {
    Start {
        stage: Stage,
        total_frames: Option<u64>,
    },
    Advance {
        frames: u64,
    },
    Finish {
        stage: Stage,
    },
}

/// Receiver for progress updates.
///
/// Every method has a no-op default so implementors only override what they
/// render. Closures taking a [`ProgressEvent`] implement this trait as well.
pub trait ProgressReporter {
    fn start(&mut self, _stage: Stage, _total_frames: Option<u64>) {}

    /// Called once per written block with the number of frames in that block.
    fn advance(&mut self, _frames: u64) {}

    fn finish(&mut self, _stage: Stage) {}
}

impl<F> ProgressReporter for F
where
    F: FnMut(ProgressEvent),
{
    fn start(&mut self, stage: Stage, total_frames: Option<u64>) {
        self(ProgressEvent::Start {
            stage,
            total_frames,
        });
    }

    fn advance(&mut self, frames: u64) {
        self(ProgressEvent::Advance { frames });
    }

    fn finish(&mut self, stage: Stage) {
        self(ProgressEvent::Finish { stage });
    }
}

/// Reporter that discards every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoProgress;

impl ProgressReporter for NoProgress {}
