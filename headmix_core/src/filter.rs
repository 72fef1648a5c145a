//! Per-channel filter capability.
//!
//! The spatialization stage is opaque to the engine: anything that can turn
//! one stereo file into another implements [`ChannelFilter`].

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};
use thiserror::Error;

/// Errors reported by a single filter invocation.
#[derive(Debug, Error)]
pub enum FilterError {
    /// The filter program could not be started.
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The filter program ran but reported failure.
    #[error("'{program}' exited with {status}")]
    ExitStatus { program: String, status: ExitStatus },

    /// The filter program did not finish in time and was killed.
    #[error("'{program}' did not finish within {timeout:?}")]
    TimedOut { program: String, timeout: Duration },

    /// The worker running the filter panicked.
    #[error("filter worker panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Transforms one channel's stereo file.
///
/// `input` and `output` may be the same path, in which case the filter works
/// in place. Implementations are shared across worker threads.
pub trait ChannelFilter: Send + Sync {
    fn apply(&self, channel: usize, input: &Path, output: &Path) -> Result<(), FilterError>;
}

impl<F> ChannelFilter for F
where
    F: Fn(usize, &Path, &Path) -> Result<(), FilterError> + Send + Sync,
{
    fn apply(&self, channel: usize, input: &Path, output: &Path) -> Result<(), FilterError> {
        self(channel, input, output)
    }
}

/// Leaves the audio untouched, copying it when input and output differ.
#[derive(Clone, Copy, Debug, Default)]
pub struct PassthroughFilter;

impl ChannelFilter for PassthroughFilter {
    fn apply(&self, _channel: usize, input: &Path, output: &Path) -> Result<(), FilterError> {
        if input != output {
            fs::copy(input, output)?;
        }
        Ok(())
    }
}

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Runs an external program once per channel.
///
/// Arguments may contain the placeholders `{input}`, `{output}` and
/// `{channel}` (1-based), substituted before the program is spawned.
#[derive(Clone, Debug)]
pub struct CommandFilter {
    program: PathBuf,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl CommandFilter {
    pub fn new<P: Into<PathBuf>>(program: P) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: None,
        }
    }

    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Kill the program if it runs longer than `timeout`.
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn program_name(&self) -> String {
        self.program.display().to_string()
    }

    fn expand(&self, channel: usize, input: &Path, output: &Path) -> Vec<OsString> {
        self.args
            .iter()
            .map(|arg| expand_placeholders(arg, channel, input, output))
            .collect()
    }
}

fn expand_placeholders(arg: &str, channel: usize, input: &Path, output: &Path) -> OsString {
    arg.replace("{input}", &input.to_string_lossy())
        .replace("{output}", &output.to_string_lossy())
        .replace("{channel}", &channel.to_string())
        .into()
}

impl ChannelFilter for CommandFilter {
    fn apply(&self, channel: usize, input: &Path, output: &Path) -> Result<(), FilterError> {
        let program = self.program_name();
        let args = self.expand(channel, input, output);
        debug!("channel {channel}: running {program} {args:?}");

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|source| FilterError::Spawn {
                program: program.clone(),
                source,
            })?;

        let status = match self.timeout {
            None => child.wait()?,
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                loop {
                    if let Some(status) = child.try_wait()? {
                        break status;
                    }
                    if Instant::now() >= deadline {
                        warn!("channel {channel}: '{program}' timed out, killing it");
                        if let Err(err) = child.kill() {
                            warn!("channel {channel}: failed to kill '{program}': {err}");
                        }
                        if let Err(err) = child.wait() {
                            warn!("channel {channel}: failed to reap '{program}': {err}");
                        }
                        return Err(FilterError::TimedOut { program, timeout });
                    }
                    thread::sleep(POLL_INTERVAL);
                }
            }
        };

        if status.success() {
            Ok(())
        } else {
            Err(FilterError::ExitStatus { program, status })
        }
    }
}
