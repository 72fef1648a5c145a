use std::any::Any;
use std::path::PathBuf;
use std::thread;

use log::{info, warn};

use crate::filter::{ChannelFilter, FilterError};
use crate::progress::{ProgressReporter, Stage};
use crate::HeadmixError;

/// One unit of filter work.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilterJob {
    /// 1-based channel index.
    pub channel: usize,
    pub input: PathBuf,
    pub output: PathBuf,
}

impl FilterJob {
    /// A job that rewrites `path` in place.
    pub fn in_place<P: Into<PathBuf>>(channel: usize, path: P) -> Self {
        let path = path.into();
        Self {
            channel,
            input: path.clone(),
            output: path,
        }
    }
}

/// Run `filter` once per job, each on its own thread, and wait for all of
/// them.
///
/// Every job runs to completion regardless of its siblings. If any job failed
/// the error of the lowest channel is returned; the others are logged.
pub fn run_filters<F, P>(
    filter: &F,
    jobs: &[FilterJob],
    progress: &mut P,
) -> Result<(), HeadmixError>
where
    F: ChannelFilter + ?Sized,
    P: ProgressReporter + ?Sized,
{
    progress.start(Stage::Filter, Some(jobs.len() as u64));

    let outcomes: Vec<(usize, Result<(), FilterError>)> = thread::scope(|scope| {
        let handles: Vec<_> = jobs
            .iter()
            .map(|job| {
                let handle = thread::Builder::new()
                    .name(format!("filter-{}", job.channel))
                    .spawn_scoped(scope, move || {
                        filter.apply(job.channel, &job.input, &job.output)
                    });
                (job.channel, handle)
            })
            .collect();

        handles
            .into_iter()
            .map(|(channel, handle)| {
                let result = match handle {
                    Ok(handle) => handle
                        .join()
                        .unwrap_or_else(|payload| Err(FilterError::Panicked(panic_message(payload)))),
                    Err(err) => Err(FilterError::Io(err)),
                };
                progress.advance(1);
                (channel, result)
            })
            .collect()
    });

    let mut first_failure = None;
    for (channel, result) in outcomes {
        match result {
            Ok(()) => info!("channel {channel}: filter finished"),
            Err(err) => {
                warn!("channel {channel}: filter failed: {err}");
                if first_failure.is_none() {
                    first_failure = Some(HeadmixError::Filter {
                        channel,
                        source: err,
                    });
                }
            }
        }
    }

    progress.finish(Stage::Filter);
    first_failure.map_or(Ok(()), Err)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}
