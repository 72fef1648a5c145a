mod cli;

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context};
use clap::ArgMatches;
use headmix_core::{
    filter_jobs, mix_with_progress, plan_split, run_filters, run_pipeline, split_with_progress,
    ChannelFilter, CommandFilter, MixConfig, PassthroughFilter, PipelineConfig, ProgressReporter,
    SplitConfig, Stage,
};
use indicatif::{HumanDuration, ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::info;

use crate::cli::build_cli;

/// Renders core progress events on stderr.
struct BarReporter {
    bar: ProgressBar,
    bar_style: ProgressStyle,
    spinner_style: ProgressStyle,
}

impl BarReporter {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_draw_target(ProgressDrawTarget::stderr());

        let bar_style = ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar());
        let spinner_style = ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());

        Self {
            bar,
            bar_style,
            spinner_style,
        }
    }

    fn clear(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressReporter for BarReporter {
    fn start(&mut self, stage: Stage, total: Option<u64>) {
        match total {
            Some(total) => {
                self.bar.set_style(self.bar_style.clone());
                self.bar.set_length(total);
            }
            None => self.bar.set_style(self.spinner_style.clone()),
        }
        self.bar.set_position(0);
        self.bar.set_message(stage.to_string());
        self.bar.enable_steady_tick(Duration::from_millis(100));
    }

    fn advance(&mut self, frames: u64) {
        self.bar.inc(frames);
    }

    fn finish(&mut self, stage: Stage) {
        self.bar.set_message(format!("{stage} done"));
    }
}

fn block_frames(matches: &ArgMatches, name: &str) -> NonZeroUsize {
    *matches
        .get_one::<NonZeroUsize>(name)
        .expect("defaulted argument")
}

fn channels(matches: &ArgMatches) -> usize {
    usize::from(*matches.get_one::<u16>("channels").expect("defaulted argument"))
}

fn prefix(matches: &ArgMatches) -> String {
    matches
        .get_one::<String>("prefix")
        .cloned()
        .expect("defaulted argument")
}

fn command_filter(matches: &ArgMatches) -> Option<CommandFilter> {
    let program = matches.get_one::<PathBuf>("command")?;
    let args = matches
        .get_many::<String>("arg")
        .into_iter()
        .flatten()
        .cloned();
    let timeout = matches.get_one::<Duration>("timeout").copied();
    Some(CommandFilter::new(program).args(args).timeout(timeout))
}

fn split_cmd(matches: &ArgMatches) -> anyhow::Result<()> {
    let input_path = matches
        .get_one::<PathBuf>("input")
        .expect("required argument");
    if !input_path.is_file() {
        return Err(anyhow!(
            "input file does not exist: {}",
            input_path.display()
        ));
    }
    let output_dir = matches
        .get_one::<PathBuf>("output")
        .expect("defaulted argument");

    let config = SplitConfig::builder(input_path, output_dir)
        .prefix(prefix(matches))
        .channels(channels(matches))
        .block_frames(block_frames(matches, "block-frames"))
        .overwrite(matches.get_flag("overwrite"))
        .build()
        .with_context(|| {
            format!(
                "failed to create configuration for '{}'",
                input_path.display()
            )
        })?;

    if matches.get_flag("dry-run") {
        let plan = plan_split(&config);
        println!("Dry run: would generate {} file(s):", plan.len());
        for path in plan {
            println!("  {}", path.display());
        }
        return Ok(());
    }

    let mut progress = BarReporter::new();
    let result = split_with_progress(config, &mut progress)
        .with_context(|| format!("failed to split '{}'", input_path.display()));
    progress.clear();

    let metrics = result?;
    for (index, path) in metrics.outputs.iter().enumerate() {
        println!("Channel {} -> {}", index + 1, path.display());
    }
    println!("Split completed: {} frame(s) per channel.", metrics.frames_per_channel);
    Ok(())
}

fn filter_cmd(matches: &ArgMatches) -> anyhow::Result<()> {
    let filter = command_filter(matches).expect("required argument");
    let dir = matches.get_one::<PathBuf>("dir").expect("defaulted argument");
    let postfix = matches.get_one::<String>("postfix").map(String::as_str);
    let jobs = filter_jobs(dir, &prefix(matches), channels(matches), postfix);

    if let Some(missing) = jobs.iter().find(|job| !job.input.is_file()) {
        return Err(anyhow!(
            "channel file does not exist: {}",
            missing.input.display()
        ));
    }

    let mut progress = BarReporter::new();
    let result = run_filters(&filter, &jobs, &mut progress).context("filter stage failed");
    progress.clear();
    result?;

    println!("Filtered {} channel(s).", jobs.len());
    Ok(())
}

fn mix_cmd(matches: &ArgMatches) -> anyhow::Result<()> {
    let output = matches
        .get_one::<PathBuf>("output")
        .expect("required argument");
    let inputs = matches
        .get_many::<PathBuf>("inputs")
        .expect("required argument");

    let config = MixConfig::builder(inputs, output)
        .block_frames(block_frames(matches, "block-frames"))
        .overwrite(matches.get_flag("overwrite"))
        .build()
        .context("failed to create mix configuration")?;

    let mut progress = BarReporter::new();
    let result = mix_with_progress(config, &mut progress)
        .with_context(|| format!("failed to mix into '{}'", output.display()));
    progress.clear();

    let metrics = result?;
    println!(
        "Mixing complete, {} frame(s) saved to {}.",
        metrics.frames_written,
        output.display()
    );
    Ok(())
}

fn run_cmd(matches: &ArgMatches) -> anyhow::Result<()> {
    let input_path = matches
        .get_one::<PathBuf>("input")
        .expect("required argument");
    if !input_path.is_file() {
        return Err(anyhow!(
            "input file does not exist: {}",
            input_path.display()
        ));
    }
    let work_dir = matches
        .get_one::<PathBuf>("work-dir")
        .expect("defaulted argument");
    let mix_output = matches
        .get_one::<PathBuf>("mix-output")
        .expect("required argument");

    let split = SplitConfig::builder(input_path, work_dir)
        .prefix(prefix(matches))
        .channels(channels(matches))
        .block_frames(block_frames(matches, "split-block-frames"))
        .overwrite(matches.get_flag("overwrite"))
        .build()
        .with_context(|| {
            format!(
                "failed to create configuration for '{}'",
                input_path.display()
            )
        })?;
    let config = PipelineConfig::new(split, mix_output)
        .mix_block_frames(block_frames(matches, "mix-block-frames"))
        .filtered_postfix(matches.get_one::<String>("postfix").cloned());

    let filter: Box<dyn ChannelFilter> = match command_filter(matches) {
        Some(filter) => Box::new(filter),
        None => {
            info!("no filter command given, channels pass through unchanged");
            Box::new(PassthroughFilter)
        }
    };

    let mut progress = BarReporter::new();
    let result = run_pipeline(config, filter.as_ref(), &mut progress)
        .with_context(|| format!("failed to process '{}'", input_path.display()));
    progress.clear();

    let metrics = result?;
    println!(
        "Pipeline complete: {} channel(s), {} frame(s) saved to {}.",
        metrics.split.outputs.len(),
        metrics.mix.frames_written,
        mix_output.display()
    );
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let matches = build_cli().get_matches();
    let started = Instant::now();

    match matches.subcommand() {
        Some(("split", sub)) => split_cmd(sub)?,
        Some(("filter", sub)) => filter_cmd(sub)?,
        Some(("mix", sub)) => mix_cmd(sub)?,
        Some(("run", sub)) => run_cmd(sub)?,
        _ => unreachable!("subcommand is required"),
    }

    info!("finished in {}", HumanDuration(started.elapsed()));
    Ok(())
}
