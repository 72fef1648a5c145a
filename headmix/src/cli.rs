use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use clap::{builder::ValueParser, value_parser, Arg, ArgAction, Command};
use headmix_core::{
    DEFAULT_INPUT_CHANNELS, DEFAULT_MIX_BLOCK_FRAMES, DEFAULT_PREFIX, DEFAULT_SPLIT_BLOCK_FRAMES,
};

/// Parse a human-friendly duration such as `500ms`, `30s` or `1m30s`.
///
/// Supported suffixes are `ms`, `s`, `m` and `h`; components may be chained.
/// The total must be greater than zero.
pub fn parse_duration(value: &str) -> Result<Duration, String> {
    let input = value.trim();
    if input.is_empty() {
        return Err("duration cannot be empty".into());
    }

    let invalid = || format!("invalid duration '{value}'");
    let mut rest = input;
    let mut total_ms: u64 = 0;

    while !rest.is_empty() {
        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        if digits == 0 {
            return Err(invalid());
        }
        let number: u64 = rest[..digits].parse().map_err(|_| invalid())?;
        rest = &rest[digits..];

        let (unit_len, factor) = if rest.starts_with("ms") {
            (2, 1)
        } else if rest.starts_with('s') {
            (1, 1_000)
        } else if rest.starts_with('m') {
            (1, 60_000)
        } else if rest.starts_with('h') {
            (1, 3_600_000)
        } else {
            return Err(invalid());
        };
        rest = &rest[unit_len..];

        total_ms = number
            .checked_mul(factor)
            .and_then(|component| total_ms.checked_add(component))
            .ok_or_else(|| "duration is too large".to_owned())?;
    }

    if total_ms == 0 {
        return Err("duration must be greater than zero".into());
    }

    Ok(Duration::from_millis(total_ms))
}

fn block_frames_arg(name: &'static str, default: usize) -> Arg {
    Arg::new(name)
        .long(name)
        .value_name("FRAMES")
        .help("Frames processed per block")
        .default_value(default.to_string())
        .value_parser(value_parser!(NonZeroUsize))
}

fn prefix_arg() -> Arg {
    Arg::new("prefix")
        .short('p')
        .long("prefix")
        .value_name("PREFIX")
        .help("Prefix of the per-channel files (<PREFIX>-<N>.wav)")
        .default_value(DEFAULT_PREFIX)
}

fn channels_arg() -> Arg {
    Arg::new("channels")
        .short('c')
        .long("channels")
        .value_name("COUNT")
        .help("Number of channels the input must have")
        .default_value(DEFAULT_INPUT_CHANNELS.to_string())
        .value_parser(value_parser!(u16).range(1..))
}

fn overwrite_arg() -> Arg {
    Arg::new("overwrite")
        .long("overwrite")
        .help("Allow overwriting existing output files")
        .action(ArgAction::SetTrue)
}

fn postfix_arg() -> Arg {
    Arg::new("postfix")
        .long("postfix")
        .value_name("POSTFIX")
        .help("Write filtered files as <PREFIX>-<N>-<POSTFIX>.wav instead of filtering in place")
}

fn filter_args() -> [Arg; 3] {
    [
        Arg::new("command")
            .long("command")
            .value_name("PROGRAM")
            .help("Filter program run once per channel")
            .value_parser(value_parser!(PathBuf)),
        Arg::new("arg")
            .long("arg")
            .value_name("ARG")
            .help("Argument passed to the filter; {input}, {output} and {channel} are substituted")
            .action(ArgAction::Append)
            .allow_hyphen_values(true),
        Arg::new("timeout")
            .long("timeout")
            .value_name("DURATION")
            .help("Kill a filter that runs longer than this (e.g. 30s, 2m)")
            .value_parser(ValueParser::new(parse_duration)),
    ]
}

fn split_command() -> Command {
    Command::new("split")
        .about("Split a multi-channel file into one dual-mono stereo file per channel")
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("OUTPUT_DIR")
                .help("Directory where the channel files will be written")
                .default_value(".")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(prefix_arg())
        .arg(channels_arg())
        .arg(block_frames_arg("block-frames", DEFAULT_SPLIT_BLOCK_FRAMES))
        .arg(overwrite_arg())
        .arg(
            Arg::new("dry-run")
                .long("dry-run")
                .help("Print the files that would be written without creating them")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("input")
                .value_name("INPUT")
                .help("Path to the interleaved multi-channel audio file")
                .required(true)
                .value_parser(value_parser!(PathBuf)),
        )
}

fn filter_command() -> Command {
    let [command, arg, timeout] = filter_args();
    Command::new("filter")
        .about("Run a filter program over every split channel file concurrently")
        .arg(command.required(true))
        .arg(arg)
        .arg(timeout)
        .arg(
            Arg::new("dir")
                .short('d')
                .long("dir")
                .value_name("DIR")
                .help("Directory holding the channel files")
                .default_value(".")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(prefix_arg())
        .arg(channels_arg())
        .arg(postfix_arg())
}

fn mix_command() -> Command {
    Command::new("mix")
        .about("Mix stereo files into one stereo file")
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("OUTPUT")
                .help("Path of the mixed stereo file")
                .required(true)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(block_frames_arg("block-frames", DEFAULT_MIX_BLOCK_FRAMES))
        .arg(overwrite_arg())
        .arg(
            Arg::new("inputs")
                .value_name("INPUT")
                .help("Stereo files to mix")
                .required(true)
                .num_args(1..)
                .value_parser(value_parser!(PathBuf)),
        )
}

fn run_command() -> Command {
    Command::new("run")
        .about("Split, filter every channel, then mix the filtered channels")
        .arg(
            Arg::new("work-dir")
                .short('w')
                .long("work-dir")
                .value_name("DIR")
                .help("Directory for the intermediate channel files")
                .default_value(".")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("mix-output")
                .short('o')
                .long("mix-output")
                .value_name("OUTPUT")
                .help("Path of the final stereo mix")
                .required(true)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(prefix_arg())
        .arg(channels_arg())
        .arg(postfix_arg())
        .arg(block_frames_arg("split-block-frames", DEFAULT_SPLIT_BLOCK_FRAMES))
        .arg(block_frames_arg("mix-block-frames", DEFAULT_MIX_BLOCK_FRAMES))
        .arg(overwrite_arg())
        .args(filter_args())
        .arg(
            Arg::new("input")
                .value_name("INPUT")
                .help("Path to the interleaved multi-channel audio file")
                .required(true)
                .value_parser(value_parser!(PathBuf)),
        )
}

pub fn build_cli() -> Command {
    Command::new(env!("CARGO_PKG_NAME"))
        .author(env!("CARGO_PKG_AUTHORS"))
        .about("Split six-channel audio into per-channel stereo files and mix them back")
        .version(env!("CARGO_PKG_VERSION"))
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(split_command())
        .subcommand(filter_command())
        .subcommand(mix_command())
        .subcommand(run_command())
}
