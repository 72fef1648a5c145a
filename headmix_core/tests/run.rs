use headmix_core::{
    mix, run_pipeline, split, split_with_progress, FilterError, HeadmixError, MixConfig,
    NoProgress, PassthroughFilter, PipelineConfig, ProgressEvent, SplitConfig, Stage,
};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::error::Error;
use std::fs::{self, File};
use std::io::Write;
use std::num::NonZeroUsize;
use std::path::Path;
use tempfile::tempdir;

/// Write interleaved float samples as a 32-bit float WAV fixture.
///
/// Fixtures are generated at runtime so no binary assets live in the
/// repository.
fn write_float_wav<P: AsRef<Path>>(
    path: P,
    channels: u16,
    sample_rate: u32,
    samples: &[f32],
) -> Result<(), Box<dyn Error>> {
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(path, spec)?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(())
}

fn write_stereo<P: AsRef<Path>>(path: P, frames: &[(f32, f32)]) -> Result<(), Box<dyn Error>> {
    let samples: Vec<f32> = frames.iter().flat_map(|&(l, r)| [l, r]).collect();
    write_float_wav(path, 2, 44_100, &samples)
}

/// Six channels whose value at `frame` is `channel * 0.1 + frame * 0.001`.
fn write_six_channel<P: AsRef<Path>>(path: P, frames: usize) -> Result<(), Box<dyn Error>> {
    let samples: Vec<f32> = (0..frames)
        .flat_map(|frame| (1..=6).map(move |ch| six_channel_value(ch, frame)))
        .collect();
    write_float_wav(path, 6, 48_000, &samples)
}

fn six_channel_value(channel: usize, frame: usize) -> f32 {
    channel as f32 * 0.1 + frame as f32 * 0.001
}

fn read_wav<P: AsRef<Path>>(path: P) -> Result<(WavSpec, Vec<f32>), Box<dyn Error>> {
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();
    let samples = reader.samples::<f32>().collect::<Result<Vec<_>, _>>()?;
    Ok((spec, samples))
}

#[test]
fn split_extracts_each_channel_as_dual_mono() -> Result<(), Box<dyn Error>> {
    let work_dir = tempdir()?;
    let input_path = work_dir.path().join("surround.wav");
    let samples = [1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0].repeat(4);
    write_float_wav(&input_path, 6, 44_100, &samples)?;

    let output_dir = tempdir()?;
    let metrics = split(SplitConfig::new(&input_path, output_dir.path())?)?;

    assert_eq!(metrics.outputs.len(), 6);
    assert_eq!(metrics.frames_per_channel, 4);

    for (index, path) in metrics.outputs.iter().enumerate() {
        let file_name = path.file_name().unwrap().to_string_lossy();
        assert_eq!(file_name, format!("song-{}.wav", index + 1));

        let (spec, samples) = read_wav(path)?;
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.sample_rate, 44_100);
        assert_eq!(samples, vec![(index + 1) as f32; 8]);
    }

    output_dir.close()?;
    work_dir.close()?;
    Ok(())
}

#[test]
fn split_is_independent_of_block_size() -> Result<(), Box<dyn Error>> {
    let work_dir = tempdir()?;
    let input_path = work_dir.path().join("input.wav");
    write_six_channel(&input_path, 1_001)?;

    let output_dir = tempdir()?;
    let block = NonZeroUsize::new(64).unwrap();
    let config = SplitConfig::builder(&input_path, output_dir.path())
        .prefix("track")
        .block_frames(block)
        .build()?;
    let metrics = split(config)?;

    assert_eq!(metrics.frames_per_channel, 1_001);
    assert!(metrics.peak_frames_per_block <= block.get());

    let (_, samples) = read_wav(output_dir.path().join("track-4.wav"))?;
    assert_eq!(samples.len(), 2 * 1_001);
    for (frame, pair) in samples.chunks_exact(2).enumerate() {
        assert_eq!(pair[0].to_bits(), pair[1].to_bits());
        assert_eq!(pair[0], six_channel_value(4, frame));
    }

    Ok(())
}

#[test]
fn split_accepts_integer_pcm_input() -> Result<(), Box<dyn Error>> {
    let work_dir = tempdir()?;
    let input_path = work_dir.path().join("pcm16.wav");
    let spec = WavSpec {
        channels: 6,
        sample_rate: 22_050,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(&input_path, spec)?;
    for _ in 0..10 {
        for ch in 1..=6i16 {
            writer.write_sample(ch * 4_096)?;
        }
    }
    writer.finalize()?;

    let output_dir = tempdir()?;
    let metrics = split(SplitConfig::new(&input_path, output_dir.path())?)?;
    assert_eq!(metrics.frames_per_channel, 10);

    let (spec, samples) = read_wav(&metrics.outputs[1])?;
    assert_eq!(spec.sample_rate, 22_050);
    assert!(samples.iter().all(|&s| (s - 0.25).abs() < 1e-6));
    Ok(())
}

#[test]
fn split_rejects_non_six_channel_input() -> Result<(), Box<dyn Error>> {
    let work_dir = tempdir()?;
    let input_path = work_dir.path().join("stereo.wav");
    write_stereo(&input_path, &[(0.1, 0.2); 16])?;

    let output_dir = tempdir()?;
    let err = split(SplitConfig::new(&input_path, output_dir.path())?)
        .expect_err("stereo input should be rejected");
    match err {
        HeadmixError::ChannelCountMismatch {
            expected, found, ..
        } => {
            assert_eq!(expected, 6);
            assert_eq!(found, 2);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    assert!(fs::read_dir(output_dir.path())?.next().is_none());
    Ok(())
}

#[test]
fn split_refuses_to_overwrite_without_permission() -> Result<(), Box<dyn Error>> {
    let work_dir = tempdir()?;
    let input_path = work_dir.path().join("input.wav");
    write_six_channel(&input_path, 8)?;

    let output_dir = tempdir()?;
    let existing = output_dir.path().join("song-2.wav");
    fs::write(&existing, b"keep me")?;

    let err = split(SplitConfig::new(&input_path, output_dir.path())?)
        .expect_err("existing output should be reported");
    assert!(matches!(err, HeadmixError::OutputExists(ref path) if path.ends_with("song-2.wav")));
    assert_eq!(fs::read(&existing)?, b"keep me");

    let config = SplitConfig::builder(&input_path, output_dir.path())
        .overwrite(true)
        .build()?;
    split(config)?;
    let (spec, _) = read_wav(&existing)?;
    assert_eq!(spec.channels, 2);
    Ok(())
}

#[test]
fn split_config_detects_missing_output_directory() -> Result<(), Box<dyn Error>> {
    let work_dir = tempdir()?;
    let input_path = work_dir.path().join("input.wav");
    write_six_channel(&input_path, 4)?;
    let missing = work_dir.path().join("nowhere");

    let err = SplitConfig::new(&input_path, &missing).expect_err("missing directory");
    match err {
        HeadmixError::MissingOutputDirectory(path) => assert_eq!(path, missing),
        other => panic!("unexpected error: {other:?}"),
    }
    Ok(())
}

#[test]
fn split_reports_unreadable_input() -> Result<(), Box<dyn Error>> {
    let work_dir = tempdir()?;
    let input_path = work_dir.path().join("input.bin");
    File::create(&input_path)?.write_all(b"not an audio file")?;

    let output_dir = tempdir()?;
    let err = split(SplitConfig::new(&input_path, output_dir.path())?)
        .expect_err("garbage input should fail");
    assert!(matches!(err, HeadmixError::StreamOpen { .. }));
    assert!(err.to_string().contains("input.bin"));
    Ok(())
}

#[test]
fn split_emits_progress_for_every_channel() -> Result<(), Box<dyn Error>> {
    let work_dir = tempdir()?;
    let input_path = work_dir.path().join("input.wav");
    write_six_channel(&input_path, 100)?;
    let output_dir = tempdir()?;

    let mut started = Vec::new();
    let mut advanced = 0u64;
    let mut reporter = |event: ProgressEvent| match event {
        ProgressEvent::Start { stage, total_frames } => started.push((stage, total_frames)),
        ProgressEvent::Advance { frames } => advanced += frames,
        ProgressEvent::Finish { .. } => {}
    };
    split_with_progress(SplitConfig::new(&input_path, output_dir.path())?, &mut reporter)?;

    assert_eq!(started.len(), 6);
    assert_eq!(started[2], (Stage::Split { channel: 3 }, Some(100)));
    assert_eq!(advanced, 600);
    Ok(())
}

#[test]
fn mix_averages_two_identical_streams() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let a = dir.path().join("a.wav");
    let b = dir.path().join("b.wav");
    write_stereo(&a, &[(0.5, 0.5), (1.0, 1.0)])?;
    write_stereo(&b, &[(0.5, 0.5), (1.0, 1.0)])?;
    let out = dir.path().join("mix.wav");

    let metrics = mix(MixConfig::builder([&a, &b], &out).build()?)?;

    assert_eq!(metrics.frames_written, 2);
    let (spec, samples) = read_wav(&out)?;
    assert_eq!(spec.channels, 2);
    assert_eq!(spec.sample_rate, 44_100);
    assert_eq!(samples, vec![0.5, 0.5, 1.0, 1.0]);
    Ok(())
}

#[test]
fn mix_pads_short_streams_with_silence() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let long = dir.path().join("long.wav");
    let short = dir.path().join("short.wav");
    write_stereo(&long, &[(0.6, -0.6), (0.4, -0.4), (0.2, -0.2)])?;
    write_stereo(&short, &[(0.2, 0.2)])?;
    let out = dir.path().join("mix.wav");

    let config = MixConfig::builder([&long, &short], &out)
        .block_frames(NonZeroUsize::new(2).unwrap())
        .build()?;
    mix(config)?;

    let (_, samples) = read_wav(&out)?;
    assert_eq!(samples.len(), 6);
    assert_eq!(samples[0], (0.6f32 + 0.2) / 2.0);
    assert_eq!(samples[1], (-0.6f32 + 0.2) / 2.0);
    assert_eq!(&samples[2..], &[0.2, -0.2, 0.1, -0.1]);
    Ok(())
}

#[test]
fn mix_output_matches_longest_input_exactly() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let lengths = [1usize, 1_024, 1_025, 3_000, 2_048, 17];
    let inputs: Vec<_> = lengths
        .iter()
        .enumerate()
        .map(|(i, &len)| {
            let path = dir.path().join(format!("in-{i}.wav"));
            write_stereo(&path, &vec![(0.1, -0.1); len]).map(|_| path)
        })
        .collect::<Result<_, _>>()?;
    let out = dir.path().join("mix.wav");

    let metrics = mix(MixConfig::builder(&inputs, &out).build()?)?;

    assert_eq!(metrics.frames_written, 3_000);
    let reader = WavReader::open(&out)?;
    assert_eq!(reader.duration(), 3_000);
    Ok(())
}

#[test]
fn failed_mix_leaves_no_output() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let stereo = dir.path().join("stereo.wav");
    let mono = dir.path().join("mono.wav");
    write_stereo(&stereo, &[(0.1, 0.1); 4])?;
    write_float_wav(&mono, 1, 44_100, &[0.1; 4])?;
    let out = dir.path().join("mix.wav");

    let err = mix(MixConfig::builder([&stereo, &mono], &out).build()?)
        .expect_err("mono input should be rejected");
    assert!(matches!(
        err,
        HeadmixError::ChannelCountMismatch {
            expected: 2,
            found: 1,
            ..
        }
    ));

    let leftovers: Vec<_> = fs::read_dir(dir.path())?
        .map(|entry| entry.map(|e| e.file_name()))
        .collect::<Result<_, _>>()?;
    assert_eq!(leftovers.len(), 2, "unexpected files: {leftovers:?}");
    assert!(!out.exists());
    Ok(())
}

#[test]
fn mix_reports_missing_input() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let present = dir.path().join("present.wav");
    write_stereo(&present, &[(0.0, 0.0)])?;
    let missing = dir.path().join("missing.wav");

    let err = mix(MixConfig::builder([&present, &missing], dir.path().join("out.wav")).build()?)
        .expect_err("missing input should fail");
    match err {
        HeadmixError::StreamOpen { path, .. } => assert_eq!(path, missing),
        other => panic!("unexpected error: {other:?}"),
    }
    Ok(())
}

#[test]
fn pipeline_with_passthrough_filter_mixes_all_channels() -> Result<(), Box<dyn Error>> {
    let work_dir = tempdir()?;
    let input_path = work_dir.path().join("input.wav");
    write_six_channel(&input_path, 300)?;
    let output_dir = tempdir()?;
    let mix_path = output_dir.path().join("mix.wav");

    let config = PipelineConfig::new(SplitConfig::new(&input_path, output_dir.path())?, &mix_path)
        .filtered_postfix(Some("hrtf"));
    let metrics = run_pipeline(config, &PassthroughFilter, &mut NoProgress)?;

    assert_eq!(metrics.split.frames_per_channel, 300);
    assert_eq!(metrics.mix.frames_written, 300);
    assert!(output_dir.path().join("song-6-hrtf.wav").exists());

    let (_, samples) = read_wav(&mix_path)?;
    for (frame, pair) in samples.chunks_exact(2).enumerate() {
        let expected = (1..=6).map(|ch| six_channel_value(ch, frame)).sum::<f32>() / 6.0;
        assert!((pair[0] - expected).abs() < 1e-5, "frame {frame}");
        assert_eq!(pair[0], pair[1]);
    }
    Ok(())
}

#[test]
fn pipeline_stops_before_mixing_when_a_filter_fails() -> Result<(), Box<dyn Error>> {
    let work_dir = tempdir()?;
    let input_path = work_dir.path().join("input.wav");
    write_six_channel(&input_path, 16)?;
    let output_dir = tempdir()?;
    let mix_path = output_dir.path().join("mix.wav");

    let filter = |channel: usize, _: &Path, _: &Path| -> Result<(), FilterError> {
        if channel == 3 {
            Err(FilterError::Panicked("spatializer crashed".into()))
        } else {
            Ok(())
        }
    };
    let config = PipelineConfig::new(SplitConfig::new(&input_path, output_dir.path())?, &mix_path);

    let err = run_pipeline(config, &filter, &mut NoProgress).expect_err("filter failure");
    assert!(matches!(err, HeadmixError::Filter { channel: 3, .. }));
    assert!(!mix_path.exists());
    Ok(())
}

fn dir_entries(dir: &Path) -> Result<Vec<String>, Box<dyn Error>> {
    let mut names = fs::read_dir(dir)?
        .map(|entry| Ok(entry?.file_name().to_string_lossy().into_owned()))
        .collect::<Result<Vec<_>, std::io::Error>>()?;
    names.sort();
    Ok(names)
}

#[test]
fn pipeline_refuses_existing_mix_output_before_splitting() -> Result<(), Box<dyn Error>> {
    let input_dir = tempdir()?;
    let input_path = input_dir.path().join("input.wav");
    write_six_channel(&input_path, 32)?;
    let output_dir = tempdir()?;
    let mix_path = output_dir.path().join("mix.wav");
    fs::write(&mix_path, b"previous mix")?;

    let config = PipelineConfig::new(SplitConfig::new(&input_path, output_dir.path())?, &mix_path);
    let err = run_pipeline(config, &PassthroughFilter, &mut NoProgress)
        .expect_err("existing mix output should be refused");

    assert!(matches!(err, HeadmixError::OutputExists(ref path) if *path == mix_path));
    assert_eq!(dir_entries(output_dir.path())?, ["mix.wav"]);
    assert_eq!(fs::read(&mix_path)?, b"previous mix");
    Ok(())
}

#[test]
fn pipeline_refuses_existing_filtered_output_before_filtering() -> Result<(), Box<dyn Error>> {
    let input_dir = tempdir()?;
    let input_path = input_dir.path().join("input.wav");
    write_six_channel(&input_path, 32)?;
    let output_dir = tempdir()?;
    let mix_path = output_dir.path().join("mix.wav");
    let filtered = output_dir.path().join("song-2-hrtf.wav");
    fs::write(&filtered, b"keep me")?;

    let config = PipelineConfig::new(SplitConfig::new(&input_path, output_dir.path())?, &mix_path)
        .filtered_postfix(Some("hrtf"));
    let err = run_pipeline(config, &PassthroughFilter, &mut NoProgress)
        .expect_err("existing filtered output should be refused");

    match err {
        HeadmixError::OutputExists(path) => {
            assert_eq!(path.file_name(), filtered.file_name());
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(dir_entries(output_dir.path())?, ["song-2-hrtf.wav"]);
    assert_eq!(fs::read(&filtered)?, b"keep me");
    Ok(())
}

#[test]
fn pipeline_overwrite_replaces_existing_outputs() -> Result<(), Box<dyn Error>> {
    let input_dir = tempdir()?;
    let input_path = input_dir.path().join("input.wav");
    write_six_channel(&input_path, 32)?;
    let output_dir = tempdir()?;
    let mix_path = output_dir.path().join("mix.wav");
    fs::write(&mix_path, b"previous mix")?;
    fs::write(output_dir.path().join("song-4-hrtf.wav"), b"stale")?;

    let split = SplitConfig::builder(&input_path, output_dir.path())
        .overwrite(true)
        .build()?;
    let config = PipelineConfig::new(split, &mix_path).filtered_postfix(Some("hrtf"));
    let metrics = run_pipeline(config, &PassthroughFilter, &mut NoProgress)?;

    assert_eq!(metrics.mix.frames_written, 32);
    assert_eq!(WavReader::open(output_dir.path().join("song-4-hrtf.wav"))?.duration(), 32);
    Ok(())
}
