//! File-backed streams: symphonia for decoding, hound for writing.

use std::fs::File;
use std::io::{self, BufWriter, ErrorKind};
use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavSpec, WavWriter};
use log::debug;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};
use tempfile::TempPath;

use crate::stream::{FrameSink, FrameSource, StreamSpec};
use crate::HeadmixError;

/// Decodes any container/codec symphonia can probe into interleaved `f32`
/// frames, one packet at a time.
pub struct DecodedSource {
    path: PathBuf,
    name: String,
    spec: StreamSpec,
    frame_count: Option<u64>,
    track_id: u32,
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    sample_buf: Option<SampleBuffer<f32>>,
    pending: Vec<f32>,
    pending_offset: usize,
    position: u64,
    finished: bool,
}

impl DecodedSource {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, HeadmixError> {
        let path = path.as_ref();
        let open_err = |source: Box<dyn std::error::Error + Send + Sync>| {
            HeadmixError::StreamOpen {
                path: path.to_path_buf(),
                source,
            }
        };

        let mut hint = Hint::new();
        if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
            hint.with_extension(extension);
        }

        let file = File::open(path).map_err(|err| open_err(err.into()))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());
        let probed = get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|err| open_err(err.into()))?;
        let reader = probed.format;

        let track = reader
            .default_track()
            .ok_or_else(|| HeadmixError::MissingDefaultTrack(path.to_path_buf()))?;
        if track.codec_params.codec == CODEC_TYPE_NULL {
            return Err(HeadmixError::UnsupportedCodec(path.to_path_buf()));
        }

        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| HeadmixError::MissingSampleRate(path.to_path_buf()))?;
        let channels = track
            .codec_params
            .channels
            .map(|channels| channels.count())
            .ok_or_else(|| HeadmixError::MissingChannelLayout(path.to_path_buf()))?;
        let frame_count = track.codec_params.n_frames;
        let track_id = track.id;

        let decoder = get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|err| open_err(err.into()))?;

        debug!(
            "opened '{}': {channels} channel(s) at {sample_rate} Hz, {:?} frame(s)",
            path.display(),
            frame_count
        );

        Ok(Self {
            path: path.to_path_buf(),
            name: path.display().to_string(),
            spec: StreamSpec::new(channels, sample_rate),
            frame_count,
            track_id,
            reader,
            decoder,
            sample_buf: None,
            pending: Vec::new(),
            pending_offset: 0,
            position: 0,
            finished: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Decode the next packet of the selected track into `pending`.
    /// Returns `false` once the container is exhausted.
    fn refill(&mut self) -> Result<bool, HeadmixError> {
        loop {
            let packet = match self.reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(err)) if err.kind() == ErrorKind::UnexpectedEof => {
                    return Ok(false);
                }
                Err(source) => {
                    return Err(HeadmixError::Decode {
                        stream: self.name.clone(),
                        source,
                    })
                }
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(reason)) => {
                    debug!("skipping corrupt packet in '{}': {reason}", self.name);
                    continue;
                }
                Err(source) => {
                    return Err(HeadmixError::Decode {
                        stream: self.name.clone(),
                        source,
                    })
                }
            };

            if decoded.frames() == 0 {
                continue;
            }

            let needed = decoded.capacity() * decoded.spec().channels.count();
            if self
                .sample_buf
                .as_ref()
                .map_or(true, |buf| buf.capacity() < needed)
            {
                self.sample_buf = Some(SampleBuffer::new(
                    decoded.capacity() as u64,
                    *decoded.spec(),
                ));
            }

            self.pending.clear();
            if let Some(sample_buf) = self.sample_buf.as_mut() {
                sample_buf.copy_interleaved_ref(decoded);
                self.pending.extend_from_slice(sample_buf.samples());
            }
            self.pending_offset = 0;
            return Ok(true);
        }
    }
}

impl FrameSource for DecodedSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn spec(&self) -> StreamSpec {
        self.spec
    }

    fn frame_count(&self) -> Option<u64> {
        self.frame_count
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn read_frames(&mut self, buf: &mut [f32]) -> Result<usize, HeadmixError> {
        let channels = self.spec.channels;
        let wanted = buf.len() / channels * channels;
        let mut filled = 0;

        while filled < wanted && !self.finished {
            if self.pending_offset >= self.pending.len() && !self.refill()? {
                self.finished = true;
                break;
            }

            let available = &self.pending[self.pending_offset..];
            let take = available.len().min(wanted - filled);
            buf[filled..filled + take].copy_from_slice(&available[..take]);
            filled += take;
            self.pending_offset += take;
        }

        let frames = filled / channels;
        self.position += frames as u64;
        Ok(frames)
    }

    fn rewind(&mut self) -> Result<(), HeadmixError> {
        *self = Self::open(&self.path)?;
        Ok(())
    }
}

/// Writes 32-bit float WAV.
///
/// Frames go to a hidden temporary file next to the destination, which is only
/// moved into place by [`FrameSink::finalize`]. Dropping the sink without
/// finalizing deletes the temporary file, so an aborted run never leaves a
/// truncated output behind.
pub struct WavSink {
    path: PathBuf,
    name: String,
    spec: StreamSpec,
    overwrite: bool,
    writer: Option<WavWriter<BufWriter<File>>>,
    temp_path: Option<TempPath>,
    frames: u64,
}

impl WavSink {
    pub fn create<P: AsRef<Path>>(
        path: P,
        spec: StreamSpec,
        overwrite: bool,
    ) -> Result<Self, HeadmixError> {
        let path = path.as_ref();
        let open_err = |source: Box<dyn std::error::Error + Send + Sync>| {
            HeadmixError::StreamOpen {
                path: path.to_path_buf(),
                source,
            }
        };

        if !overwrite && path.exists() {
            return Err(HeadmixError::OutputExists(path.to_path_buf()));
        }

        let channels = u16::try_from(spec.channels).map_err(|_| {
            open_err(
                io::Error::new(
                    ErrorKind::InvalidInput,
                    format!("{} channels cannot be stored in WAV", spec.channels),
                )
                .into(),
            )
        })?;
        let wav_spec = WavSpec {
            channels,
            sample_rate: spec.sample_rate,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let temp = tempfile::Builder::new()
            .prefix(".headmix-")
            .suffix(".wav.part")
            .tempfile_in(dir)
            .map_err(|err| open_err(err.into()))?;
        let (file, temp_path) = temp.into_parts();
        let writer =
            WavWriter::new(BufWriter::new(file), wav_spec).map_err(|err| open_err(err.into()))?;

        Ok(Self {
            path: path.to_path_buf(),
            name: path.display().to_string(),
            spec,
            overwrite,
            writer: Some(writer),
            temp_path: Some(temp_path),
            frames: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_err(&self, source: hound::Error) -> HeadmixError {
        HeadmixError::Write {
            stream: self.name.clone(),
            source,
        }
    }
}

impl FrameSink for WavSink {
    fn spec(&self) -> StreamSpec {
        self.spec
    }

    fn write_frames(&mut self, samples: &[f32]) -> Result<(), HeadmixError> {
        let writer = self.writer.as_mut().ok_or_else(|| HeadmixError::Write {
            stream: self.name.clone(),
            source: hound::Error::IoError(io::Error::new(
                ErrorKind::Other,
                "write after finalize",
            )),
        })?;

        for &sample in samples {
            if let Err(source) = writer.write_sample(sample) {
                return Err(HeadmixError::Write {
                    stream: self.name.clone(),
                    source,
                });
            }
        }

        self.frames += (samples.len() / self.spec.channels) as u64;
        Ok(())
    }

    fn finalize(&mut self) -> Result<u64, HeadmixError> {
        let Some(writer) = self.writer.take() else {
            return Ok(self.frames);
        };
        writer.finalize().map_err(|err| self.write_err(err))?;

        if let Some(temp_path) = self.temp_path.take() {
            let persisted = if self.overwrite {
                temp_path.persist(&self.path)
            } else {
                temp_path.persist_noclobber(&self.path)
            };
            persisted.map_err(|err| HeadmixError::StreamOpen {
                path: self.path.clone(),
                source: err.error.into(),
            })?;
        }

        debug!("finalized '{}' with {} frame(s)", self.name, self.frames);
        Ok(self.frames)
    }
}
