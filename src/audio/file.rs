//! Audio file decoding
//!
//! This module loads whole audio files into memory using symphonia. The
//! result is a planar [`DecodedBuffer`] that a transport can play back
//! block by block without touching the disk again.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;

/// Errors that can occur while loading an audio file
#[derive(Error, Debug)]
pub enum FileError {
    #[error("Failed to open file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to probe audio format: {0}")]
    ProbeError(String),

    #[error("No audio tracks found")]
    NoTracks,

    #[error("Unsupported codec")]
    UnsupportedCodec,

    #[error("Decoder error: {0}")]
    DecoderError(String),

    #[error("Decoded audio is empty")]
    Empty,
}

/// A fully decoded audio clip, one `Vec` per channel
#[derive(Debug, Clone)]
pub struct DecodedBuffer {
    sample_rate: u32,
    channels: Vec<Vec<f32>>,
    path: Option<PathBuf>,
}

impl DecodedBuffer {
    /// Build from planar channel data
    ///
    /// Every channel must have the same, non-zero length.
    pub fn new(sample_rate: u32, channels: Vec<Vec<f32>>) -> Result<Self, FileError> {
        let frames = channels.first().map(Vec::len).unwrap_or(0);
        if frames == 0 || sample_rate == 0 {
            return Err(FileError::Empty);
        }
        if channels.iter().any(|c| c.len() != frames) {
            return Err(FileError::DecoderError(
                "channels have different lengths".to_string(),
            ));
        }
        Ok(Self {
            sample_rate,
            channels,
            path: None,
        })
    }

    /// Build from interleaved samples (`L R L R ...` for stereo)
    pub fn from_interleaved(
        sample_rate: u32,
        num_channels: usize,
        samples: &[f32],
    ) -> Result<Self, FileError> {
        if num_channels == 0 {
            return Err(FileError::Empty);
        }
        let frames = samples.len() / num_channels;
        let mut channels = vec![Vec::with_capacity(frames); num_channels];
        for frame in samples.chunks_exact(num_channels) {
            for (ch, &s) in frame.iter().enumerate() {
                channels[ch].push(s);
            }
        }
        Self::new(sample_rate, channels)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Length in frames
    pub fn frames(&self) -> usize {
        self.channels[0].len()
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }

    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    /// File this buffer was decoded from, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

/// Decode an entire audio file
pub fn decode_file(path: impl AsRef<Path>) -> Result<DecodedBuffer, FileError> {
    let path = path.as_ref();
    let file = File::open(path)?;

    // Create media source stream
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    // Create hint from file extension
    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| FileError::ProbeError(e.to_string()))?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(FileError::NoTracks)?;

    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut num_channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(0);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| match e {
            SymphoniaError::Unsupported(_) => FileError::UnsupportedCodec,
            other => FileError::DecoderError(other.to_string()),
        })?;

    let mut interleaved: Vec<f32> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(FileError::DecoderError(e.to_string())),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                if decoded.frames() == 0 {
                    continue;
                }
                sample_rate = spec.rate;
                num_channels = spec.channels.count();

                let mut samples = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                samples.copy_interleaved_ref(decoded);
                interleaved.extend_from_slice(samples.samples());
            }
            Err(SymphoniaError::DecodeError(msg)) => {
                log::warn!("Skipping corrupted packet in {:?}: {}", path, msg);
                continue;
            }
            Err(e) => return Err(FileError::DecoderError(e.to_string())),
        }
    }

    let mut buffer = DecodedBuffer::from_interleaved(sample_rate, num_channels, &interleaved)?;
    buffer.path = Some(path.to_path_buf());

    log::info!(
        "Decoded {:?}: {} frame(s), {} channel(s) at {} Hz",
        path,
        buffer.frames(),
        buffer.num_channels(),
        buffer.sample_rate()
    );

    Ok(buffer)
}
