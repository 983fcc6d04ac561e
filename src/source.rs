//! Source providers
//!
//! A source is whatever feeds the processing node: a live capture device,
//! nothing at all (synthesis), or a decoded file under a transport. Each
//! variant knows how to turn one hardware block into the canonical
//! input/output buffers and hand them to the dispatcher.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::audio::{DecodedBuffer, InputAudioBlock, OutputAudioBlock, Transport};
use crate::backend::InputStream;
use crate::dispatch::Dispatcher;
use crate::error::AudioError;

/// Which kind of source a session runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Output only; the callback generates everything
    #[default]
    Synthesis,
    /// One-channel live input
    LiveMono,
    /// Two-channel live input
    LiveStereo,
    /// Decoded file playback
    File,
}

impl SourceKind {
    pub const ALL: &[SourceKind] = &[
        Self::Synthesis,
        Self::LiveMono,
        Self::LiveStereo,
        Self::File,
    ];

    /// Numeric type code: 0 synthesis, 1 live mono, 2 live stereo, 3 file
    pub fn code(self) -> u8 {
        match self {
            Self::Synthesis => 0,
            Self::LiveMono => 1,
            Self::LiveStereo => 2,
            Self::File => 3,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Synthesis => "Synthesis",
            Self::LiveMono => "Live (mono)",
            Self::LiveStereo => "Live (stereo)",
            Self::File => "File",
        }
    }

    pub fn is_live(self) -> bool {
        matches!(self, Self::LiveMono | Self::LiveStereo)
    }

    /// Channel count requested from the input device, for live kinds
    pub fn live_channels(self) -> Option<usize> {
        match self {
            Self::LiveMono => Some(1),
            Self::LiveStereo => Some(2),
            _ => None,
        }
    }
}

impl TryFrom<u8> for SourceKind {
    type Error = AudioError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.code() == code)
            .ok_or_else(|| AudioError::InvalidArgument(format!("unknown source type {}", code)))
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What to play for a [`SourceKind::File`] switch
#[derive(Debug, Clone)]
pub enum SourceDescriptor {
    /// Decode this file first (asynchronously)
    Path(PathBuf),
    /// Already decoded; attach immediately
    Buffer(Arc<DecodedBuffer>),
}

impl From<PathBuf> for SourceDescriptor {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<&str> for SourceDescriptor {
    fn from(path: &str) -> Self {
        Self::Path(PathBuf::from(path))
    }
}

impl From<DecodedBuffer> for SourceDescriptor {
    fn from(buffer: DecodedBuffer) -> Self {
        Self::Buffer(Arc::new(buffer))
    }
}

impl From<Arc<DecodedBuffer>> for SourceDescriptor {
    fn from(buffer: Arc<DecodedBuffer>) -> Self {
        Self::Buffer(buffer)
    }
}

/// Live capture feeding the node
pub(crate) struct LiveInput {
    stream: Box<dyn InputStream>,
    channels: usize,
    raw_l: Vec<f32>,
    raw_r: Vec<f32>,
}

/// File playback feeding the node
pub(crate) struct FilePlayback {
    transport: Option<Transport>,
}

/// The attached source, owned by the processing node
pub(crate) enum SourceHandle {
    Synthesis,
    Live(LiveInput),
    File(FilePlayback),
}

impl SourceHandle {
    /// Live source with the channel count of the requested kind
    pub(crate) fn live(stream: Box<dyn InputStream>, channels: usize, block_size: usize) -> Self {
        Self::Live(LiveInput {
            stream,
            channels: channels.clamp(1, 2),
            raw_l: vec![0.0; block_size],
            raw_r: vec![0.0; block_size],
        })
    }

    pub(crate) fn file(transport: Transport) -> Self {
        Self::File(FilePlayback {
            transport: Some(transport),
        })
    }

    pub(crate) fn kind(&self) -> SourceKind {
        match self {
            Self::Synthesis => SourceKind::Synthesis,
            Self::Live(live) if live.channels == 2 => SourceKind::LiveStereo,
            Self::Live(_) => SourceKind::LiveMono,
            Self::File(_) => SourceKind::File,
        }
    }

    /// Channel count reported in the input block
    pub(crate) fn input_channels(&self) -> usize {
        match self {
            Self::Synthesis => 1,
            Self::Live(live) => live.channels,
            Self::File(file) => file.transport.as_ref().map_or(1, Transport::num_channels),
        }
    }

    pub(crate) fn transport(&self) -> Option<&Transport> {
        match self {
            Self::File(file) => file.transport.as_ref(),
            _ => None,
        }
    }

    pub(crate) fn transport_mut(&mut self) -> Option<&mut Transport> {
        match self {
            Self::File(file) => file.transport.as_mut(),
            _ => None,
        }
    }

    /// Run one block through this source and the dispatcher
    pub(crate) fn process(
        &mut self,
        input: &mut InputAudioBlock,
        output: &mut OutputAudioBlock,
        frames: usize,
        dispatcher: &mut Dispatcher,
    ) {
        match self {
            Self::Synthesis => {
                output.clear(frames);
                dispatcher.synthesize(output, frames);
            }
            Self::Live(live) => {
                let frames = frames.min(live.raw_l.len());
                let raw_l = &mut live.raw_l[..frames];
                let raw_r = &mut live.raw_r[..frames];
                live.stream.read(raw_l, raw_r);

                if live.channels == 2 {
                    if live.stream.channels() < 2 {
                        raw_r.copy_from_slice(raw_l);
                    }
                    input.load_stereo(raw_l, raw_r);
                } else {
                    input.load_mono(raw_l);
                }

                output.clear(frames);
                dispatcher.deliver(input, output, frames);
            }
            Self::File(file) => {
                input.clear(frames);
                if let Some(transport) = file.transport.as_mut() {
                    transport.render(input, frames);
                }
                output.clear(frames);
                dispatcher.deliver(input, output, frames);
            }
        }
    }

    /// Stop whatever is producing audio; the handle is dropped afterwards
    pub(crate) fn stop(&mut self) {
        match self {
            Self::Synthesis => {}
            Self::Live(live) => live.stream.stop(),
            Self::File(file) => {
                if let Some(mut transport) = file.transport.take() {
                    transport.stop();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedStream {
        channels: usize,
        left: f32,
        right: f32,
        stopped: bool,
    }

    impl InputStream for FixedStream {
        fn channels(&self) -> usize {
            self.channels
        }

        fn read(&mut self, left: &mut [f32], right: &mut [f32]) -> usize {
            left.fill(self.left);
            if self.channels == 2 {
                right.fill(self.right);
            }
            left.len()
        }

        fn stop(&mut self) {
            self.stopped = true;
        }
    }

    fn stream(channels: usize, left: f32, right: f32) -> Box<dyn InputStream> {
        Box::new(FixedStream {
            channels,
            left,
            right,
            stopped: false,
        })
    }

    fn recording_dispatcher() -> (Dispatcher, Arc<std::sync::Mutex<Vec<(bool, f32)>>>) {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let dispatcher = Dispatcher::new(Box::new(
            move |input: Option<&InputAudioBlock>, output: &mut OutputAudioBlock, frames: usize| {
                let before = output.left()[..frames].iter().all(|&s| s == 0.0);
                log.lock()
                    .unwrap()
                    .push((before, input.map_or(f32::NAN, |i| i.mono()[0])));
                output.left_mut()[..frames].fill(0.9);
            },
        ));
        (dispatcher, seen)
    }

    #[test]
    fn test_kind_codes() {
        for kind in SourceKind::ALL {
            assert_eq!(SourceKind::try_from(kind.code()).unwrap(), *kind);
        }
        assert!(matches!(
            SourceKind::try_from(4),
            Err(AudioError::InvalidArgument(_))
        ));
        assert!(SourceKind::LiveStereo.is_live());
        assert!(!SourceKind::File.is_live());
        assert_eq!(SourceKind::LiveMono.live_channels(), Some(1));
        assert_eq!(SourceKind::Synthesis.live_channels(), None);
    }

    #[test]
    fn test_kind_serde_names() {
        let json = serde_json::to_string(&SourceKind::LiveStereo).unwrap();
        assert_eq!(json, "\"live_stereo\"");
        let kind: SourceKind = serde_json::from_str("\"file\"").unwrap();
        assert_eq!(kind, SourceKind::File);
    }

    #[test]
    fn test_synthesis_zeroes_output_first() {
        let (mut dispatcher, seen) = recording_dispatcher();
        let mut input = InputAudioBlock::new(4);
        let mut output = OutputAudioBlock::new(4);
        let mut source = SourceHandle::Synthesis;

        source.process(&mut input, &mut output, 4, &mut dispatcher);
        source.process(&mut input, &mut output, 4, &mut dispatcher);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|(zeroed, _)| *zeroed));
        assert!(seen[0].1.is_nan(), "synthesis must not pass input");
    }

    #[test]
    fn test_live_stereo_mix() {
        let (mut dispatcher, seen) = recording_dispatcher();
        let mut input = InputAudioBlock::new(4);
        let mut output = OutputAudioBlock::new(4);
        let mut source = SourceHandle::live(stream(2, 0.5, 0.25), 2, 4);
        assert_eq!(source.kind(), SourceKind::LiveStereo);

        source.process(&mut input, &mut output, 4, &mut dispatcher);
        assert_eq!(input.num_channels(), 2);
        assert_eq!(seen.lock().unwrap()[0], (true, 0.375));
    }

    #[test]
    fn test_live_stereo_from_mono_device() {
        let (mut dispatcher, _) = recording_dispatcher();
        let mut input = InputAudioBlock::new(2);
        let mut output = OutputAudioBlock::new(2);
        let mut source = SourceHandle::live(stream(1, 0.5, 0.0), 2, 2);

        source.process(&mut input, &mut output, 2, &mut dispatcher);
        assert_eq!(input.right(), input.left());
        assert_eq!(input.mono(), &[0.5, 0.5]);
    }

    #[test]
    fn test_live_mono_sanitizes() {
        let (mut dispatcher, _) = recording_dispatcher();
        let mut input = InputAudioBlock::new(3);
        let mut output = OutputAudioBlock::new(3);
        let mut source = SourceHandle::live(stream(1, f32::NAN, 0.0), 1, 3);

        source.process(&mut input, &mut output, 3, &mut dispatcher);
        assert_eq!(input.num_channels(), 1);
        assert_eq!(input.left(), &[0.0; 3]);
        assert_eq!(input.right(), input.left());
        assert_eq!(input.mono(), input.left());
    }

    #[test]
    fn test_file_without_transport_is_silent() {
        let (mut dispatcher, seen) = recording_dispatcher();
        let buffer = Arc::new(DecodedBuffer::new(48000, vec![vec![0.5; 16]]).unwrap());
        let mut transport = Transport::new(buffer, 48000, 4);
        transport.start(0);
        let mut source = SourceHandle::file(transport);

        let mut input = InputAudioBlock::new(4);
        let mut output = OutputAudioBlock::new(4);
        source.process(&mut input, &mut output, 4, &mut dispatcher);
        assert_eq!(input.mono(), &[0.5; 4]);

        source.stop();
        assert!(source.transport().is_none());
        source.process(&mut input, &mut output, 4, &mut dispatcher);
        assert_eq!(input.mono(), &[0.0; 4]);
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_descriptor_conversions() {
        assert!(matches!(SourceDescriptor::from("clip.wav"), SourceDescriptor::Path(_)));
        let buffer = DecodedBuffer::new(8000, vec![vec![0.0; 2]]).unwrap();
        assert!(matches!(SourceDescriptor::from(buffer), SourceDescriptor::Buffer(_)));
    }
}
