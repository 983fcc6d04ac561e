//! cpal hardware backend
//!
//! Output runs on the default (or a named) output device at its native
//! rate and channel count. Whatever buffer size the device picks, the
//! graph is still pulled in whole blocks through a [`BlockScheduler`].

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};

use super::{pull_block, AudioBackend, AudioContext, BlockScheduler, ContextState, InputStream};
use crate::audio::CpalInput;
use crate::error::AudioError;
use crate::graph::SharedGraph;

/// Default capture FIFO size in frames
pub const DEFAULT_INPUT_CAPACITY: usize = 8192;

/// Backend for the platform's default cpal host
pub struct CpalBackend {
    output_device: Option<String>,
    input_device: Option<String>,
    input_capacity_frames: usize,
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CpalBackend {
    pub fn new() -> Self {
        Self {
            output_device: None,
            input_device: None,
            input_capacity_frames: DEFAULT_INPUT_CAPACITY,
        }
    }

    /// Use the named output device instead of the default one
    pub fn with_output_device(mut self, name: Option<String>) -> Self {
        self.output_device = name;
        self
    }

    /// Use the named input device instead of the default one
    pub fn with_input_device(mut self, name: Option<String>) -> Self {
        self.input_device = name;
        self
    }

    pub fn with_input_capacity(mut self, frames: usize) -> Self {
        self.input_capacity_frames = frames.max(1);
        self
    }

    pub fn output_device(&self) -> Option<&str> {
        self.output_device.as_deref()
    }

    pub fn input_device(&self) -> Option<&str> {
        self.input_device.as_deref()
    }
}

impl AudioBackend for CpalBackend {
    fn name(&self) -> &str {
        "cpal"
    }

    fn create_context(&self, block_size: usize) -> Result<Arc<dyn AudioContext>, AudioError> {
        let context = CpalContext::open(self.output_device.as_deref(), block_size)?;
        Ok(Arc::new(context))
    }

    fn open_input(&self, channels: usize) -> Result<Box<dyn InputStream>, AudioError> {
        let input = CpalInput::open(
            self.input_device.as_deref(),
            channels,
            self.input_capacity_frames,
        )?;
        Ok(Box::new(input))
    }
}

/// State shared with the output callback
struct OutputShared {
    state: AtomicU8,
    graph: Mutex<Option<SharedGraph>>,
}

impl OutputShared {
    fn state(&self) -> ContextState {
        decode_state(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ContextState) {
        self.state.store(encode_state(state), Ordering::Release);
    }
}

fn encode_state(state: ContextState) -> u8 {
    match state {
        ContextState::Running => 0,
        ContextState::Suspended => 1,
        ContextState::Closed => 2,
    }
}

fn decode_state(raw: u8) -> ContextState {
    match raw {
        0 => ContextState::Running,
        1 => ContextState::Suspended,
        _ => ContextState::Closed,
    }
}

/// A running cpal output stream
///
/// Like capture streams, the output stream is parked on a keeper thread
/// because cpal streams are not `Send` everywhere.
pub struct CpalContext {
    sample_rate: u32,
    device_name: String,
    shared: Arc<OutputShared>,
    stop_tx: Mutex<Option<mpsc::Sender<()>>>,
    keeper: Mutex<Option<thread::JoinHandle<()>>>,
}

impl CpalContext {
    /// Open `device` (or the default output device) and start pulling blocks
    pub fn open(device: Option<&str>, block_size: usize) -> Result<Self, AudioError> {
        let shared = Arc::new(OutputShared {
            state: AtomicU8::new(encode_state(ContextState::Running)),
            graph: Mutex::new(None),
        });

        let wanted = device.map(str::to_string);
        let stream_shared = Arc::clone(&shared);
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<(u32, String), AudioError>>(1);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let keeper = thread::Builder::new()
            .name("blockio-output".into())
            .spawn(move || {
                let (stream, sample_rate, name) =
                    match start_output(wanted.as_deref(), block_size, stream_shared) {
                        Ok(started) => started,
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };
                let _ = ready_tx.send(Ok((sample_rate, name)));

                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| AudioError::Stream(e.to_string()))?;

        let (sample_rate, device_name) = match ready_rx.recv() {
            Ok(Ok(started)) => started,
            Ok(Err(e)) => {
                let _ = keeper.join();
                return Err(e);
            }
            Err(_) => {
                let _ = keeper.join();
                return Err(AudioError::Stream("output thread exited".to_string()));
            }
        };

        log::info!("Output running on {} at {} Hz", device_name, sample_rate);

        Ok(Self {
            sample_rate,
            device_name,
            shared,
            stop_tx: Mutex::new(Some(stop_tx)),
            keeper: Mutex::new(Some(keeper)),
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }
}

impl AudioContext for CpalContext {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn state(&self) -> ContextState {
        self.shared.state()
    }

    fn connect(&self, graph: SharedGraph) -> Result<(), AudioError> {
        if self.state() == ContextState::Closed {
            return Err(AudioError::Stream("context is closed".to_string()));
        }
        let mut slot = self
            .shared
            .graph
            .lock()
            .map_err(|_| AudioError::Stream("graph slot poisoned".to_string()))?;
        *slot = Some(graph);
        Ok(())
    }

    fn disconnect(&self) {
        if let Ok(mut slot) = self.shared.graph.lock() {
            *slot = None;
        }
    }

    fn suspend(&self) -> Result<(), AudioError> {
        match self.state() {
            ContextState::Closed => Err(AudioError::Stream("context is closed".to_string())),
            _ => {
                self.shared.set_state(ContextState::Suspended);
                log::debug!("Output suspended");
                Ok(())
            }
        }
    }

    fn resume(&self) -> Result<(), AudioError> {
        match self.state() {
            ContextState::Closed => Err(AudioError::Stream("context is closed".to_string())),
            _ => {
                self.shared.set_state(ContextState::Running);
                log::debug!("Output resumed");
                Ok(())
            }
        }
    }

    fn close(&self) {
        self.shared.set_state(ContextState::Closed);
        self.disconnect();

        let stop = self.stop_tx.lock().ok().and_then(|mut s| s.take());
        if let Some(stop) = stop {
            drop(stop);
            let keeper = self.keeper.lock().ok().and_then(|mut k| k.take());
            if let Some(keeper) = keeper {
                let _ = keeper.join();
            }
            log::info!("Output stopped: {}", self.device_name);
        }
    }
}

impl Drop for CpalContext {
    fn drop(&mut self) {
        self.close();
    }
}

/// Find the device, build and start the stream (runs on the keeper thread)
fn start_output(
    wanted: Option<&str>,
    block_size: usize,
    shared: Arc<OutputShared>,
) -> Result<(cpal::Stream, u32, String), AudioError> {
    let host = cpal::default_host();

    let device = match wanted {
        Some(name) => host
            .output_devices()
            .map_err(|e| AudioError::PlatformUnsupported(e.to_string()))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| {
                AudioError::PlatformUnsupported(format!("Output device not found: {}", name))
            })?,
        None => host.default_output_device().ok_or_else(|| {
            AudioError::PlatformUnsupported("No output device found".to_string())
        })?,
    };

    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    log::info!("Using output device: {}", device_name);

    let config = device
        .default_output_config()
        .map_err(|e| AudioError::PlatformUnsupported(e.to_string()))?;

    log::info!("Output config: {:?}", config);

    let sample_rate = config.sample_rate().0;
    let stream_config: cpal::StreamConfig = config.config();

    let stream = match config.sample_format() {
        cpal::SampleFormat::F32 => build_output::<f32>(&device, &stream_config, block_size, shared),
        cpal::SampleFormat::I16 => build_output::<i16>(&device, &stream_config, block_size, shared),
        cpal::SampleFormat::U16 => build_output::<u16>(&device, &stream_config, block_size, shared),
        format => {
            return Err(AudioError::Stream(format!(
                "Unsupported format: {:?}",
                format
            )))
        }
    }?;

    stream
        .play()
        .map_err(|e| AudioError::Stream(e.to_string()))?;

    Ok((stream, sample_rate, device_name))
}

fn build_output<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    block_size: usize,
    shared: Arc<OutputShared>,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    let mut scheduler = BlockScheduler::new(block_size);
    let mut scratch: Vec<f32> = Vec::new();
    let error_shared = Arc::clone(&shared);

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                if scratch.len() < data.len() {
                    scratch.resize(data.len(), 0.0);
                }
                let out = &mut scratch[..data.len()];

                if shared.state() == ContextState::Running {
                    // Never wait on the control path from here
                    let graph = shared
                        .graph
                        .try_lock()
                        .ok()
                        .and_then(|slot| slot.as_ref().cloned());
                    scheduler.fill_interleaved(out, channels, |l, r| {
                        pull_block(graph.as_ref(), l, r)
                    });
                } else {
                    out.fill(0.0);
                }

                for (dst, &src) in data.iter_mut().zip(out.iter()) {
                    *dst = T::from_sample(src);
                }
            },
            move |err| {
                log::error!("Audio output error: {}", err);
                error_shared.set_state(ContextState::Closed);
            },
            None,
        )
        .map_err(|e| AudioError::Stream(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_encoding() {
        for state in [
            ContextState::Running,
            ContextState::Suspended,
            ContextState::Closed,
        ] {
            assert_eq!(decode_state(encode_state(state)), state);
        }
        assert_eq!(decode_state(200), ContextState::Closed);
    }

    #[test]
    fn test_backend_builder() {
        let backend = CpalBackend::new()
            .with_output_device(Some("Speakers".to_string()))
            .with_input_device(None)
            .with_input_capacity(0);
        assert_eq!(backend.name(), "cpal");
        assert_eq!(backend.output_device(), Some("Speakers"));
        assert_eq!(backend.input_device(), None);
        assert_eq!(backend.input_capacity_frames, 1);
    }
}
