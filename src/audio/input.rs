//! Audio input capture
//!
//! This module handles capturing audio from input devices (microphones,
//! line inputs) with cpal. Captured frames go into a lock-free FIFO that the
//! live source handler drains one block at a time.

use std::sync::mpsc;
use std::thread;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};

use super::fifo::{frame_fifo, FrameConsumer, FrameProducer};
use crate::backend::InputStream;
use crate::error::AudioError;

/// Names of the input devices on the default host
pub fn input_device_names() -> Vec<String> {
    let host = cpal::default_host();
    host.input_devices()
        .map(|devices| devices.filter_map(|d| d.name().ok()).collect())
        .unwrap_or_default()
}

/// A running cpal capture stream
///
/// cpal streams are not `Send` on every platform, so the stream itself
/// lives on a small keeper thread; this handle owns the FIFO consumer and
/// the means to stop that thread.
pub struct CpalInput {
    consumer: FrameConsumer,
    device_name: String,
    stop_tx: Option<mpsc::Sender<()>>,
    keeper: Option<thread::JoinHandle<()>>,
}

impl CpalInput {
    /// Open `device` (or the default input device) delivering `channels` channels
    pub fn open(
        device: Option<&str>,
        channels: usize,
        capacity_frames: usize,
    ) -> Result<Self, AudioError> {
        let (producer, consumer) = frame_fifo(channels, capacity_frames);
        let wanted = device.map(str::to_string);

        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<String, AudioError>>(1);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let keeper = thread::Builder::new()
            .name("blockio-input".into())
            .spawn(move || {
                let (stream, name) = match start_capture(wanted.as_deref(), producer) {
                    Ok(started) => started,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(name));

                // Returns once the handle is stopped or dropped
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| AudioError::DeviceAcquisitionFailed(e.to_string()))?;

        let device_name = match ready_rx.recv() {
            Ok(Ok(name)) => name,
            Ok(Err(e)) => {
                let _ = keeper.join();
                return Err(e);
            }
            Err(_) => {
                let _ = keeper.join();
                return Err(AudioError::DeviceAcquisitionFailed(
                    "capture thread exited".to_string(),
                ));
            }
        };

        log::info!("Capturing from {} ({} channel(s))", device_name, consumer.channels());

        Ok(Self {
            consumer,
            device_name,
            stop_tx: Some(stop_tx),
            keeper: Some(keeper),
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    fn shutdown(&mut self) {
        if let Some(stop) = self.stop_tx.take() {
            drop(stop);
            if let Some(keeper) = self.keeper.take() {
                let _ = keeper.join();
            }
            log::info!(
                "Capture stopped: {} ({} frames, {} overruns, {} underruns)",
                self.device_name,
                self.consumer.frames_written(),
                self.consumer.overruns(),
                self.consumer.underruns()
            );
        }
    }
}

impl InputStream for CpalInput {
    fn channels(&self) -> usize {
        self.consumer.channels()
    }

    fn read(&mut self, left: &mut [f32], right: &mut [f32]) -> usize {
        self.consumer.read_block(left, right)
    }

    fn stop(&mut self) {
        self.shutdown();
    }
}

impl Drop for CpalInput {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Find the device, build and start the stream (runs on the keeper thread)
fn start_capture(
    wanted: Option<&str>,
    producer: FrameProducer,
) -> Result<(cpal::Stream, String), AudioError> {
    let host = cpal::default_host();

    let device = match wanted {
        Some(name) => host
            .input_devices()
            .map_err(|e| AudioError::DeviceAcquisitionFailed(e.to_string()))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| {
                AudioError::DeviceAcquisitionFailed(format!("Input device not found: {}", name))
            })?,
        None => host.default_input_device().ok_or_else(|| {
            AudioError::DeviceAcquisitionFailed("No input device found".to_string())
        })?,
    };

    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    log::info!("Using input device: {}", device_name);

    let config = device
        .default_input_config()
        .map_err(|e| AudioError::DeviceAcquisitionFailed(e.to_string()))?;

    log::info!("Input config: {:?}", config);

    let device_channels = config.channels() as usize;
    let stream_config: cpal::StreamConfig = config.config();

    let stream = match config.sample_format() {
        cpal::SampleFormat::F32 => {
            build_capture::<f32>(&device, &stream_config, device_channels, producer)
        }
        cpal::SampleFormat::I16 => {
            build_capture::<i16>(&device, &stream_config, device_channels, producer)
        }
        cpal::SampleFormat::U16 => {
            build_capture::<u16>(&device, &stream_config, device_channels, producer)
        }
        format => {
            return Err(AudioError::DeviceAcquisitionFailed(format!(
                "Unsupported format: {:?}",
                format
            )))
        }
    }?;

    stream
        .play()
        .map_err(|e| AudioError::DeviceAcquisitionFailed(e.to_string()))?;

    Ok((stream, device_name))
}

fn build_capture<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    device_channels: usize,
    mut producer: FrameProducer,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                for frame in data.chunks(device_channels) {
                    let left = frame[0].to_sample::<f32>();
                    let right = if device_channels > 1 {
                        frame[1].to_sample::<f32>()
                    } else {
                        left
                    };
                    producer.push_frame(left, right);
                }
            },
            |err| log::error!("Audio input error: {}", err),
            None,
        )
        .map_err(|e| AudioError::DeviceAcquisitionFailed(e.to_string()))
}
