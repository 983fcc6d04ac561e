//! Audio module - sample buffers, capture and file playback
//!
//! This module provides:
//! - Canonical per-block input/output buffers and sample sanitizing
//! - Lock-free frame FIFO for device input
//! - Audio input capture
//! - Audio file decoding and a playback transport

mod block;
mod fifo;
mod file;
mod input;
mod transport;

pub use block::{sanitize, InputAudioBlock, OutputAudioBlock, DENORMAL_FLOOR, GARBAGE_CEILING};
pub use fifo::{frame_fifo, FrameConsumer, FrameProducer};
pub use file::{decode_file, DecodedBuffer, FileError};
pub use input::{input_device_names, CpalInput};
pub use transport::{PlaybackState, Transport};
