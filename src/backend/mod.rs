//! Platform audio backends
//!
//! The session never talks to an audio API directly. It asks an
//! [`AudioBackend`] for two things:
//!
//! - an [`AudioContext`]: a running output stream at a fixed block size
//!   that pulls one block at a time from whatever graph is connected to it
//! - an [`InputStream`]: a live capture device delivering 1 or 2 channels
//!
//! [`cpal_backend`] drives real hardware; [`offline`] renders on demand
//! for headless use and tests.

pub mod cpal_backend;
pub mod offline;

use std::sync::Arc;

use crate::error::AudioError;
use crate::graph::SharedGraph;

pub use cpal_backend::CpalBackend;
pub use offline::{OfflineBackend, OfflineContext};

/// Lifecycle state of an audio context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Running,
    /// Alive but not pulling blocks; resumable
    Suspended,
    /// Terminal; a new context must be created
    Closed,
}

/// A live audio processing context (device clock + output routing)
pub trait AudioContext: Send + Sync {
    /// Native sample rate of the context
    fn sample_rate(&self) -> u32;

    fn state(&self) -> ContextState;

    /// Route `graph` to the context destination. Replaces any previous graph.
    fn connect(&self, graph: SharedGraph) -> Result<(), AudioError>;

    /// Stop pulling from the connected graph; the device plays silence
    fn disconnect(&self);

    fn suspend(&self) -> Result<(), AudioError>;

    fn resume(&self) -> Result<(), AudioError>;

    /// Release the device. Idempotent.
    fn close(&self);
}

/// A live input device stream
pub trait InputStream: Send {
    /// Channels delivered by [`read`](Self::read), 1 or 2
    fn channels(&self) -> usize;

    /// Fill `left` (and `right` when stereo) with the next frames
    ///
    /// Returns how many frames were actually available; the remainder is
    /// zero-filled. Must not block.
    fn read(&mut self, left: &mut [f32], right: &mut [f32]) -> usize;

    /// Stop capturing. Called when the source is torn down.
    fn stop(&mut self) {}
}

/// Factory for contexts and input streams
pub trait AudioBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Create a new context producing `block_size`-frame blocks
    ///
    /// Fails with [`AudioError::PlatformUnsupported`] when no output is
    /// available at all.
    fn create_context(&self, block_size: usize) -> Result<Arc<dyn AudioContext>, AudioError>;

    /// Open the capture device with `channels` (1 or 2) channels
    ///
    /// May block (permission prompts, device start-up); the session only
    /// calls this from a worker thread. Fails with
    /// [`AudioError::DeviceAcquisitionFailed`].
    fn open_input(&self, channels: usize) -> Result<Box<dyn InputStream>, AudioError>;
}

/// Adapts the fixed processing block size to arbitrary device buffer sizes
///
/// Devices ask for however many frames they want per callback. The
/// scheduler keeps one rendered block staged and hands it out frame by
/// frame, pulling a fresh block whenever the staged one runs out.
pub struct BlockScheduler {
    left: Vec<f32>,
    right: Vec<f32>,
    cursor: usize,
}

impl BlockScheduler {
    pub fn new(block_size: usize) -> Self {
        let block_size = block_size.max(1);
        Self {
            left: vec![0.0; block_size],
            right: vec![0.0; block_size],
            cursor: block_size,
        }
    }

    pub fn block_size(&self) -> usize {
        self.left.len()
    }

    /// Fill an interleaved device buffer with `channels` channels
    ///
    /// `pull` renders one full block into the given left/right buffers.
    /// Mono devices get `(L + R) / 2`; channels past the second are silent.
    pub fn fill_interleaved<F>(&mut self, data: &mut [f32], channels: usize, mut pull: F)
    where
        F: FnMut(&mut [f32], &mut [f32]),
    {
        if channels == 0 {
            return;
        }

        for frame in data.chunks_mut(channels) {
            if self.cursor >= self.left.len() {
                pull(&mut self.left, &mut self.right);
                self.cursor = 0;
            }

            let left = self.left[self.cursor];
            let right = self.right[self.cursor];
            self.cursor += 1;

            if channels >= 2 {
                frame[0] = left;
                frame[1] = right;
                for ch in frame.iter_mut().skip(2) {
                    *ch = 0.0;
                }
            } else {
                frame[0] = (left + right) / 2.0;
            }
        }
    }
}

/// Render one block from `graph` into device buffers without blocking
///
/// If the graph is busy (a source switch is in progress) the block is
/// silent rather than waiting on the control path.
pub(crate) fn pull_block(graph: Option<&SharedGraph>, left: &mut [f32], right: &mut [f32]) {
    match graph.map(|g| g.try_lock()) {
        Some(Ok(mut graph)) => graph.render_into(left, right),
        _ => {
            left.fill(0.0);
            right.fill(0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_pulls_whole_blocks() {
        let mut scheduler = BlockScheduler::new(4);
        let mut pulls = 0;
        let mut data = [0.0f32; 12];

        // 6 stereo frames from 4-frame blocks: two pulls
        scheduler.fill_interleaved(&mut data, 2, |l, r| {
            pulls += 1;
            for (i, (l, r)) in l.iter_mut().zip(r.iter_mut()).enumerate() {
                *l = i as f32;
                *r = -(i as f32);
            }
        });

        assert_eq!(pulls, 2);
        assert_eq!(&data[..8], &[0.0, -0.0, 1.0, -1.0, 2.0, -2.0, 3.0, -3.0]);
        assert_eq!(&data[8..], &[0.0, -0.0, 1.0, -1.0]);
    }

    #[test]
    fn test_scheduler_carries_partial_block() {
        let mut scheduler = BlockScheduler::new(4);
        let mut counter = 0.0;
        let mut pull = |l: &mut [f32], r: &mut [f32]| {
            for (l, r) in l.iter_mut().zip(r.iter_mut()) {
                *l = counter;
                *r = counter;
                counter += 1.0;
            }
        };

        let mut first = [0.0f32; 3];
        scheduler.fill_interleaved(&mut first, 1, &mut pull);
        let mut second = [0.0f32; 3];
        scheduler.fill_interleaved(&mut second, 1, &mut pull);

        assert_eq!(first, [0.0, 1.0, 2.0]);
        assert_eq!(second, [3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_scheduler_mono_and_wide_devices() {
        let mut scheduler = BlockScheduler::new(2);
        let mut mono = [0.0f32; 2];
        scheduler.fill_interleaved(&mut mono, 1, |l, r| {
            l.fill(0.5);
            r.fill(0.25);
        });
        assert_eq!(mono, [0.375, 0.375]);

        let mut scheduler = BlockScheduler::new(2);
        let mut quad = [9.0f32; 8];
        scheduler.fill_interleaved(&mut quad, 4, |l, r| {
            l.fill(0.5);
            r.fill(0.25);
        });
        assert_eq!(quad, [0.5, 0.25, 0.0, 0.0, 0.5, 0.25, 0.0, 0.0]);
    }

    #[test]
    fn test_pull_block_without_graph_is_silent() {
        let mut l = [1.0f32; 4];
        let mut r = [1.0f32; 4];
        pull_block(None, &mut l, &mut r);
        assert_eq!(l, [0.0; 4]);
        assert_eq!(r, [0.0; 4]);
    }
}
