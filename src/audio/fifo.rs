//! Lock-free frame FIFO between a device input callback and the block path
//!
//! Input devices deliver audio in whatever chunk sizes they like on their
//! own thread; the processing node wants exactly one block at a time on the
//! output thread. This SPSC ring (via `ringbuf`) bridges the two without
//! locks:
//! - the device callback is the single producer (pushes frames)
//! - the live source handler is the single consumer (reads whole blocks)
//!
//! Frames are stored interleaved with 1 or 2 channels. A full ring drops
//! new frames (overrun); an empty ring yields silence (underrun). Both are
//! counted so callers can report glitches.

use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapRb,
};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

#[derive(Debug, Default)]
struct FifoStats {
    frames_written: AtomicU64,
    overruns: AtomicU64,
    underruns: AtomicU64,
}

/// Create a FIFO holding up to `capacity_frames` frames of `channels` channels
pub fn frame_fifo(channels: usize, capacity_frames: usize) -> (FrameProducer, FrameConsumer) {
    let channels = channels.clamp(1, 2);
    let rb = HeapRb::<f32>::new(capacity_frames.max(1) * channels);
    let (prod, cons) = rb.split();
    let stats = Arc::new(FifoStats::default());

    (
        FrameProducer {
            producer: prod,
            channels,
            stats: Arc::clone(&stats),
        },
        FrameConsumer {
            consumer: cons,
            channels,
            stats,
        },
    )
}

/// Producer half (owned by the device callback)
pub struct FrameProducer {
    producer: ringbuf::HeapProd<f32>,
    channels: usize,
    stats: Arc<FifoStats>,
}

impl FrameProducer {
    /// Push one frame. The right sample is ignored for mono FIFOs.
    ///
    /// Drops the frame when the ring is full; never blocks.
    #[inline]
    pub fn push_frame(&mut self, left: f32, right: f32) {
        if self.producer.vacant_len() < self.channels {
            self.stats.overruns.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let _ = self.producer.try_push(left);
        if self.channels == 2 {
            let _ = self.producer.try_push(right);
        }
        self.stats.frames_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn channels(&self) -> usize {
        self.channels
    }
}

/// Consumer half (owned by the live source handler)
pub struct FrameConsumer {
    consumer: ringbuf::HeapCons<f32>,
    channels: usize,
    stats: Arc<FifoStats>,
}

impl FrameConsumer {
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Frames currently buffered
    pub fn available(&self) -> usize {
        self.consumer.occupied_len() / self.channels
    }

    /// Fill `left` (and `right` for stereo FIFOs) with the oldest frames
    ///
    /// Returns how many frames came from the ring; the remainder of the
    /// buffers is zero-filled. For mono FIFOs `right` is left untouched.
    pub fn read_block(&mut self, left: &mut [f32], right: &mut [f32]) -> usize {
        let frames = if self.channels == 2 {
            left.len().min(right.len())
        } else {
            left.len()
        };

        let mut read = 0;
        while read < frames {
            let Some(l) = self.consumer.try_pop() else {
                break;
            };
            left[read] = l;
            if self.channels == 2 {
                right[read] = self.consumer.try_pop().unwrap_or(0.0);
            }
            read += 1;
        }

        if read < frames {
            left[read..frames].fill(0.0);
            if self.channels == 2 {
                right[read..frames].fill(0.0);
            }
            self.stats.underruns.fetch_add(1, Ordering::Relaxed);
        }

        read
    }

    pub fn frames_written(&self) -> u64 {
        self.stats.frames_written.load(Ordering::Relaxed)
    }

    pub fn overruns(&self) -> u64 {
        self.stats.overruns.load(Ordering::Relaxed)
    }

    pub fn underruns(&self) -> u64 {
        self.stats.underruns.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stereo_frames_in_order() {
        let (mut prod, mut cons) = frame_fifo(2, 8);

        prod.push_frame(0.1, -0.1);
        prod.push_frame(0.2, -0.2);
        prod.push_frame(0.3, -0.3);
        assert_eq!(cons.available(), 3);

        let mut l = [9.0; 2];
        let mut r = [9.0; 2];
        assert_eq!(cons.read_block(&mut l, &mut r), 2);
        assert_eq!(l, [0.1, 0.2]);
        assert_eq!(r, [-0.1, -0.2]);
        assert_eq!(cons.available(), 1);
    }

    #[test]
    fn test_underrun_zero_fills() {
        let (mut prod, mut cons) = frame_fifo(2, 8);
        prod.push_frame(0.5, 0.25);

        let mut l = [9.0; 3];
        let mut r = [9.0; 3];
        assert_eq!(cons.read_block(&mut l, &mut r), 1);
        assert_eq!(l, [0.5, 0.0, 0.0]);
        assert_eq!(r, [0.25, 0.0, 0.0]);
        assert_eq!(cons.underruns(), 1);
    }

    #[test]
    fn test_overrun_drops_new_frames() {
        let (mut prod, mut cons) = frame_fifo(1, 2);
        prod.push_frame(1.0, 0.0);
        prod.push_frame(2.0, 0.0);
        prod.push_frame(3.0, 0.0);

        assert_eq!(cons.overruns(), 1);
        assert_eq!(cons.frames_written(), 2);

        let mut l = [0.0; 2];
        let mut r = [7.0; 2];
        cons.read_block(&mut l, &mut r);
        assert_eq!(l, [1.0, 2.0]);
        // mono FIFO never touches the right buffer
        assert_eq!(r, [7.0, 7.0]);
    }
}
