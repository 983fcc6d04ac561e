//! Playback transport over a decoded buffer
//!
//! The transport is the read cursor for file sources. It renders exactly
//! one block at a time into the canonical input block and keeps its state
//! (position, play/pause, looping) between blocks. When the buffer was
//! decoded at a different rate than the running context, the cursor steps
//! fractionally with linear interpolation so the clip keeps its pitch.

use std::sync::Arc;

use super::block::InputAudioBlock;
use super::file::DecodedBuffer;

/// Playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

/// Cursor and transport state for one decoded buffer
pub struct Transport {
    buffer: Arc<DecodedBuffer>,

    /// Read position in source frames (fractional when resampling)
    position: f64,

    /// Source frames advanced per output frame
    step: f64,

    state: PlaybackState,

    /// Wrap to the start instead of stopping at the end
    pub looping: bool,

    /// Per-block scratch so rendering never allocates
    scratch_l: Vec<f32>,
    scratch_r: Vec<f32>,
}

impl Transport {
    /// Create a stopped transport for `buffer` feeding a context at `output_rate`
    pub fn new(buffer: Arc<DecodedBuffer>, output_rate: u32, block_size: usize) -> Self {
        let step = if output_rate == 0 {
            1.0
        } else {
            buffer.sample_rate() as f64 / output_rate as f64
        };

        Self {
            buffer,
            position: 0.0,
            step,
            state: PlaybackState::Stopped,
            looping: false,
            scratch_l: vec![0.0; block_size],
            scratch_r: vec![0.0; block_size],
        }
    }

    /// 1 for mono clips, 2 for anything wider
    pub fn num_channels(&self) -> usize {
        if self.buffer.num_channels() > 1 {
            2
        } else {
            1
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    /// Current position in whole source frames
    pub fn position(&self) -> u64 {
        self.position as u64
    }

    /// Current position as fraction (0.0 - 1.0)
    pub fn position_fraction(&self) -> f32 {
        (self.position / self.buffer.frames() as f64).clamp(0.0, 1.0) as f32
    }

    /// Start playing from `frame`
    pub fn start(&mut self, frame: u64) {
        self.seek(frame);
        self.state = PlaybackState::Playing;
    }

    /// Stop and rewind
    pub fn stop(&mut self) {
        self.state = PlaybackState::Stopped;
        self.position = 0.0;
    }

    pub fn pause(&mut self) {
        if self.state == PlaybackState::Playing {
            self.state = PlaybackState::Paused;
        }
    }

    pub fn resume(&mut self) {
        if self.state == PlaybackState::Paused {
            self.state = PlaybackState::Playing;
        }
    }

    /// Move the cursor, clamped to the end of the buffer
    pub fn seek(&mut self, frame: u64) {
        self.position = (frame as f64).min(self.buffer.frames() as f64);
    }

    /// Render `frames` samples into `input`
    ///
    /// Anything not produced (paused, stopped, past the end) is silence.
    pub fn render(&mut self, input: &mut InputAudioBlock, frames: usize) {
        let frames = frames.min(self.scratch_l.len());
        let stereo = self.num_channels() == 2;

        let mut produced = 0;
        if self.state == PlaybackState::Playing {
            let left = self.buffer.channel(0).unwrap_or(&[]);
            let right = if stereo {
                self.buffer.channel(1).unwrap_or(left)
            } else {
                left
            };
            let len = left.len();

            while produced < frames {
                if self.position >= len as f64 {
                    if self.looping && len > 0 {
                        // A step longer than the clip can overshoot by several lengths
                        self.position %= len as f64;
                    } else {
                        self.state = PlaybackState::Stopped;
                        self.position = len as f64;
                        break;
                    }
                }

                let idx = (self.position as usize).min(len - 1);
                let frac = (self.position - idx as f64) as f32;
                let next = if idx + 1 < len {
                    idx + 1
                } else if self.looping {
                    0
                } else {
                    idx
                };

                self.scratch_l[produced] = left[idx] + (left[next] - left[idx]) * frac;
                self.scratch_r[produced] = right[idx] + (right[next] - right[idx]) * frac;

                self.position += self.step;
                produced += 1;
            }
        }

        self.scratch_l[produced..frames].fill(0.0);
        self.scratch_r[produced..frames].fill(0.0);

        if stereo {
            input.load_stereo(&self.scratch_l[..frames], &self.scratch_r[..frames]);
        } else {
            input.load_mono(&self.scratch_l[..frames]);
        }
    }
}
