//! Canonical per-block buffers
//!
//! Every source, whatever it reads from, ends up filling the same two
//! records: an [`InputAudioBlock`] (mono mix plus left/right) and an
//! [`OutputAudioBlock`] (writable left/right). Both are allocated once at
//! the session's block size and overwritten on every block, so the audio
//! thread never allocates.
//!
//! Raw samples coming from hardware or a decoder are copied in, never
//! aliased, and pass through [`sanitize`] on the way.

/// Magnitudes at or below this are flushed to zero (denormals)
pub const DENORMAL_FLOOR: f32 = 1e-15;

/// Magnitudes at or above this are treated as garbage and zeroed
pub const GARBAGE_CEILING: f32 = 1e15;

/// Sanitize a single raw input sample
///
/// NaN, infinities, absurdly large values and denormal-range values become
/// `0.0`; everything else is clamped to `[-1.0, 1.0]`.
#[inline]
pub fn sanitize(x: f32) -> f32 {
    let magnitude = x.abs();
    if magnitude > DENORMAL_FLOOR && magnitude < GARBAGE_CEILING {
        x.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

/// Normalized input for one block
///
/// Read-only for the processing callback. Do not keep references past the
/// callback's return: the same storage is reused for the next block.
#[derive(Debug, Clone)]
pub struct InputAudioBlock {
    mono: Vec<f32>,
    left: Vec<f32>,
    right: Vec<f32>,
    num_channels: usize,
}

impl InputAudioBlock {
    pub fn new(block_size: usize) -> Self {
        Self {
            mono: vec![0.0; block_size],
            left: vec![0.0; block_size],
            right: vec![0.0; block_size],
            num_channels: 1,
        }
    }

    /// Allocated length (the session block size)
    pub fn capacity(&self) -> usize {
        self.mono.len()
    }

    /// Channel count of the source feeding this block, 1 or 2
    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    pub fn mono(&self) -> &[f32] {
        &self.mono
    }

    pub fn left(&self) -> &[f32] {
        &self.left
    }

    /// Right channel; identical to [`left`](Self::left) for mono sources
    pub fn right(&self) -> &[f32] {
        &self.right
    }

    pub(crate) fn set_num_channels(&mut self, channels: usize) {
        self.num_channels = if channels >= 2 { 2 } else { 1 };
    }

    /// Zero the first `frames` samples of all three sequences
    pub(crate) fn clear(&mut self, frames: usize) {
        let n = frames.min(self.capacity());
        self.mono[..n].fill(0.0);
        self.left[..n].fill(0.0);
        self.right[..n].fill(0.0);
    }

    /// Load a single raw channel; left, right and mono all carry it
    pub(crate) fn load_mono(&mut self, raw: &[f32]) {
        let n = raw.len().min(self.capacity());
        for (i, &x) in raw[..n].iter().enumerate() {
            let s = sanitize(x);
            self.left[i] = s;
            self.right[i] = s;
            self.mono[i] = s;
        }
        self.num_channels = 1;
    }

    /// Load two raw channels and compute the mono mix from the sanitized values
    pub(crate) fn load_stereo(&mut self, raw_left: &[f32], raw_right: &[f32]) {
        let n = raw_left.len().min(raw_right.len()).min(self.capacity());
        for i in 0..n {
            let l = sanitize(raw_left[i]);
            let r = sanitize(raw_right[i]);
            self.left[i] = l;
            self.right[i] = r;
            self.mono[i] = (l + r) * 0.5;
        }
        self.num_channels = 2;
    }
}

/// Writable output for one block
///
/// Zeroed before every callback invocation. Whatever the callback leaves in
/// the first `frames` samples is sent to the device.
#[derive(Debug, Clone)]
pub struct OutputAudioBlock {
    left: Vec<f32>,
    right: Vec<f32>,
}

impl OutputAudioBlock {
    pub fn new(block_size: usize) -> Self {
        Self {
            left: vec![0.0; block_size],
            right: vec![0.0; block_size],
        }
    }

    pub fn capacity(&self) -> usize {
        self.left.len()
    }

    pub fn left(&self) -> &[f32] {
        &self.left
    }

    pub fn right(&self) -> &[f32] {
        &self.right
    }

    pub fn left_mut(&mut self) -> &mut [f32] {
        &mut self.left
    }

    pub fn right_mut(&mut self) -> &mut [f32] {
        &mut self.right
    }

    /// Both channels at once, for callbacks writing left and right together
    pub fn channels_mut(&mut self) -> (&mut [f32], &mut [f32]) {
        (&mut self.left, &mut self.right)
    }

    pub(crate) fn clear(&mut self, frames: usize) {
        let n = frames.min(self.capacity());
        self.left[..n].fill(0.0);
        self.right[..n].fill(0.0);
    }

    /// Copy the first `left.len()` frames out to device buffers
    pub(crate) fn copy_to(&self, left: &mut [f32], right: &mut [f32]) {
        let n = left.len().min(right.len()).min(self.capacity());
        left[..n].copy_from_slice(&self.left[..n]);
        right[..n].copy_from_slice(&self.right[..n]);
    }
}
