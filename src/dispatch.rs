//! Callback dispatch
//!
//! The user's processing code sees one call per block with the canonical
//! buffers, whatever source is active. Synthesis blocks carry no input.

use crate::audio::{InputAudioBlock, OutputAudioBlock};

/// Per-block processing hook
///
/// Runs on the audio thread: it must not block, and must not hold on to the
/// buffers after returning (they are reused for the next block).
pub trait BlockProcessor: Send + 'static {
    /// Called whenever a context is (re)created, before its first block
    fn setup(&mut self, _sample_rate: u32) {}

    /// Process one block of `frames` samples
    ///
    /// `input` is `None` for synthesis. `output` arrives zeroed.
    fn process(
        &mut self,
        input: Option<&InputAudioBlock>,
        output: &mut OutputAudioBlock,
        frames: usize,
    );
}

impl<F> BlockProcessor for F
where
    F: FnMut(Option<&InputAudioBlock>, &mut OutputAudioBlock, usize) + Send + 'static,
{
    fn process(
        &mut self,
        input: Option<&InputAudioBlock>,
        output: &mut OutputAudioBlock,
        frames: usize,
    ) {
        self(input, output, frames)
    }
}

/// A processing closure paired with a separate setup closure
pub struct WithSetup<P, S> {
    process: P,
    setup: S,
}

impl<P, S> WithSetup<P, S>
where
    P: FnMut(Option<&InputAudioBlock>, &mut OutputAudioBlock, usize) + Send + 'static,
    S: FnMut(u32) + Send + 'static,
{
    pub fn new(process: P, setup: S) -> Self {
        Self { process, setup }
    }
}

impl<P, S> BlockProcessor for WithSetup<P, S>
where
    P: FnMut(Option<&InputAudioBlock>, &mut OutputAudioBlock, usize) + Send + 'static,
    S: FnMut(u32) + Send + 'static,
{
    fn setup(&mut self, sample_rate: u32) {
        (self.setup)(sample_rate)
    }

    fn process(
        &mut self,
        input: Option<&InputAudioBlock>,
        output: &mut OutputAudioBlock,
        frames: usize,
    ) {
        (self.process)(input, output, frames)
    }
}

/// Owns the user processor and counts delivered blocks
pub(crate) struct Dispatcher {
    processor: Box<dyn BlockProcessor>,
    blocks: u64,
}

impl Dispatcher {
    pub(crate) fn new(processor: Box<dyn BlockProcessor>) -> Self {
        Self {
            processor,
            blocks: 0,
        }
    }

    pub(crate) fn setup(&mut self, sample_rate: u32) {
        self.processor.setup(sample_rate);
    }

    /// Deliver a synthesis block (no input)
    pub(crate) fn synthesize(&mut self, output: &mut OutputAudioBlock, frames: usize) {
        self.blocks += 1;
        self.processor.process(None, output, frames);
    }

    /// Deliver a block with input
    pub(crate) fn deliver(
        &mut self,
        input: &InputAudioBlock,
        output: &mut OutputAudioBlock,
        frames: usize,
    ) {
        self.blocks += 1;
        self.processor.process(Some(input), output, frames);
    }

    pub(crate) fn blocks(&self) -> u64 {
        self.blocks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_closure_processor() {
        let mut dispatcher = Dispatcher::new(Box::new(
            |input: Option<&InputAudioBlock>, output: &mut OutputAudioBlock, frames: usize| {
                let gain = if input.is_some() { 0.5 } else { 0.25 };
                output.left_mut()[..frames].fill(gain);
            },
        ));

        let mut output = OutputAudioBlock::new(4);
        dispatcher.synthesize(&mut output, 4);
        assert_eq!(output.left(), &[0.25; 4]);

        let input = InputAudioBlock::new(4);
        dispatcher.deliver(&input, &mut output, 2);
        assert_eq!(output.left(), &[0.5, 0.5, 0.25, 0.25]);
        assert_eq!(dispatcher.blocks(), 2);
    }

    #[test]
    fn test_with_setup_receives_rate() {
        let rate = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&rate);
        let mut dispatcher = Dispatcher::new(Box::new(WithSetup::new(
            |_: Option<&InputAudioBlock>, _: &mut OutputAudioBlock, _: usize| {},
            move |sr| seen.store(sr, Ordering::Relaxed),
        )));

        dispatcher.setup(44100);
        assert_eq!(rate.load(Ordering::Relaxed), 44100);
    }
}
