//! The processing graph pulled by the audio context
//!
//! A graph holds at most one processing node (the attached source), the
//! reusable canonical buffers and the dispatcher. Contexts pull blocks out
//! of it; the session swaps nodes in and out between blocks. Both sides go
//! through the same mutex, so a block is never rendered by a node that is
//! halfway torn down. The audio side only ever `try_lock`s.

use std::sync::{Arc, Mutex};

use crate::audio::{InputAudioBlock, OutputAudioBlock, Transport};
use crate::dispatch::{BlockProcessor, Dispatcher};
use crate::source::{SourceHandle, SourceKind};

/// Graph shared between the session and a context
pub type SharedGraph = Arc<Mutex<Graph>>;

/// One attached source, tagged with the switch that attached it
pub(crate) struct ProcessNode {
    generation: u64,
    source: SourceHandle,
}

impl ProcessNode {
    pub(crate) fn new(generation: u64, source: SourceHandle) -> Self {
        Self { generation, source }
    }

    pub(crate) fn kind(&self) -> SourceKind {
        self.source.kind()
    }
}

pub struct Graph {
    block_size: usize,
    node: Option<ProcessNode>,
    input: InputAudioBlock,
    output: OutputAudioBlock,
    dispatcher: Dispatcher,
    silent_blocks: u64,
}

impl Graph {
    pub(crate) fn new(block_size: usize, processor: Box<dyn BlockProcessor>) -> Self {
        Self {
            block_size,
            node: None,
            input: InputAudioBlock::new(block_size),
            output: OutputAudioBlock::new(block_size),
            dispatcher: Dispatcher::new(processor),
            silent_blocks: 0,
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn is_attached(&self) -> bool {
        self.node.is_some()
    }

    /// Kind of the attached source
    pub fn active_kind(&self) -> Option<SourceKind> {
        self.node.as_ref().map(ProcessNode::kind)
    }

    /// Switch generation of the attached source
    pub fn active_generation(&self) -> Option<u64> {
        self.node.as_ref().map(|n| n.generation)
    }

    /// Blocks handed to the processing callback
    pub fn blocks_processed(&self) -> u64 {
        self.dispatcher.blocks()
    }

    /// Blocks rendered as silence because nothing was attached
    pub fn silent_blocks(&self) -> u64 {
        self.silent_blocks
    }

    /// Render one block of `frames` (at most the block size)
    ///
    /// Returns `false` when no node is attached; the output is then silent
    /// and no callback runs.
    pub fn render(&mut self, frames: usize) -> bool {
        let frames = frames.min(self.block_size);
        match self.node.as_mut() {
            Some(node) => {
                node.source
                    .process(&mut self.input, &mut self.output, frames, &mut self.dispatcher);
                true
            }
            None => {
                self.output.clear(frames);
                self.silent_blocks += 1;
                false
            }
        }
    }

    /// Render one block straight into device buffers
    pub fn render_into(&mut self, left: &mut [f32], right: &mut [f32]) {
        let frames = left.len().min(right.len()).min(self.block_size);
        self.render(frames);
        self.output.copy_to(&mut left[..frames], &mut right[..frames]);
        left[frames..].fill(0.0);
        right[frames..].fill(0.0);
    }

    /// Install a node, stopping and returning whatever was attached before
    pub(crate) fn attach(&mut self, node: ProcessNode) -> Option<SourceKind> {
        let previous = self.detach();
        self.input.set_num_channels(node.source.input_channels());
        self.input.clear(self.block_size);
        self.node = Some(node);
        previous
    }

    /// Stop and drop the attached node
    pub(crate) fn detach(&mut self) -> Option<SourceKind> {
        let mut node = self.node.take()?;
        let kind = node.kind();
        node.source.stop();
        Some(kind)
    }

    pub(crate) fn setup(&mut self, sample_rate: u32) {
        self.dispatcher.setup(sample_rate);
    }

    pub(crate) fn transport(&self) -> Option<&Transport> {
        self.node.as_ref().and_then(|n| n.source.transport())
    }

    pub(crate) fn transport_mut(&mut self) -> Option<&mut Transport> {
        self.node.as_mut().and_then(|n| n.source.transport_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(block_size: usize) -> Graph {
        Graph::new(
            block_size,
            Box::new(
                |_: Option<&InputAudioBlock>, output: &mut OutputAudioBlock, frames: usize| {
                    output.left_mut()[..frames].fill(0.5);
                    output.right_mut()[..frames].fill(-0.5);
                },
            ),
        )
    }

    #[test]
    fn test_empty_graph_renders_silence() {
        let mut g = graph(4);
        let mut l = [1.0; 4];
        let mut r = [1.0; 4];
        g.render_into(&mut l, &mut r);
        assert_eq!(l, [0.0; 4]);
        assert_eq!(r, [0.0; 4]);
        assert_eq!(g.silent_blocks(), 1);
        assert_eq!(g.blocks_processed(), 0);
    }

    #[test]
    fn test_attached_node_runs_callback() {
        let mut g = graph(4);
        assert_eq!(g.attach(ProcessNode::new(1, SourceHandle::Synthesis)), None);
        assert_eq!(g.active_kind(), Some(SourceKind::Synthesis));
        assert_eq!(g.active_generation(), Some(1));

        let mut l = [0.0; 4];
        let mut r = [0.0; 4];
        g.render_into(&mut l, &mut r);
        assert_eq!(l, [0.5; 4]);
        assert_eq!(r, [-0.5; 4]);
        assert_eq!(g.blocks_processed(), 1);
    }

    #[test]
    fn test_oversized_device_buffer_gets_silent_tail() {
        let mut g = graph(2);
        g.attach(ProcessNode::new(1, SourceHandle::Synthesis));
        let mut l = [9.0; 3];
        let mut r = [9.0; 3];
        g.render_into(&mut l, &mut r);
        assert_eq!(l, [0.5, 0.5, 0.0]);
    }

    #[test]
    fn test_reattach_replaces_node() {
        let mut g = graph(4);
        g.attach(ProcessNode::new(1, SourceHandle::Synthesis));
        let previous = g.attach(ProcessNode::new(2, SourceHandle::Synthesis));
        assert_eq!(previous, Some(SourceKind::Synthesis));
        assert_eq!(g.active_generation(), Some(2));

        assert_eq!(g.detach(), Some(SourceKind::Synthesis));
        assert!(!g.is_attached());
        assert_eq!(g.detach(), None);
    }
}
