//! Offline (hardware-free) backend
//!
//! Contexts created here have no clock of their own: the owner renders
//! blocks explicitly with [`OfflineContext::render_block`]. Live input is
//! replayed from signals supplied up front. Useful for rendering faster
//! than real time, for machines without audio hardware, and for tests.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::{AudioBackend, AudioContext, ContextState, InputStream};
use crate::error::AudioError;
use crate::graph::SharedGraph;

/// Backend whose contexts are driven by the caller
pub struct OfflineBackend {
    sample_rate: u32,
    supported: bool,
    input_left: Vec<f32>,
    input_right: Vec<f32>,
    input_denied: Mutex<Option<String>>,
    contexts: Mutex<Vec<Arc<OfflineContext>>>,
    inputs_opened: AtomicUsize,
    inputs_stopped: Arc<AtomicUsize>,
}

impl OfflineBackend {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            supported: true,
            input_left: Vec::new(),
            input_right: Vec::new(),
            input_denied: Mutex::new(None),
            contexts: Mutex::new(Vec::new()),
            inputs_opened: AtomicUsize::new(0),
            inputs_stopped: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A backend that cannot create any context
    pub fn unsupported() -> Self {
        Self {
            supported: false,
            ..Self::new(0)
        }
    }

    /// Replay these signals (looped) as live input
    ///
    /// Mono inputs read `left`; stereo inputs read both.
    pub fn with_input(mut self, left: Vec<f32>, right: Vec<f32>) -> Self {
        self.input_left = left;
        self.input_right = right;
        self
    }

    /// Make every following input request fail with `reason`
    pub fn deny_input(&self, reason: &str) {
        *self.input_denied.lock().unwrap_or_else(|e| e.into_inner()) = Some(reason.to_string());
    }

    pub fn allow_input(&self) {
        *self.input_denied.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    pub fn contexts_created(&self) -> usize {
        self.contexts.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// Most recently created context
    pub fn latest_context(&self) -> Option<Arc<OfflineContext>> {
        self.contexts.lock().ok().and_then(|c| c.last().cloned())
    }

    pub fn inputs_opened(&self) -> usize {
        self.inputs_opened.load(Ordering::SeqCst)
    }

    /// Input streams that were stopped by a teardown
    pub fn inputs_stopped(&self) -> usize {
        self.inputs_stopped.load(Ordering::SeqCst)
    }
}

impl AudioBackend for OfflineBackend {
    fn name(&self) -> &str {
        "offline"
    }

    fn create_context(&self, block_size: usize) -> Result<Arc<dyn AudioContext>, AudioError> {
        if !self.supported {
            return Err(AudioError::PlatformUnsupported(
                "offline backend configured as unsupported".to_string(),
            ));
        }

        let context = Arc::new(OfflineContext::new(self.sample_rate, block_size));
        if let Ok(mut contexts) = self.contexts.lock() {
            contexts.push(Arc::clone(&context));
        }
        Ok(context)
    }

    fn open_input(&self, channels: usize) -> Result<Box<dyn InputStream>, AudioError> {
        let denied = self
            .input_denied
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(reason) = denied {
            return Err(AudioError::DeviceAcquisitionFailed(reason));
        }

        self.inputs_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(OfflineInput {
            channels: channels.clamp(1, 2),
            left: self.input_left.clone(),
            right: self.input_right.clone(),
            cursor: 0,
            stopped: false,
            stop_counter: Arc::clone(&self.inputs_stopped),
        }))
    }
}

/// A context rendered on demand
pub struct OfflineContext {
    sample_rate: u32,
    block_size: usize,
    state: Mutex<ContextState>,
    graph: Mutex<Option<SharedGraph>>,
    blocks_rendered: AtomicU64,
}

impl OfflineContext {
    pub fn new(sample_rate: u32, block_size: usize) -> Self {
        Self {
            sample_rate,
            block_size,
            state: Mutex::new(ContextState::Running),
            graph: Mutex::new(None),
            blocks_rendered: AtomicU64::new(0),
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn is_connected(&self) -> bool {
        self.graph.lock().map(|g| g.is_some()).unwrap_or(false)
    }

    /// Blocks rendered while running
    pub fn blocks_rendered(&self) -> u64 {
        self.blocks_rendered.load(Ordering::SeqCst)
    }

    /// Render one block into fresh buffers
    pub fn render_block(&self) -> (Vec<f32>, Vec<f32>) {
        let mut left = vec![0.0; self.block_size];
        let mut right = vec![0.0; self.block_size];
        self.render(&mut left, &mut right);
        (left, right)
    }

    /// Render one block; silence unless running with a graph connected
    pub fn render(&self, left: &mut [f32], right: &mut [f32]) {
        left.fill(0.0);
        right.fill(0.0);
        if self.state() != ContextState::Running {
            return;
        }

        let graph = self.graph.lock().ok().and_then(|slot| slot.as_ref().cloned());
        if let Some(graph) = graph {
            let mut graph = graph.lock().unwrap_or_else(|e| e.into_inner());
            graph.render_into(left, right);
        }
        self.blocks_rendered.fetch_add(1, Ordering::SeqCst);
    }

    fn set_state(&self, state: ContextState) {
        if let Ok(mut current) = self.state.lock() {
            *current = state;
        }
    }
}

impl AudioContext for OfflineContext {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn state(&self) -> ContextState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(ContextState::Closed)
    }

    fn connect(&self, graph: SharedGraph) -> Result<(), AudioError> {
        if self.state() == ContextState::Closed {
            return Err(AudioError::Stream("context is closed".to_string()));
        }
        if let Ok(mut slot) = self.graph.lock() {
            *slot = Some(graph);
        }
        Ok(())
    }

    fn disconnect(&self) {
        if let Ok(mut slot) = self.graph.lock() {
            *slot = None;
        }
    }

    fn suspend(&self) -> Result<(), AudioError> {
        match self.state() {
            ContextState::Closed => Err(AudioError::Stream("context is closed".to_string())),
            _ => {
                self.set_state(ContextState::Suspended);
                Ok(())
            }
        }
    }

    fn resume(&self) -> Result<(), AudioError> {
        match self.state() {
            ContextState::Closed => Err(AudioError::Stream("context is closed".to_string())),
            _ => {
                self.set_state(ContextState::Running);
                Ok(())
            }
        }
    }

    fn close(&self) {
        self.disconnect();
        self.set_state(ContextState::Closed);
    }
}

/// Looped replay of fixed signals
struct OfflineInput {
    channels: usize,
    left: Vec<f32>,
    right: Vec<f32>,
    cursor: usize,
    stopped: bool,
    stop_counter: Arc<AtomicUsize>,
}

impl InputStream for OfflineInput {
    fn channels(&self) -> usize {
        self.channels
    }

    fn read(&mut self, left: &mut [f32], right: &mut [f32]) -> usize {
        if self.stopped || self.left.is_empty() {
            left.fill(0.0);
            if self.channels == 2 {
                right.fill(0.0);
            }
            return 0;
        }

        let len = self.left.len();
        for i in 0..left.len() {
            let idx = (self.cursor + i) % len;
            left[i] = self.left[idx];
            if self.channels == 2 && i < right.len() {
                right[i] = self.right.get(idx).copied().unwrap_or(self.left[idx]);
            }
        }
        self.cursor = (self.cursor + left.len()) % len;
        left.len()
    }

    fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.stop_counter.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_lifecycle() {
        let backend = OfflineBackend::new(48000);
        let context = backend.create_context(128).unwrap();
        assert_eq!(context.sample_rate(), 48000);
        assert_eq!(context.state(), ContextState::Running);

        context.suspend().unwrap();
        assert_eq!(context.state(), ContextState::Suspended);
        context.resume().unwrap();
        context.close();
        assert_eq!(context.state(), ContextState::Closed);
        assert!(context.resume().is_err());
        assert_eq!(backend.contexts_created(), 1);
        assert_eq!(backend.latest_context().unwrap().block_size(), 128);
    }

    #[test]
    fn test_unconnected_context_renders_silence() {
        let context = OfflineContext::new(44100, 8);
        let (l, r) = context.render_block();
        assert_eq!(l, vec![0.0; 8]);
        assert_eq!(r, vec![0.0; 8]);
        assert_eq!(context.blocks_rendered(), 1);
    }

    #[test]
    fn test_input_replay_loops() {
        let backend =
            OfflineBackend::new(48000).with_input(vec![0.1, 0.2, 0.3], vec![-0.1, -0.2, -0.3]);
        let mut input = backend.open_input(2).unwrap();
        let mut l = [0.0; 4];
        let mut r = [0.0; 4];
        assert_eq!(input.read(&mut l, &mut r), 4);
        assert_eq!(l, [0.1, 0.2, 0.3, 0.1]);
        assert_eq!(r, [-0.1, -0.2, -0.3, -0.1]);

        input.stop();
        input.stop();
        assert_eq!(backend.inputs_stopped(), 1);
        assert_eq!(input.read(&mut l, &mut r), 0);
        assert_eq!(l, [0.0; 4]);
    }

    #[test]
    fn test_denied_input() {
        let backend = OfflineBackend::new(48000);
        backend.deny_input("permission denied");
        assert!(matches!(
            backend.open_input(1),
            Err(AudioError::DeviceAcquisitionFailed(_))
        ));
        backend.allow_input();
        assert!(backend.open_input(1).is_ok());
        assert_eq!(backend.inputs_opened(), 1);
    }

    #[test]
    fn test_unsupported() {
        let backend = OfflineBackend::unsupported();
        assert!(matches!(
            backend.create_context(64),
            Err(AudioError::PlatformUnsupported(_))
        ));
    }
}
