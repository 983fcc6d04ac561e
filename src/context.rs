//! Audio context lifecycle
//!
//! Owns the single active context and decides when a new one is needed:
//! only when there is none or the current one is closed. A suspended
//! context is reused as is. Whenever a context is (re)created the
//! processor's setup hook runs with the new sample rate; rebuilding the
//! graph on an existing context does not repeat it.

use std::sync::Arc;

use crate::backend::{AudioBackend, AudioContext, ContextState};
use crate::error::AudioError;
use crate::graph::{ProcessNode, SharedGraph};
use crate::source::SourceKind;

pub(crate) struct ContextManager {
    backend: Arc<dyn AudioBackend>,
    graph: SharedGraph,
    block_size: usize,
    context: Option<Arc<dyn AudioContext>>,
    /// Whether `graph` has been connected to `context` (and setup has run)
    connected: bool,
}

impl ContextManager {
    pub(crate) fn new(
        backend: Arc<dyn AudioBackend>,
        graph: SharedGraph,
        block_size: usize,
        external: Option<Arc<dyn AudioContext>>,
    ) -> Self {
        Self {
            backend,
            graph,
            block_size,
            context: external,
            connected: false,
        }
    }

    pub(crate) fn backend(&self) -> &Arc<dyn AudioBackend> {
        &self.backend
    }

    pub(crate) fn graph(&self) -> &SharedGraph {
        &self.graph
    }

    /// A context exists and is not closed
    pub(crate) fn is_usable(&self) -> bool {
        self.context
            .as_ref()
            .is_some_and(|c| c.state() != ContextState::Closed)
    }

    pub(crate) fn context(&self) -> Option<&Arc<dyn AudioContext>> {
        self.context.as_ref()
    }

    /// Sample rate of the live context, 0 when there is none
    pub(crate) fn sample_rate(&self) -> u32 {
        match &self.context {
            Some(c) if c.state() != ContextState::Closed => c.sample_rate(),
            _ => 0,
        }
    }

    /// Return the live context, creating one if absent or closed
    ///
    /// The boolean is `true` when the graph was newly connected to it (and
    /// the setup hook ran).
    pub(crate) fn ensure_context(&mut self) -> Result<(Arc<dyn AudioContext>, bool), AudioError> {
        if !self.is_usable() {
            if let Some(stale) = self.context.take() {
                stale.disconnect();
                stale.close();
            }
            self.connected = false;

            let context = self.backend.create_context(self.block_size)?;
            log::info!(
                "Created {} audio context at {} Hz",
                self.backend.name(),
                context.sample_rate()
            );
            self.context = Some(context);
        }

        let context = match &self.context {
            Some(c) => Arc::clone(c),
            None => {
                return Err(AudioError::PlatformUnsupported(
                    "no audio context available".to_string(),
                ))
            }
        };

        if self.connected {
            return Ok((context, false));
        }

        // Setup runs before the graph can pull its first block
        let sample_rate = context.sample_rate();
        self.lock_graph().setup(sample_rate);
        context.connect(Arc::clone(&self.graph))?;
        self.connected = true;

        Ok((context, true))
    }

    /// Replace the attached node with `node`
    pub(crate) fn rebuild_graph(&mut self, node: ProcessNode) -> Option<SourceKind> {
        let kind = node.kind();
        let previous = self.lock_graph().attach(node);
        log::info!("Attached {} source", kind);
        previous
    }

    /// Detach and stop the current node, if any
    pub(crate) fn teardown(&mut self) -> Option<SourceKind> {
        let previous = self.lock_graph().detach();
        if let Some(kind) = previous {
            log::info!("Detached {} source", kind);
        }
        previous
    }

    pub(crate) fn suspend(&self) -> Result<(), AudioError> {
        match &self.context {
            Some(c) if c.state() == ContextState::Running => c.suspend(),
            _ => Ok(()),
        }
    }

    pub(crate) fn resume(&self) -> Result<(), AudioError> {
        match &self.context {
            Some(c) if c.state() == ContextState::Suspended => c.resume(),
            _ => Ok(()),
        }
    }

    /// Tear down, disconnect and close the context
    pub(crate) fn close(&mut self) {
        self.teardown();
        if let Some(context) = self.context.take() {
            context.disconnect();
            context.close();
            log::info!("Closed audio context");
        }
        self.connected = false;
    }

    pub(crate) fn lock_graph(&self) -> std::sync::MutexGuard<'_, crate::graph::Graph> {
        // Poisoned only by a panicking callback; the buffers are still valid
        self.graph
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{InputAudioBlock, OutputAudioBlock};
    use crate::backend::OfflineBackend;
    use crate::dispatch::WithSetup;
    use crate::graph::Graph;
    use crate::source::SourceHandle;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn manager(backend: &Arc<OfflineBackend>) -> (ContextManager, Arc<AtomicU32>) {
        let setups = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&setups);
        let processor = WithSetup::new(
            |_: Option<&InputAudioBlock>, _: &mut OutputAudioBlock, _: usize| {},
            move |_| {
                counter.fetch_add(1, Ordering::Relaxed);
            },
        );
        let graph = Arc::new(Mutex::new(Graph::new(64, Box::new(processor))));
        let backend: Arc<dyn AudioBackend> = backend.clone();
        (ContextManager::new(backend, graph, 64, None), setups)
    }

    #[test]
    fn test_reuses_live_context() {
        let backend = Arc::new(OfflineBackend::new(48000));
        let (mut mgr, setups) = manager(&backend);
        assert_eq!(mgr.sample_rate(), 0);

        let (_, created) = mgr.ensure_context().unwrap();
        assert!(created);
        assert_eq!(mgr.sample_rate(), 48000);

        let (_, created) = mgr.ensure_context().unwrap();
        assert!(!created);
        assert_eq!(backend.contexts_created(), 1);
        assert_eq!(setups.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_suspended_context_is_not_recreated() {
        let backend = Arc::new(OfflineBackend::new(44100));
        let (mut mgr, setups) = manager(&backend);
        mgr.ensure_context().unwrap();
        mgr.suspend().unwrap();

        let (context, created) = mgr.ensure_context().unwrap();
        assert!(!created);
        assert_eq!(context.state(), ContextState::Suspended);
        assert_eq!(backend.contexts_created(), 1);
        assert_eq!(setups.load(Ordering::Relaxed), 1);

        mgr.resume().unwrap();
        assert_eq!(context.state(), ContextState::Running);
    }

    #[test]
    fn test_closed_context_is_recreated_with_setup() {
        let backend = Arc::new(OfflineBackend::new(44100));
        let (mut mgr, setups) = manager(&backend);
        let (first, _) = mgr.ensure_context().unwrap();
        first.close();
        assert!(!mgr.is_usable());
        assert_eq!(mgr.sample_rate(), 0);

        let (second, created) = mgr.ensure_context().unwrap();
        assert!(created);
        assert_eq!(second.state(), ContextState::Running);
        assert_eq!(backend.contexts_created(), 2);
        assert_eq!(setups.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_rebuild_does_not_rerun_setup() {
        let backend = Arc::new(OfflineBackend::new(48000));
        let (mut mgr, setups) = manager(&backend);
        mgr.ensure_context().unwrap();
        mgr.rebuild_graph(ProcessNode::new(1, SourceHandle::Synthesis));
        let previous = mgr.rebuild_graph(ProcessNode::new(2, SourceHandle::Synthesis));

        assert_eq!(previous, Some(SourceKind::Synthesis));
        assert_eq!(setups.load(Ordering::Relaxed), 1);
        assert_eq!(mgr.teardown(), Some(SourceKind::Synthesis));
        assert_eq!(mgr.teardown(), None);
    }

    #[test]
    fn test_unsupported_platform() {
        let backend = Arc::new(OfflineBackend::unsupported());
        let (mut mgr, setups) = manager(&backend);
        let result = mgr.ensure_context();
        assert!(matches!(result, Err(AudioError::PlatformUnsupported(_))));
        assert!(!mgr.is_usable());
        assert_eq!(setups.load(Ordering::Relaxed), 0);
    }
}
