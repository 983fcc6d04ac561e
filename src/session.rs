//! Source switchboard
//!
//! A [`Session`] owns the selected source, the context manager and the
//! processing graph. Switching sources always tears the old node down
//! first, then either attaches the new one right away (synthesis, already
//! decoded buffers) or hands acquisition to a worker thread (live input,
//! file decoding) and attaches when that finishes.
//!
//! Every switch bumps a generation counter. A worker whose generation is
//! no longer current when it completes throws its result away, so only
//! the most recently requested source can ever end up attached.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use crate::audio::{
    decode_file, DecodedBuffer, FileError, InputAudioBlock, OutputAudioBlock, PlaybackState,
    Transport,
};
use crate::backend::{AudioBackend, AudioContext, InputStream};
use crate::context::ContextManager;
use crate::dispatch::BlockProcessor;
use crate::error::AudioError;
use crate::graph::{Graph, ProcessNode};
use crate::settings::MAX_BLOCK_SIZE;
use crate::source::{SourceDescriptor, SourceHandle, SourceKind};

/// Receives every failed switch
pub type ErrorCallback = Box<dyn Fn(&AudioError) + Send + Sync>;

/// How an asynchronous switch ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchOutcome {
    Attached(SourceKind),
    /// A newer switch started first; the acquired resource was released
    Superseded,
}

/// A switch still acquiring its source on a worker thread
#[derive(Debug)]
pub struct PendingSwitch {
    kind: SourceKind,
    handle: thread::JoinHandle<Result<SwitchOutcome, AudioError>>,
}

impl PendingSwitch {
    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Block until acquisition and attachment are done
    pub fn wait(self) -> Result<SwitchOutcome, AudioError> {
        self.handle.join().unwrap_or_else(|_| {
            Err(AudioError::Stream(
                "source acquisition worker panicked".to_string(),
            ))
        })
    }
}

/// Result of starting a switch
#[derive(Debug)]
#[must_use]
pub enum Switch {
    /// Attached before returning
    Attached(SourceKind),
    Pending(PendingSwitch),
}

impl Switch {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    pub fn wait(self) -> Result<SwitchOutcome, AudioError> {
        match self {
            Self::Attached(kind) => Ok(SwitchOutcome::Attached(kind)),
            Self::Pending(pending) => pending.wait(),
        }
    }
}

struct Control {
    contexts: ContextManager,
    selected: SourceKind,
    current: Option<SourceKind>,
    num_input_channels: usize,
    running: bool,
    looping: bool,
    closed: bool,
}

struct Shared {
    control: Mutex<Control>,
    generation: AtomicU64,
    block_size: usize,
    on_error: Option<ErrorCallback>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Only meaningful with the control lock held
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn report(&self, err: AudioError) -> AudioError {
        log::error!("Source switch failed: {}", err);
        if let Some(on_error) = &self.on_error {
            on_error(&err);
        }
        err
    }

    fn attach(
        &self,
        control: &mut Control,
        generation: u64,
        mut source: SourceHandle,
    ) -> Result<SourceKind, AudioError> {
        if let Err(e) = control.contexts.ensure_context() {
            source.stop();
            return Err(e);
        }

        let kind = source.kind();
        control.num_input_channels = source.input_channels();
        control.contexts.rebuild_graph(ProcessNode::new(generation, source));
        control.current = Some(kind);
        control.running = true;
        Ok(kind)
    }

    fn attach_decoded_source(
        &self,
        control: &mut Control,
        generation: u64,
        buffer: Arc<DecodedBuffer>,
    ) -> Result<SourceKind, AudioError> {
        let (context, _) = control.contexts.ensure_context()?;
        let mut transport = Transport::new(buffer, context.sample_rate(), self.block_size);
        transport.looping = control.looping;
        transport.start(0);
        self.attach(control, generation, SourceHandle::file(transport))
    }

    fn finish_live(
        &self,
        generation: u64,
        kind: SourceKind,
        opened: Result<Box<dyn InputStream>, AudioError>,
    ) -> Result<SwitchOutcome, AudioError> {
        let attached = {
            let mut control = self.lock();
            if !self.is_current(generation) {
                if let Ok(mut stream) = opened {
                    stream.stop();
                }
                log::debug!("Discarding superseded {} acquisition", kind);
                return Ok(SwitchOutcome::Superseded);
            }

            opened.and_then(|stream| {
                let channels = kind.live_channels().unwrap_or(1);
                let source = SourceHandle::live(stream, channels, self.block_size);
                self.attach(&mut control, generation, source)
            })
        };

        attached
            .map(SwitchOutcome::Attached)
            .map_err(|e| self.report(e))
    }

    fn finish_file(
        &self,
        generation: u64,
        path: &Path,
        decoded: Result<DecodedBuffer, FileError>,
    ) -> Result<SwitchOutcome, AudioError> {
        let attached = {
            let mut control = self.lock();
            if !self.is_current(generation) {
                log::debug!("Discarding superseded decode of {}", path.display());
                return Ok(SwitchOutcome::Superseded);
            }

            decoded
                .map_err(|e| AudioError::source_load(path, e))
                .and_then(|buffer| {
                    self.attach_decoded_source(&mut control, generation, Arc::new(buffer))
                })
        };

        attached
            .map(SwitchOutcome::Attached)
            .map_err(|e| self.report(e))
    }
}

/// Read and decode a file source
fn resolve_source(path: &Path) -> Result<DecodedBuffer, FileError> {
    decode_file(path)
}

/// Runs the caller's setup hook after the processor's own
struct SetupHook {
    inner: Box<dyn BlockProcessor>,
    hook: Box<dyn FnMut(u32) + Send>,
}

impl BlockProcessor for SetupHook {
    fn setup(&mut self, sample_rate: u32) {
        self.inner.setup(sample_rate);
        (self.hook)(sample_rate);
    }

    fn process(
        &mut self,
        input: Option<&InputAudioBlock>,
        output: &mut OutputAudioBlock,
        frames: usize,
    ) {
        self.inner.process(input, output, frames);
    }
}

fn silent_processor() -> Box<dyn BlockProcessor> {
    Box::new(|_: Option<&InputAudioBlock>, _: &mut OutputAudioBlock, _: usize| {})
}

/// Builder for [`Session`]
pub struct SessionBuilder {
    backend: Arc<dyn AudioBackend>,
    block_size: usize,
    source: SourceKind,
    processor: Option<Box<dyn BlockProcessor>>,
    setup: Option<Box<dyn FnMut(u32) + Send>>,
    external_context: Option<Arc<dyn AudioContext>>,
    on_error: Option<ErrorCallback>,
    looping: bool,
}

impl SessionBuilder {
    pub fn new(backend: Arc<dyn AudioBackend>) -> Self {
        Self {
            backend,
            block_size: 512,
            source: SourceKind::default(),
            processor: None,
            setup: None,
            external_context: None,
            on_error: None,
            looping: false,
        }
    }

    pub fn block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Source selected at construction; live and synthesis sources start
    /// immediately, file sources wait for an explicit switch
    pub fn source(mut self, kind: SourceKind) -> Self {
        self.source = kind;
        self
    }

    pub fn processor(mut self, processor: impl BlockProcessor) -> Self {
        self.processor = Some(Box::new(processor));
        self
    }

    /// Called with the sample rate whenever a context is (re)created
    pub fn setup(mut self, setup: impl FnMut(u32) + Send + 'static) -> Self {
        self.setup = Some(Box::new(setup));
        self
    }

    /// Reuse an existing context instead of creating one
    pub fn external_context(mut self, context: Arc<dyn AudioContext>) -> Self {
        self.external_context = Some(context);
        self
    }

    pub fn on_error(mut self, on_error: impl Fn(&AudioError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(on_error));
        self
    }

    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn build(self) -> Result<Session, AudioError> {
        if self.block_size == 0 || self.block_size > MAX_BLOCK_SIZE {
            return Err(AudioError::InvalidArgument(format!(
                "block size must be between 1 and {}, got {}",
                MAX_BLOCK_SIZE, self.block_size
            )));
        }

        let mut processor = self.processor.unwrap_or_else(silent_processor);
        if let Some(hook) = self.setup {
            processor = Box::new(SetupHook {
                inner: processor,
                hook,
            });
        }

        let graph = Arc::new(Mutex::new(Graph::new(self.block_size, processor)));
        let contexts =
            ContextManager::new(self.backend, graph, self.block_size, self.external_context);

        let shared = Arc::new(Shared {
            control: Mutex::new(Control {
                contexts,
                selected: self.source,
                current: None,
                num_input_channels: self.source.live_channels().unwrap_or(1),
                running: false,
                looping: self.looping,
                closed: false,
            }),
            generation: AtomicU64::new(0),
            block_size: self.block_size,
            on_error: self.on_error,
        });

        let mut session = Session {
            shared,
            startup: None,
        };

        if self.source == SourceKind::File {
            log::info!("File source selected; waiting for a file to play");
        } else {
            session.startup = Some(session.switch_source(self.source, None));
        }

        Ok(session)
    }
}

/// One audio I/O session: a selected source feeding a block callback
pub struct Session {
    shared: Arc<Shared>,
    startup: Option<Result<Switch, AudioError>>,
}

impl Session {
    pub fn builder(backend: Arc<dyn AudioBackend>) -> SessionBuilder {
        SessionBuilder::new(backend)
    }

    /// Result of the automatic start performed by [`SessionBuilder::build`]
    ///
    /// `None` for file sessions, or once taken.
    pub fn take_startup(&mut self) -> Option<Result<Switch, AudioError>> {
        self.startup.take()
    }

    /// Replace the active source
    ///
    /// The current source is detached before anything else happens.
    /// Synthesis and decoded-buffer file sources are attached before this
    /// returns; live input and file paths come back as
    /// [`Switch::Pending`].
    pub fn switch_source(
        &self,
        kind: SourceKind,
        descriptor: Option<SourceDescriptor>,
    ) -> Result<Switch, AudioError> {
        let shared = &self.shared;

        match (kind, &descriptor) {
            (SourceKind::File, None) => {
                return Err(shared.report(AudioError::InvalidArgument(
                    "file source needs a path or a decoded buffer".to_string(),
                )))
            }
            (SourceKind::File, Some(_)) | (_, None) => {}
            (other, Some(_)) => {
                return Err(shared.report(AudioError::InvalidArgument(format!(
                    "{} source takes no descriptor",
                    other
                ))))
            }
        }

        let mut control = shared.lock();
        if control.closed {
            drop(control);
            return Err(shared.report(AudioError::InvalidArgument(
                "session is closed".to_string(),
            )));
        }

        let generation = shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        control.contexts.teardown();
        control.running = false;
        control.current = None;
        control.num_input_channels = kind.live_channels().unwrap_or(1);
        control.selected = kind;
        log::info!("Switching to {} source", kind);

        match (kind, descriptor) {
            (SourceKind::LiveMono | SourceKind::LiveStereo, _) => {
                let channels = kind.live_channels().unwrap_or(1);
                let backend = Arc::clone(control.contexts.backend());
                drop(control);

                let worker = Arc::clone(shared);
                let handle = thread::Builder::new()
                    .name("blockio-acquire".into())
                    .spawn(move || {
                        let opened = backend.open_input(channels);
                        worker.finish_live(generation, kind, opened)
                    })
                    .map_err(|e| {
                        shared.report(AudioError::DeviceAcquisitionFailed(e.to_string()))
                    })?;

                Ok(Switch::Pending(PendingSwitch { kind, handle }))
            }
            (SourceKind::File, Some(SourceDescriptor::Path(path))) => {
                drop(control);

                let worker = Arc::clone(shared);
                let requested = path.clone();
                let handle = thread::Builder::new()
                    .name("blockio-decode".into())
                    .spawn(move || {
                        let decoded = resolve_source(&path);
                        worker.finish_file(generation, &path, decoded)
                    })
                    .map_err(|e| {
                        shared.report(AudioError::source_load(requested, FileError::from(e)))
                    })?;

                Ok(Switch::Pending(PendingSwitch { kind, handle }))
            }
            (SourceKind::File, Some(SourceDescriptor::Buffer(buffer))) => {
                let attached = shared.attach_decoded_source(&mut control, generation, buffer);
                drop(control);
                attached
                    .map(Switch::Attached)
                    .map_err(|e| shared.report(e))
            }
            _ => {
                let attached = shared.attach(&mut control, generation, SourceHandle::Synthesis);
                drop(control);
                attached
                    .map(Switch::Attached)
                    .map_err(|e| shared.report(e))
            }
        }
    }

    /// Switch by numeric type code (0 synthesis, 1 live mono, 2 live stereo, 3 file)
    pub fn switch_source_code(
        &self,
        code: u8,
        descriptor: Option<SourceDescriptor>,
    ) -> Result<Switch, AudioError> {
        let kind = SourceKind::try_from(code).map_err(|e| self.shared.report(e))?;
        self.switch_source(kind, descriptor)
    }

    /// Whether the selected source reads a capture device
    pub fn using_microphone(&self) -> bool {
        self.shared.lock().selected.is_live()
    }

    /// Most recently requested source, attached or not
    pub fn selected_source(&self) -> SourceKind {
        self.shared.lock().selected
    }

    /// Currently attached source
    pub fn source_kind(&self) -> Option<SourceKind> {
        self.shared.lock().current
    }

    pub fn num_input_channels(&self) -> usize {
        self.shared.lock().num_input_channels
    }

    /// Rate of the active context, 0 without one
    pub fn sample_rate(&self) -> u32 {
        self.shared.lock().contexts.sample_rate()
    }

    pub fn block_size(&self) -> usize {
        self.shared.block_size
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().running
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// The active context, if one exists
    pub fn context(&self) -> Option<Arc<dyn AudioContext>> {
        self.shared.lock().contexts.context().cloned()
    }

    pub fn suspend(&self) -> Result<(), AudioError> {
        self.shared.lock().contexts.suspend()
    }

    pub fn resume(&self) -> Result<(), AudioError> {
        self.shared.lock().contexts.resume()
    }

    /// Detach the source and close the context; the session is inert afterwards
    pub fn close(&self) {
        let mut control = self.shared.lock();
        if control.closed {
            return;
        }
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        control.contexts.close();
        control.running = false;
        control.current = None;
        control.closed = true;
    }

    pub fn blocks_processed(&self) -> u64 {
        self.shared.lock().contexts.lock_graph().blocks_processed()
    }

    pub fn silent_blocks(&self) -> u64 {
        self.shared.lock().contexts.lock_graph().silent_blocks()
    }

    /// Move the file transport to `frame`
    pub fn seek_playback(&self, frame: u64) -> Result<(), AudioError> {
        self.with_transport(|t| t.seek(frame))
    }

    pub fn pause_playback(&self) -> Result<(), AudioError> {
        self.with_transport(Transport::pause)
    }

    pub fn resume_playback(&self) -> Result<(), AudioError> {
        self.with_transport(Transport::resume)
    }

    /// Loop file playback; also applies to files attached later
    pub fn set_looping(&self, looping: bool) {
        let mut control = self.shared.lock();
        control.looping = looping;
        if let Some(transport) = control.contexts.lock_graph().transport_mut() {
            transport.looping = looping;
        };
    }

    pub fn playback_position(&self) -> Option<u64> {
        let control = self.shared.lock();
        let graph = control.contexts.lock_graph();
        graph.transport().map(Transport::position)
    }

    pub fn playback_state(&self) -> Option<PlaybackState> {
        let control = self.shared.lock();
        let graph = control.contexts.lock_graph();
        graph.transport().map(Transport::state)
    }

    fn with_transport(&self, f: impl FnOnce(&mut Transport)) -> Result<(), AudioError> {
        let control = self.shared.lock();
        let mut graph = control.contexts.lock_graph();
        match graph.transport_mut() {
            Some(transport) => {
                f(transport);
                Ok(())
            }
            None => Err(AudioError::InvalidArgument(
                "no file source attached".to_string(),
            )),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
