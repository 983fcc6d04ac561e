//! blockio demo
//!
//! Runs a session configured by `~/.config/blockio/session.json`:
//! synthesis plays a quiet sine, live and file sources are monitored
//! through to the output. Peak level is logged once per second.

use std::f32::consts::TAU;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use blockio::audio::input_device_names;
use blockio::{
    AudioError, BlockProcessor, CpalBackend, InputAudioBlock, OutputAudioBlock, PlaybackState,
    Session, SessionConfig, SourceKind,
};

const TONE_HZ: f32 = 220.0;
const TONE_LEVEL: f32 = 0.1;

/// Sine for synthesis, gain-scaled passthrough otherwise
struct Monitor {
    gain: f32,
    phase: f32,
    phase_inc: f32,
    /// Peak since last read, stored as f32 bits
    peak: Arc<AtomicU32>,
}

impl Monitor {
    fn new(gain: f32, peak: Arc<AtomicU32>) -> Self {
        Self {
            gain,
            phase: 0.0,
            phase_inc: 0.0,
            peak,
        }
    }
}

impl BlockProcessor for Monitor {
    fn setup(&mut self, sample_rate: u32) {
        self.phase_inc = TAU * TONE_HZ / sample_rate.max(1) as f32;
        self.phase = 0.0;
    }

    fn process(
        &mut self,
        input: Option<&InputAudioBlock>,
        output: &mut OutputAudioBlock,
        frames: usize,
    ) {
        let (left, right) = output.channels_mut();
        let mut peak = 0.0f32;

        match input {
            None => {
                for i in 0..frames {
                    let s = self.phase.sin() * TONE_LEVEL;
                    self.phase = (self.phase + self.phase_inc) % TAU;
                    left[i] = s;
                    right[i] = s;
                    peak = peak.max(s.abs());
                }
            }
            Some(input) => {
                for i in 0..frames {
                    left[i] = input.left()[i] * self.gain;
                    right[i] = input.right()[i] * self.gain;
                    peak = peak.max(left[i].abs()).max(right[i].abs());
                }
            }
        }

        // Non-negative floats order the same as their bit patterns
        self.peak.fetch_max(peak.to_bits(), Ordering::Relaxed);
    }
}

fn main() {
    env_logger::init();
    log::info!("Starting blockio");

    let config = SessionConfig::load();
    if let Err(e) = run(&config) {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(config: &SessionConfig) -> Result<(), AudioError> {
    config.validate()?;

    for name in input_device_names() {
        log::info!("Input device: {}", name);
    }

    let backend = CpalBackend::new()
        .with_output_device(config.output_device.clone())
        .with_input_device(config.input_device.clone())
        .with_input_capacity(config.input_buffer_frames);

    let peak = Arc::new(AtomicU32::new(0));
    let mut session = Session::builder(Arc::new(backend))
        .block_size(config.block_size)
        .source(config.source)
        .processor(Monitor::new(config.monitor_gain, Arc::clone(&peak)))
        .looping(config.looping)
        .build()?;

    if let Some(startup) = session.take_startup() {
        startup?.wait()?;
    }

    if config.source == SourceKind::File {
        match &config.file {
            Some(path) => {
                session
                    .switch_source(SourceKind::File, Some(path.clone().into()))?
                    .wait()?;
            }
            None => log::warn!("No file configured; output stays silent"),
        }
    }

    log::info!(
        "Running {} at {} Hz, {} frames per block",
        session.selected_source(),
        session.sample_rate(),
        session.block_size()
    );

    let started = Instant::now();
    loop {
        thread::sleep(Duration::from_secs(1));

        let level = f32::from_bits(peak.swap(0, Ordering::Relaxed));
        log::info!(
            "Peak {:.3} ({} blocks, {} silent)",
            level,
            session.blocks_processed(),
            session.silent_blocks()
        );

        if session.playback_state() == Some(PlaybackState::Stopped) {
            log::info!("Playback finished");
            break;
        }
        if let Some(secs) = config.run_seconds {
            if started.elapsed() >= Duration::from_secs(secs) {
                break;
            }
        }
    }

    session.close();
    Ok(())
}
