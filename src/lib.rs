//! blockio - block-based real-time audio I/O
//!
//! A [`Session`] feeds one user callback with fixed-size blocks from
//! whichever source is selected:
//! - live input (mono or stereo) from a capture device
//! - synthesis (no input; the callback writes the output)
//! - playback of a decoded audio file
//!
//! Sources can be switched at any time. Input samples are sanitized and
//! reshaped into the same [`InputAudioBlock`] layout whatever the source,
//! and output always arrives zeroed.

pub mod audio;
pub mod backend;
mod context;
pub mod dispatch;
pub mod error;
pub mod graph;
pub mod session;
pub mod settings;
pub mod source;

pub use audio::{sanitize, DecodedBuffer, InputAudioBlock, OutputAudioBlock, PlaybackState};
pub use backend::{AudioBackend, AudioContext, ContextState, CpalBackend, OfflineBackend};
pub use dispatch::{BlockProcessor, WithSetup};
pub use error::AudioError;
pub use session::{PendingSwitch, Session, SessionBuilder, Switch, SwitchOutcome};
pub use settings::SessionConfig;
pub use source::{SourceDescriptor, SourceKind};
