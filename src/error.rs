//! Error types for the control path
//!
//! Nothing here is ever raised from the real-time block path: handlers
//! degrade to silence instead.

use std::path::PathBuf;

use thiserror::Error;

use crate::audio::FileError;

/// Errors surfaced by session and backend operations
#[derive(Error, Debug)]
pub enum AudioError {
    /// No usable audio context implementation (no host, no output device)
    #[error("Audio platform unsupported: {0}")]
    PlatformUnsupported(String),

    /// Input device missing, busy or access denied
    #[error("Failed to acquire input device: {0}")]
    DeviceAcquisitionFailed(String),

    /// File source could not be read or decoded
    #[error("Failed to load {}: {source}", path.display())]
    SourceLoadFailed {
        path: PathBuf,
        #[source]
        source: FileError,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A stream on an already opened device failed to build or start
    #[error("Stream error: {0}")]
    Stream(String),
}

impl AudioError {
    /// Wrap a decoding failure for the file at `path`
    pub fn source_load(path: impl Into<PathBuf>, source: FileError) -> Self {
        Self::SourceLoadFailed {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = AudioError::PlatformUnsupported("no output device".to_string());
        assert_eq!(err.to_string(), "Audio platform unsupported: no output device");

        let err = AudioError::InvalidArgument("unknown source type 7".to_string());
        assert_eq!(err.to_string(), "Invalid argument: unknown source type 7");
    }

    #[test]
    fn test_source_load_keeps_cause() {
        let err = AudioError::source_load("clip.wav", FileError::NoTracks);
        assert_eq!(err.to_string(), "Failed to load clip.wav: No audio tracks found");
        assert!(std::error::Error::source(&err).is_some());
    }
}
