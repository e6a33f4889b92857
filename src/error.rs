//! Error types for Parley

use thiserror::Error;

/// Result type alias for Parley operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur outside of an interaction session
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Assistant endpoint error
    #[error("assistant error: {0}")]
    Assistant(#[from] AssistantError),

    /// Configuration portal error
    #[error("portal error: {0}")]
    Portal(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML encoding error
    #[error("toml encode error: {0}")]
    TomlEncode(#[from] toml::ser::Error),
}

/// Microphone capture failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    /// `start()` called while a capture is running
    #[error("capture already active")]
    AlreadyActive,

    /// `stop()` called without a running capture
    #[error("capture not active")]
    NotActive,

    /// The recording buffer could not be reserved
    #[error("failed to allocate recording buffer")]
    AllocationFailed,

    /// The microphone backend reported a fault
    #[error("microphone error: {0}")]
    Device(String),
}

/// Speech output failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaybackError {
    /// No speech engine is attached
    #[error("speech output not initialized")]
    NotInitialized,

    /// Nothing left to say after sanitizing
    #[error("empty text for speech")]
    EmptyText,

    /// The engine refused the utterance
    #[error("failed to start speech: {0}")]
    StartFailed(String),
}

/// Transcription failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranscriptionError {
    /// The recording holds no samples
    #[error("invalid audio data")]
    EmptyInput,

    /// No network connection
    #[error("network not connected")]
    NetworkUnavailable,
}

/// Language-model endpoint failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssistantError {
    /// Nothing to ask
    #[error("empty input provided")]
    EmptyPrompt,

    /// No network connection
    #[error("network not connected")]
    NetworkUnavailable,

    /// The endpoint answered with an error payload
    #[error("{0}")]
    RemoteError(String),

    /// The payload was not JSON or had no reply text
    #[error("no valid response found")]
    MalformedResponse,

    /// The request itself failed (timeout, connection reset, bare HTTP error)
    #[error("request failed: {0}")]
    Transport(String),
}

/// Reason an interaction session ended in `Failed`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Recording finished with no samples
    #[error("no audio recorded")]
    NoAudioCaptured,

    /// Transcription produced only whitespace
    #[error("empty transcript")]
    EmptyTranscript,

    /// Capture stage failure
    #[error(transparent)]
    Capture(#[from] CaptureError),

    /// Transcription stage failure
    #[error(transparent)]
    Transcription(#[from] TranscriptionError),

    /// Query stage failure
    #[error(transparent)]
    Assistant(#[from] AssistantError),

    /// Speaking stage failure
    #[error(transparent)]
    Playback(#[from] PlaybackError),

    /// A pipeline stage panicked
    #[error("session task panicked: {0}")]
    Aborted(String),
}

impl SessionError {
    /// Pipeline stage the error belongs to, used as the chat-log tag
    #[must_use]
    pub const fn stage(&self) -> &'static str {
        match self {
            Self::NoAudioCaptured | Self::Capture(_) => "capture",
            Self::EmptyTranscript | Self::Transcription(_) => "transcription",
            Self::Assistant(_) => "assistant",
            Self::Playback(_) => "playback",
            Self::Aborted(_) => "session",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_error_displays_bare_message() {
        let err = SessionError::from(AssistantError::RemoteError("quota exceeded".to_string()));
        assert_eq!(err.to_string(), "quota exceeded");
        assert_eq!(err.stage(), "assistant");
    }

    #[test]
    fn capture_failures_share_a_stage() {
        assert_eq!(SessionError::NoAudioCaptured.stage(), "capture");
        assert_eq!(
            SessionError::from(CaptureError::AllocationFailed).stage(),
            "capture"
        );
    }

    #[test]
    fn aborted_session_has_own_stage() {
        let err = SessionError::Aborted("boom".to_string());
        assert_eq!(err.to_string(), "session task panicked: boom");
        assert_eq!(err.stage(), "session");
    }
}
