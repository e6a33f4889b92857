//! Speech-to-text (STT) processing
//!
//! Transcription sits behind [`Transcriber`] so a real recognizer can
//! replace the amplitude placeholder without touching the pipeline.

use std::sync::Arc;

use async_trait::async_trait;

use super::capture::AudioBuffer;
use crate::error::TranscriptionError;
use crate::network::NetworkStatus;

/// Text reported when the recording is loud enough to contain speech
pub const SPEECH_DETECTED_TEXT: &str = "Hello, I heard your voice!";

/// Text reported for a quiet recording
pub const NO_SPEECH_TEXT: &str = "No clear speech detected.";

/// Turns a recording into text
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe a recording, consuming it
    ///
    /// # Errors
    ///
    /// Returns [`TranscriptionError::EmptyInput`] for an empty buffer and
    /// [`TranscriptionError::NetworkUnavailable`] when offline
    async fn transcribe(&self, buffer: AudioBuffer) -> Result<String, TranscriptionError>;
}

/// Placeholder recognizer that only distinguishes sound from silence
///
/// Reports [`SPEECH_DETECTED_TEXT`] when the mean absolute amplitude exceeds
/// the threshold, [`NO_SPEECH_TEXT`] otherwise.
pub struct AmplitudeTranscriber {
    network: Arc<NetworkStatus>,
    threshold: u32,
}

impl AmplitudeTranscriber {
    /// Create a placeholder transcriber
    #[must_use]
    pub const fn new(network: Arc<NetworkStatus>, threshold: u32) -> Self {
        Self { network, threshold }
    }
}

#[async_trait]
impl Transcriber for AmplitudeTranscriber {
    async fn transcribe(&self, buffer: AudioBuffer) -> Result<String, TranscriptionError> {
        if buffer.is_empty() {
            return Err(TranscriptionError::EmptyInput);
        }

        if !self.network.is_connected() {
            tracing::warn!("cannot transcribe while offline");
            return Err(TranscriptionError::NetworkUnavailable);
        }

        let level = mean_amplitude(&buffer);
        tracing::debug!(
            samples = buffer.sample_count(),
            level,
            threshold = self.threshold,
            "transcribing"
        );

        let text = if level > u64::from(self.threshold) {
            SPEECH_DETECTED_TEXT
        } else {
            NO_SPEECH_TEXT
        };

        Ok(text.to_string())
    }
}

/// Mean absolute sample value of a recording
#[must_use]
pub fn mean_amplitude(buffer: &AudioBuffer) -> u64 {
    let count = buffer.sample_count() as u64;
    if count == 0 {
        return 0;
    }

    let total: u64 = buffer
        .samples()
        .map(|s| u64::from(s.unsigned_abs()))
        .sum();

    total / count
}
