//! Voice processing module
//!
//! Handles audio capture, transcription, and spoken output.

mod capture;
mod playback;
mod stt;
mod tts;

pub use capture::{
    AudioBuffer, AudioCapture, CpalMicrophone, Microphone, SAMPLE_RATE, WAV_HEADER_SIZE,
    narrow_sample,
};
pub use playback::{AudioPlayback, SPEECH_ERROR_PHRASE, SpeechEngine, sanitize_for_speech};
pub use stt::{
    AmplitudeTranscriber, NO_SPEECH_TEXT, SPEECH_DETECTED_TEXT, Transcriber, mean_amplitude,
};
pub use tts::{
    CloudSpeechEngine, DecodedAudio, MAX_CHUNK_CHARS, TextToSpeech, chunk_text, decode_mp3,
};
