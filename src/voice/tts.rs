//! Cloud text-to-speech
//!
//! [`TextToSpeech`] fetches MP3 audio from a `translate_tts` style endpoint.
//! [`CloudSpeechEngine`] runs it on a dedicated thread together with the
//! output stream, so callers only hand over text and watch the running flag.

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use cpal::SampleRate;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use super::playback::SpeechEngine;
use crate::{Error, Result};

/// Longest text accepted by the endpoint in one request
pub const MAX_CHUNK_CHARS: usize = 200;

/// Per-request timeout for synthesis
const SYNTHESIS_TIMEOUT: Duration = Duration::from_secs(10);

/// Synthesizes speech from text
pub struct TextToSpeech {
    client: reqwest::blocking::Client,
    endpoint: String,
    language: String,
}

impl TextToSpeech {
    /// Create a synthesizer for an endpoint and language code
    ///
    /// Must not be called from inside an async runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(endpoint: impl Into<String>, language: impl Into<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(SYNTHESIS_TIMEOUT)
            .user_agent("Mozilla/5.0")
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            language: language.into(),
        })
    }

    /// Synthesize one chunk of at most [`MAX_CHUNK_CHARS`] characters
    ///
    /// # Returns
    ///
    /// Audio bytes (MP3 format)
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the endpoint rejects it
    pub fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("ie", "UTF-8"),
                ("tl", self.language.as_str()),
                ("client", "tw-ob"),
                ("q", text),
            ])
            .send()?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(Error::Tts(format!("TTS endpoint error {status}")));
        }

        let audio = response.bytes()?;
        if audio.is_empty() {
            return Err(Error::Tts("TTS endpoint returned no audio".to_string()));
        }

        Ok(audio.to_vec())
    }
}

/// Split text into chunks of at most `max_chars` characters on word boundaries
///
/// Words longer than `max_chars` are split mid-word on character boundaries.
#[must_use]
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for word in text.split_whitespace() {
        let word_len = word.chars().count();

        if word_len > max_chars {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let chars: Vec<char> = word.chars().collect();
            for piece in chars.chunks(max_chars) {
                chunks.push(piece.iter().collect());
            }
            continue;
        }

        let needed = if current.is_empty() {
            word_len
        } else {
            current_len + 1 + word_len
        };

        if needed > max_chars {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }

        if !current.is_empty() {
            current.push(' ');
            current_len += 1;
        }
        current.push_str(word);
        current_len += word_len;
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

/// Decoded mono audio
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    /// Mono samples in `-1.0..=1.0`
    pub samples: Vec<f32>,

    /// Sample rate of the decoded stream
    pub sample_rate: u32,
}

/// Decode MP3 bytes to mono f32 samples
///
/// # Errors
///
/// Returns error if a frame cannot be decoded or the data holds no frames
pub fn decode_mp3(mp3_data: &[u8]) -> Result<DecodedAudio> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = 0;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate = u32::try_from(frame.sample_rate).unwrap_or(0);
                if frame.channels == 2 {
                    samples.extend(frame.data.chunks(2).map(|pair| {
                        let left = f32::from(pair[0]) / 32768.0;
                        let right = f32::from(pair.get(1).copied().unwrap_or(pair[0])) / 32768.0;
                        f32::midpoint(left, right)
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    if samples.is_empty() {
        return Err(Error::Audio("no MP3 frames in data".to_string()));
    }

    if sample_rate == 0 {
        return Err(Error::Audio("MP3 stream has no sample rate".to_string()));
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
    })
}

/// Utterance handed to the engine thread
struct Utterance {
    generation: u64,
    text: String,
}

/// Shared bookkeeping between the engine handle and its thread
#[derive(Default)]
struct EngineState {
    /// Bumped by every `begin` and `halt`; an utterance whose generation is
    /// stale is cancelled
    generation: AtomicU64,
    requested: AtomicU64,
    finished: AtomicU64,
    busy: AtomicBool,
}

impl EngineState {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) == generation
    }
}

/// Background speech engine backed by cloud TTS and the default output device
pub struct CloudSpeechEngine {
    commands: mpsc::Sender<Utterance>,
    state: Arc<EngineState>,
}

impl CloudSpeechEngine {
    /// Spawn the engine thread
    ///
    /// # Errors
    ///
    /// Returns error if the thread cannot be spawned or the synthesizer
    /// cannot be built
    pub fn spawn(endpoint: &str, language: &str) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<Utterance>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
        let state = Arc::new(EngineState::default());

        let endpoint = endpoint.to_string();
        let language = language.to_string();
        let thread_state = Arc::clone(&state);

        std::thread::Builder::new()
            .name("speech-engine".to_string())
            .spawn(move || {
                let tts = match TextToSpeech::new(endpoint, language) {
                    Ok(tts) => {
                        let _ = ready_tx.send(Ok(()));
                        tts
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                run_engine(&tts, &rx, &thread_state);
            })?;

        ready_rx
            .recv()
            .map_err(|_| Error::Tts("speech engine thread exited".to_string()))??;

        tracing::debug!("speech engine started");

        Ok(Self {
            commands: tx,
            state,
        })
    }
}

impl SpeechEngine for CloudSpeechEngine {
    fn begin(&self, text: &str) -> std::result::Result<(), String> {
        let generation = self.state.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.state.requested.store(generation, Ordering::Release);

        self.commands
            .send(Utterance {
                generation,
                text: text.to_string(),
            })
            .map_err(|_| "speech engine stopped".to_string())
    }

    fn is_running(&self) -> bool {
        if self.state.busy.load(Ordering::Acquire) {
            return true;
        }
        let requested = self.state.requested.load(Ordering::Acquire);
        self.state.is_current(requested) && self.state.finished.load(Ordering::Acquire) != requested
    }

    fn halt(&self) {
        self.state.generation.fetch_add(1, Ordering::AcqRel);
    }
}

fn run_engine(tts: &TextToSpeech, rx: &mpsc::Receiver<Utterance>, state: &EngineState) {
    for utterance in rx {
        if state.is_current(utterance.generation) {
            state.busy.store(true, Ordering::Release);
            if let Err(e) = speak_utterance(tts, &utterance, state) {
                tracing::error!(error = %e, "speech failed");
            }
            state.busy.store(false, Ordering::Release);
        }
        state.finished.store(utterance.generation, Ordering::Release);
    }

    tracing::debug!("speech engine stopped");
}

fn speak_utterance(tts: &TextToSpeech, utterance: &Utterance, state: &EngineState) -> Result<()> {
    for chunk in chunk_text(&utterance.text, MAX_CHUNK_CHARS) {
        if !state.is_current(utterance.generation) {
            tracing::debug!("utterance cancelled");
            return Ok(());
        }

        let mp3 = tts.synthesize(&chunk)?;
        let audio = decode_mp3(&mp3)?;
        play_blocking(&audio, || state.is_current(utterance.generation))?;
    }

    Ok(())
}

/// Play decoded audio on the default output device until done or cancelled
fn play_blocking(audio: &DecodedAudio, keep_going: impl Fn() -> bool) -> Result<()> {
    if audio.samples.is_empty() {
        return Ok(());
    }

    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

    let rate = SampleRate(audio.sample_rate);
    let supported = device
        .supported_output_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .filter(|c| c.min_sample_rate() <= rate && c.max_sample_rate() >= rate)
        .min_by_key(cpal::SupportedStreamConfigRange::channels)
        .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

    let config = supported.with_sample_rate(rate).config();
    let channels = usize::from(config.channels);

    let samples = Arc::new(audio.samples.clone());
    let position = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicBool::new(false));

    let cb_samples = Arc::clone(&samples);
    let cb_position = Arc::clone(&position);
    let cb_finished = Arc::clone(&finished);

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mut pos = cb_position.load(Ordering::Relaxed);
                for frame in data.chunks_mut(channels) {
                    let sample = cb_samples.get(pos).copied().unwrap_or_else(|| {
                        cb_finished.store(true, Ordering::Release);
                        0.0
                    });
                    frame.fill(sample);
                    if pos < cb_samples.len() {
                        pos += 1;
                    }
                }
                cb_position.store(pos, Ordering::Relaxed);
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    let duration_ms = (samples.len() as u64 * 1000) / u64::from(audio.sample_rate.max(1));
    let timeout = Duration::from_millis(duration_ms + 500);
    let start = Instant::now();

    while !finished.load(Ordering::Acquire) && start.elapsed() < timeout {
        if !keep_going() {
            tracing::debug!("playback interrupted");
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    drop(stream);
    tracing::debug!(samples = samples.len(), "chunk played");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(chunk_text("hello there", 200), ["hello there"]);
        assert!(chunk_text("   ", 200).is_empty());
    }

    #[test]
    fn chunks_break_on_words() {
        let chunks = chunk_text("one two three four", 9);
        assert_eq!(chunks, ["one two", "three", "four"]);
        assert!(chunks.iter().all(|c| c.chars().count() <= 9));
    }

    #[test]
    fn long_words_split_on_char_boundaries() {
        let chunks = chunk_text("ééééé ab", 2);
        assert_eq!(chunks, ["éé", "éé", "é", "ab"]);
    }

    #[test]
    fn decode_rejects_garbage() {
        let inputs: [&[u8]; 2] = [b"definitely not audio", b""];
        for data in inputs {
            assert!(matches!(
                decode_mp3(data),
                Err(Error::Audio(ref m)) if m == "no MP3 frames in data"
            ));
        }
    }

    #[test]
    fn halted_engine_state_is_idle() {
        let state = EngineState::default();
        state.generation.store(3, Ordering::SeqCst);
        state.requested.store(3, Ordering::SeqCst);
        assert!(state.is_current(3));

        state.generation.fetch_add(1, Ordering::SeqCst);
        assert!(!state.is_current(3));
    }
}
