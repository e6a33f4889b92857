//! Speech output
//!
//! [`AudioPlayback`] owns the "speaking" flag and fronts a [`SpeechEngine`],
//! which renders audio on its own background thread. `speak` returns as soon
//! as the engine has accepted the utterance.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, TryLockError};
use std::time::{Duration, Instant};

use crate::error::PlaybackError;

/// Interval between peripheral status checks while waiting for a stop
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Short phrase tried once when the engine refuses an utterance
pub const SPEECH_ERROR_PHRASE: &str = "Sorry, speech error";

/// Speech peripheral driven by [`AudioPlayback`]
pub trait SpeechEngine: Send + Sync {
    /// Accept an utterance for asynchronous playback
    ///
    /// # Errors
    ///
    /// Returns a description of the failure if the engine refuses the text
    fn begin(&self, text: &str) -> Result<(), String>;

    /// Whether the peripheral is producing (or about to produce) audio
    fn is_running(&self) -> bool;

    /// Request an immediate halt; does not wait
    fn halt(&self);
}

/// Speaks one utterance at a time
pub struct AudioPlayback {
    engine: Option<Arc<dyn SpeechEngine>>,
    speaking: AtomicBool,
    sequence: Mutex<()>,
    stop_timeout: Duration,
    settle_delay: Duration,
}

impl AudioPlayback {
    /// Create playback over an engine
    ///
    /// `stop_timeout` bounds how long [`stop`](Self::stop) waits for the
    /// engine to go idle; `settle_delay` is the pause after interrupting an
    /// utterance before starting the next one.
    #[must_use]
    pub fn new(
        engine: Arc<dyn SpeechEngine>,
        stop_timeout: Duration,
        settle_delay: Duration,
    ) -> Self {
        Self {
            engine: Some(engine),
            speaking: AtomicBool::new(false),
            sequence: Mutex::new(()),
            stop_timeout,
            settle_delay,
        }
    }

    /// Playback with no engine attached; every `speak` fails
    #[must_use]
    pub const fn uninitialized() -> Self {
        Self {
            engine: None,
            speaking: AtomicBool::new(false),
            sequence: Mutex::new(()),
            stop_timeout: Duration::ZERO,
            settle_delay: Duration::ZERO,
        }
    }

    /// Speak `text`, interrupting any utterance in progress
    ///
    /// # Errors
    ///
    /// Returns [`PlaybackError::NotInitialized`] without an engine,
    /// [`PlaybackError::EmptyText`] if nothing is left after sanitizing, or
    /// [`PlaybackError::StartFailed`] if the engine refuses the utterance.
    /// A refused utterance is followed by one attempt to speak
    /// [`SPEECH_ERROR_PHRASE`]; the error is returned either way.
    pub fn speak(&self, text: &str) -> Result<(), PlaybackError> {
        let Some(engine) = &self.engine else {
            tracing::error!("speech output not initialized");
            return Err(PlaybackError::NotInitialized);
        };

        let clean = sanitize_for_speech(text);
        if clean.is_empty() {
            tracing::warn!("empty text for speech");
            return Err(PlaybackError::EmptyText);
        }

        let _guard = self
            .sequence
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if self.speaking.load(Ordering::Acquire) || engine.is_running() {
            tracing::warn!("stopping previous utterance");
            self.halt_and_wait(engine.as_ref());
            std::thread::sleep(self.settle_delay);
        }

        tracing::info!(chars = clean.chars().count(), "speaking");

        if let Err(e) = engine.begin(&clean) {
            tracing::error!(error = %e, "failed to start speech");

            if clean != SPEECH_ERROR_PHRASE {
                std::thread::sleep(self.settle_delay);
                match engine.begin(SPEECH_ERROR_PHRASE) {
                    Ok(()) => self.speaking.store(true, Ordering::Release),
                    Err(retry) => tracing::error!(error = %retry, "failed to start apology"),
                }
            }

            return Err(PlaybackError::StartFailed(e));
        }

        self.speaking.store(true, Ordering::Release);
        Ok(())
    }

    /// Whether an utterance is playing
    ///
    /// Re-checks the peripheral and clears a stale flag. While a `speak` or
    /// `stop` is in progress the flag is left alone and playback counts as
    /// active.
    pub fn is_playing(&self) -> bool {
        let Some(engine) = &self.engine else {
            return false;
        };

        let _guard = match self.sequence.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return true,
        };

        if self.speaking.load(Ordering::Acquire) && !engine.is_running() {
            self.speaking.store(false, Ordering::Release);
            tracing::debug!("speech finished");
        }

        self.speaking.load(Ordering::Acquire)
    }

    /// Periodic status refresh from the main loop
    pub fn poll(&self) {
        let _ = self.is_playing();
    }

    /// Stop playback, waiting a bounded time for the peripheral to go idle
    pub fn stop(&self) {
        let Some(engine) = &self.engine else {
            return;
        };

        let _guard = self
            .sequence
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if self.speaking.load(Ordering::Acquire) || engine.is_running() {
            tracing::info!("stopping speech");
            self.halt_and_wait(engine.as_ref());
        }
    }

    /// Whether an engine is attached
    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        self.engine.is_some()
    }

    fn halt_and_wait(&self, engine: &dyn SpeechEngine) {
        engine.halt();
        self.speaking.store(false, Ordering::Release);

        let deadline = Instant::now() + self.stop_timeout;
        while engine.is_running() && Instant::now() < deadline {
            std::thread::sleep(STOP_POLL_INTERVAL);
        }

        if engine.is_running() {
            tracing::error!(
                timeout_ms = self.stop_timeout.as_millis(),
                "speech engine still running after stop, continuing anyway"
            );
        }
    }
}

/// Prepare text for the synthesizer
///
/// Line breaks and tabs become spaces, other control characters and
/// characters the synthesizer reads out literally (quotes, backslashes,
/// markdown emphasis) are dropped, and whitespace is collapsed.
#[must_use]
pub fn sanitize_for_speech(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;

    for c in text.chars() {
        if c.is_whitespace() {
            pending_space = true;
            continue;
        }
        if c.is_control() || matches!(c, '"' | '\\' | '*' | '#' | '`') {
            continue;
        }
        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;
        out.push(c);
    }

    out
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    /// Engine whose "running" state is toggled by the test
    #[derive(Default)]
    struct FakeEngine {
        running: AtomicBool,
        ignore_halt: bool,
        refuse: bool,
        begin_delay: Duration,
        attempts: AtomicUsize,
        begun: Mutex<Vec<String>>,
        halts: AtomicUsize,
    }

    impl SpeechEngine for FakeEngine {
        fn begin(&self, text: &str) -> Result<(), String> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.begin_delay);
            if self.refuse {
                return Err("busy".to_string());
            }
            self.running.store(true, Ordering::SeqCst);
            self.begun.lock().unwrap().push(text.to_string());
            Ok(())
        }

        fn is_running(&self) -> bool {
            self.running.load(Ordering::SeqCst)
        }

        fn halt(&self) {
            self.halts.fetch_add(1, Ordering::SeqCst);
            if !self.ignore_halt {
                self.running.store(false, Ordering::SeqCst);
            }
        }
    }

    fn playback(engine: &Arc<FakeEngine>) -> AudioPlayback {
        AudioPlayback::new(
            Arc::clone(engine) as Arc<dyn SpeechEngine>,
            Duration::from_millis(60),
            Duration::ZERO,
        )
    }

    #[test]
    fn sanitize_strips_unspeakable_characters() {
        assert_eq!(
            sanitize_for_speech("  \"Hello\"\r\n**world**\\\t# ok\u{0}  "),
            "Hello world ok"
        );
        assert_eq!(sanitize_for_speech("Xin chào"), "Xin chào");
        assert_eq!(sanitize_for_speech("\n\r\t"), "");
    }

    #[test]
    fn speak_without_engine_fails() {
        let playback = AudioPlayback::uninitialized();
        assert_eq!(playback.speak("hi"), Err(PlaybackError::NotInitialized));
        assert!(!playback.is_playing());
    }

    #[test]
    fn speak_rejects_blank_text() {
        let engine = Arc::new(FakeEngine::default());
        let playback = playback(&engine);
        assert_eq!(playback.speak(" \"\" \n"), Err(PlaybackError::EmptyText));
        assert!(engine.begun.lock().unwrap().is_empty());
    }

    #[test]
    fn is_playing_heals_stale_flag() {
        let engine = Arc::new(FakeEngine::default());
        let playback = playback(&engine);

        playback.speak("hello").unwrap();
        assert!(playback.is_playing());

        engine.running.store(false, Ordering::SeqCst);
        assert!(!playback.is_playing());
    }

    #[test]
    fn speak_while_playing_stops_first() {
        let engine = Arc::new(FakeEngine::default());
        let playback = playback(&engine);

        playback.speak("first").unwrap();
        playback.speak("second").unwrap();

        assert_eq!(engine.halts.load(Ordering::SeqCst), 1);
        assert_eq!(*engine.begun.lock().unwrap(), ["first", "second"]);
        assert!(playback.is_playing());
    }

    #[test]
    fn stop_gives_up_on_stuck_engine() {
        let engine = Arc::new(FakeEngine {
            ignore_halt: true,
            ..FakeEngine::default()
        });
        let playback = playback(&engine);
        playback.speak("stuck").unwrap();

        let started = Instant::now();
        playback.stop();

        assert!(started.elapsed() >= Duration::from_millis(60));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(engine.is_running());
    }

    #[test]
    fn concurrent_polls_do_not_clear_flag_during_speak() {
        let engine = Arc::new(FakeEngine {
            begin_delay: Duration::from_millis(50),
            ..FakeEngine::default()
        });
        let playback = playback(&engine);
        let done = AtomicBool::new(false);

        std::thread::scope(|scope| {
            scope.spawn(|| {
                while !done.load(Ordering::SeqCst) {
                    playback.poll();
                    std::thread::sleep(Duration::from_millis(5));
                }
            });

            playback.speak("slow start").unwrap();
            done.store(true, Ordering::SeqCst);
        });

        assert!(engine.is_running());
        assert!(playback.is_playing());
    }

    #[test]
    fn refused_utterance_tries_apology_once() {
        let engine = Arc::new(FakeEngine {
            refuse: true,
            ..FakeEngine::default()
        });
        let playback = playback(&engine);

        assert_eq!(
            playback.speak("hello"),
            Err(PlaybackError::StartFailed("busy".to_string()))
        );
        assert_eq!(engine.attempts.load(Ordering::SeqCst), 2);
        assert!(!playback.is_playing());

        assert_eq!(
            playback.speak(SPEECH_ERROR_PHRASE),
            Err(PlaybackError::StartFailed("busy".to_string()))
        );
        assert_eq!(engine.attempts.load(Ordering::SeqCst), 3);
    }
}
