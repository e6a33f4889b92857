//! Voice interaction state machine
//!
//! One trigger runs one session: a time-boxed recording, then
//! transcription, the assistant query, and the spoken reply. The session
//! runs on its own task, which owns the capture device until it finishes
//! and is the only writer of session state. The main loop only triggers
//! and reads.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Local};
use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::assistant::Assistant;
use crate::config::Config;
use crate::error::{PlaybackError, SessionError};
use crate::transcript::TranscriptSink;
use crate::voice::{AudioCapture, AudioPlayback, Transcriber};

/// Interval between playback checks while a reply is spoken
const SPEAKING_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Interaction pipeline state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionState {
    /// Waiting for a trigger
    Idle,
    /// Capturing audio
    Recording,
    /// Converting audio to text
    Transcribing,
    /// Waiting for the assistant
    Querying,
    /// Reply is being spoken
    Speaking,
    /// A stage failed; transient before `Idle`
    Failed,
}

impl InteractionState {
    /// Whether a session is in progress
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(
            self,
            Self::Recording | Self::Transcribing | Self::Querying | Self::Speaking
        )
    }
}

impl fmt::Display for InteractionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Recording => "recording",
            Self::Transcribing => "transcribing",
            Self::Querying => "querying",
            Self::Speaking => "speaking",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Result of a trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// A new session was started
    Started(u64),
    /// A session is active, playback is busy, or capture failed to start
    Ignored,
}

/// Record of the current or most recent session
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    /// Monotonic session id, starting at 1
    pub id: u64,

    /// When the trigger fired
    pub started_at: DateTime<Local>,

    /// Every state the session entered, in order
    pub states: Vec<InteractionState>,

    /// Samples captured
    pub captured_samples: usize,

    /// Transcription output
    pub transcript: Option<String>,

    /// Assistant reply
    pub reply: Option<String>,

    /// Why the session failed, if it did
    pub last_error: Option<SessionError>,
}

#[derive(Debug)]
struct Shared {
    state: InteractionState,
    session: Option<SessionSnapshot>,
}

/// Handle used by the session task to publish progress
#[derive(Clone)]
struct Tracker {
    shared: Arc<Mutex<Shared>>,
    id: u64,
}

impl Tracker {
    fn update(&self, apply: impl FnOnce(&mut SessionSnapshot)) {
        let mut shared = lock(&self.shared);
        if let Some(session) = shared.session.as_mut().filter(|s| s.id == self.id) {
            apply(session);
        }
    }

    fn enter(&self, state: InteractionState) {
        let mut shared = lock(&self.shared);
        shared.state = state;
        if let Some(session) = shared.session.as_mut().filter(|s| s.id == self.id) {
            session.states.push(state);
        }
        drop(shared);
        tracing::debug!(session = self.id, state = %state, "session state");
    }

    fn fail(&self, error: SessionError) {
        tracing::warn!(session = self.id, stage = error.stage(), error = %error, "session failed");
        self.update(|s| s.last_error = Some(error));
        self.enter(InteractionState::Failed);
        self.enter(InteractionState::Idle);
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Pipeline timing and phrases
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    /// Length of the recording time box
    pub record_duration: Duration,

    /// Sleep between capture polls
    pub poll_interval: Duration,

    /// Spoken when the assistant fails
    pub fallback_phrase: String,
}

impl ControllerOptions {
    /// Options from runtime configuration
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            record_duration: config.voice.record_duration,
            poll_interval: config.voice.poll_interval,
            fallback_phrase: config.assistant.fallback_phrase.clone(),
        }
    }
}

/// Everything a session task needs besides the capture device
#[derive(Clone)]
struct Pipeline {
    playback: Arc<AudioPlayback>,
    transcriber: Arc<dyn Transcriber>,
    assistant: Arc<dyn Assistant>,
    sink: TranscriptSink,
    options: ControllerOptions,
}

/// Drives sessions from trigger to spoken reply
pub struct InteractionController {
    shared: Arc<Mutex<Shared>>,
    capture: Option<AudioCapture>,
    worker: Option<JoinHandle<AudioCapture>>,
    pipeline: Pipeline,
    next_id: u64,
}

impl InteractionController {
    /// Create an idle controller
    #[must_use]
    pub fn new(
        capture: AudioCapture,
        playback: Arc<AudioPlayback>,
        transcriber: Arc<dyn Transcriber>,
        assistant: Arc<dyn Assistant>,
        sink: TranscriptSink,
        options: ControllerOptions,
    ) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                state: InteractionState::Idle,
                session: None,
            })),
            capture: Some(capture),
            worker: None,
            pipeline: Pipeline {
                playback,
                transcriber,
                assistant,
                sink,
                options,
            },
            next_id: 1,
        }
    }

    /// Start a session if none is active and playback is idle
    ///
    /// Must be called from within a tokio runtime. Triggers that fail the
    /// guard are ignored.
    pub fn trigger(&mut self) -> TriggerOutcome {
        self.reap();

        let state = self.state();
        if state.is_active() {
            tracing::debug!(state = %state, "trigger ignored: session active");
            return TriggerOutcome::Ignored;
        }

        if self.pipeline.playback.is_playing() {
            tracing::debug!("trigger ignored: still speaking");
            return TriggerOutcome::Ignored;
        }

        let Some(mut capture) = self.capture.take() else {
            tracing::debug!("trigger ignored: capture busy");
            return TriggerOutcome::Ignored;
        };

        if let Err(e) = capture.start() {
            tracing::error!(error = %e, "failed to start recording");
            self.pipeline.sink.append("capture", e.to_string());
            self.capture = Some(capture);
            return TriggerOutcome::Ignored;
        }

        let id = self.next_id;
        self.next_id += 1;

        {
            let mut shared = lock(&self.shared);
            shared.state = InteractionState::Recording;
            shared.session = Some(SessionSnapshot {
                id,
                started_at: Local::now(),
                states: vec![InteractionState::Recording],
                captured_samples: 0,
                transcript: None,
                reply: None,
                last_error: None,
            });
        }

        tracing::info!(session = id, "recording started");
        self.pipeline.sink.append("Mic", "Recording started...");

        let tracker = Tracker {
            shared: Arc::clone(&self.shared),
            id,
        };
        let pipeline = self.pipeline.clone();
        self.worker = Some(tokio::spawn(run_session(pipeline, tracker, capture)));

        TriggerOutcome::Started(id)
    }

    /// Periodic refresh from the main loop
    pub fn poll(&mut self) {
        self.reap();
    }

    /// Wait for the running session, if any, to finish
    pub async fn join(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.restore(worker.await);
        }
    }

    /// Current pipeline state
    #[must_use]
    pub fn state(&self) -> InteractionState {
        lock(&self.shared).state
    }

    /// Whether a recording is in progress
    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.state() == InteractionState::Recording
    }

    /// Whether a reply is being spoken
    #[must_use]
    pub fn is_speaking(&self) -> bool {
        self.pipeline.playback.is_playing()
    }

    /// Error of the most recent session, if it failed
    #[must_use]
    pub fn last_error(&self) -> Option<SessionError> {
        lock(&self.shared)
            .session
            .as_ref()
            .and_then(|s| s.last_error.clone())
    }

    /// Copy of the current or most recent session record
    #[must_use]
    pub fn snapshot(&self) -> Option<SessionSnapshot> {
        lock(&self.shared).session.clone()
    }

    fn reap(&mut self) {
        let finished = self.worker.as_ref().is_some_and(JoinHandle::is_finished);
        if !finished {
            return;
        }

        if let Some(result) = self.worker.take().and_then(FutureExt::now_or_never) {
            self.restore(result);
        }
    }

    fn restore(&mut self, result: Result<AudioCapture, tokio::task::JoinError>) {
        match result {
            Ok(capture) => self.capture = Some(capture),
            Err(e) => {
                tracing::error!(error = %e, "session task cancelled, capture unavailable");
                let error = SessionError::Aborted(e.to_string());
                self.pipeline
                    .sink
                    .append("Error", format!("{}: {error}", error.stage()));

                let mut shared = lock(&self.shared);
                shared.state = InteractionState::Idle;
                if let Some(session) = shared.session.as_mut() {
                    session.last_error = Some(error);
                }
            }
        }
    }
}

async fn run_session(
    pipeline: Pipeline,
    tracker: Tracker,
    mut capture: AudioCapture,
) -> AudioCapture {
    let result = AssertUnwindSafe(drive_session(&pipeline, &tracker, &mut capture))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(SessionError::Aborted(panic_message(panic.as_ref()))));

    if capture.is_active() {
        let _ = capture.stop();
    }

    match result {
        Ok(()) => {
            tracker.enter(InteractionState::Idle);
            tracing::info!(session = tracker.id, "session complete");
        }
        Err(error) => {
            if !matches!(error, SessionError::Assistant(_)) {
                pipeline
                    .sink
                    .append("Error", format!("{}: {error}", error.stage()));
            }
            tracker.fail(error);
        }
    }

    capture
}

async fn drive_session(
    pipeline: &Pipeline,
    tracker: &Tracker,
    capture: &mut AudioCapture,
) -> Result<(), SessionError> {
    let deadline = Instant::now() + pipeline.options.record_duration;
    while Instant::now() < deadline && !capture.is_full() {
        capture.poll();
        tokio::time::sleep(pipeline.options.poll_interval).await;
    }
    capture.poll();

    let buffer = capture.stop()?;
    let samples = buffer.sample_count();
    tracker.update(|s| s.captured_samples = samples);
    tracing::info!(session = tracker.id, samples, "recording finished");

    if buffer.is_empty() {
        pipeline.sink.append("Mic", "No audio recorded");
        return Err(SessionError::NoAudioCaptured);
    }

    tracker.enter(InteractionState::Transcribing);
    pipeline.sink.append("STT", "Processing audio...");

    let text = pipeline.transcriber.transcribe(buffer).await?;
    let text = text.trim().to_string();
    if text.is_empty() {
        return Err(SessionError::EmptyTranscript);
    }

    pipeline.sink.append("You", text.as_str());
    tracker.update(|s| s.transcript = Some(text.clone()));

    tracker.enter(InteractionState::Querying);
    let reply = match pipeline.assistant.query(&text).await {
        Ok(reply) => reply,
        Err(e) => {
            pipeline.sink.append("Error", format!("assistant: {e}"));
            if let Err(speak_err) = speak(pipeline, &pipeline.options.fallback_phrase).await {
                tracing::warn!(error = %speak_err, "fallback phrase not spoken");
            }
            return Err(e.into());
        }
    };

    pipeline.sink.append("Gemini", reply.as_str());
    tracker.update(|s| s.reply = Some(reply.clone()));

    tracker.enter(InteractionState::Speaking);
    speak(pipeline, &reply).await?;

    while pipeline.playback.is_playing() {
        tokio::time::sleep(SPEAKING_POLL_INTERVAL).await;
    }

    Ok(())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Speak on the blocking pool; `speak` may sleep while stopping a prior utterance
async fn speak(pipeline: &Pipeline, text: &str) -> Result<(), PlaybackError> {
    let playback = Arc::clone(&pipeline.playback);
    let text = text.to_string();

    tokio::task::spawn_blocking(move || playback.speak(&text))
        .await
        .map_err(|e| PlaybackError::StartFailed(e.to_string()))?
}
