//! Shared test utilities

#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::Router;
use axum::body::Bytes;
use axum::http::{StatusCode, Uri};
use parley::assistant::Assistant;
use parley::error::{AssistantError, CaptureError};
use parley::transcript::{self, TranscriptLog};
use parley::voice::{
    AmplitudeTranscriber, AudioCapture, AudioPlayback, Microphone, SAMPLE_RATE, SpeechEngine,
    Transcriber,
};
use parley::{ControllerOptions, InteractionController, NetworkStatus};

pub const FALLBACK: &str = "Sorry, please try again.";

/// Widen a 16-bit sample to the microphone's left-justified 32-bit format
#[must_use]
pub const fn widen(sample: i16) -> i32 {
    (sample as i32) << 16
}

/// Microphone that hands out a fixed script of samples
pub struct ScriptedMic {
    pending: VecDeque<i32>,
    script: Vec<i32>,
    fail_start: bool,
}

impl ScriptedMic {
    pub fn new(script: Vec<i32>) -> Self {
        Self {
            pending: VecDeque::new(),
            script,
            fail_start: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_start: true,
            ..Self::new(Vec::new())
        }
    }
}

impl Microphone for ScriptedMic {
    fn start(&mut self) -> Result<(), CaptureError> {
        if self.fail_start {
            return Err(CaptureError::Device("no input device".to_string()));
        }
        self.pending = self.script.iter().copied().collect();
        Ok(())
    }

    fn stop(&mut self) {
        self.pending.clear();
    }

    fn read(&mut self, out: &mut [i32]) -> usize {
        let count = out.len().min(self.pending.len());
        for (slot, sample) in out.iter_mut().zip(self.pending.drain(..count)) {
            *slot = sample;
        }
        count
    }
}

/// Speech engine that "plays" each utterance for a fixed time
pub struct FakeSpeechEngine {
    pub spoken: Mutex<Vec<String>>,
    busy_until: Mutex<Option<Instant>>,
    play_time: Duration,
    refuse: AtomicBool,
}

impl FakeSpeechEngine {
    pub fn new(play_time: Duration) -> Arc<Self> {
        Arc::new(Self {
            spoken: Mutex::new(Vec::new()),
            busy_until: Mutex::new(None),
            play_time,
            refuse: AtomicBool::new(false),
        })
    }

    pub fn refuse_next(&self) {
        self.refuse.store(true, Ordering::SeqCst);
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }
}

impl SpeechEngine for FakeSpeechEngine {
    fn begin(&self, text: &str) -> Result<(), String> {
        if self.refuse.swap(false, Ordering::SeqCst) {
            return Err("speaker offline".to_string());
        }
        self.spoken.lock().unwrap().push(text.to_string());
        *self.busy_until.lock().unwrap() = Some(Instant::now() + self.play_time);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.busy_until
            .lock()
            .unwrap()
            .is_some_and(|until| Instant::now() < until)
    }

    fn halt(&self) {
        *self.busy_until.lock().unwrap() = None;
    }
}

/// Assistant returning a canned result and recording prompts
pub struct StubAssistant {
    pub prompts: Mutex<Vec<String>>,
    result: Result<String, AssistantError>,
}

impl StubAssistant {
    pub fn replying(text: &str) -> Arc<Self> {
        Arc::new(Self {
            prompts: Mutex::new(Vec::new()),
            result: Ok(text.to_string()),
        })
    }

    pub fn failing(error: AssistantError) -> Arc<Self> {
        Arc::new(Self {
            prompts: Mutex::new(Vec::new()),
            result: Err(error),
        })
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Assistant for StubAssistant {
    async fn query(&self, prompt: &str) -> Result<String, AssistantError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.result.clone()
    }
}

/// Controller wired to test doubles
pub struct Harness {
    pub controller: InteractionController,
    pub playback: Arc<AudioPlayback>,
    pub engine: Arc<FakeSpeechEngine>,
    pub log: TranscriptLog,
}

impl Harness {
    /// Tags and texts of all chat lines so far
    pub fn chat(&mut self) -> Vec<(String, String)> {
        self.log.drain();
        self.log
            .lines()
            .iter()
            .map(|l| (l.tag.clone(), l.text.clone()))
            .collect()
    }
}

pub fn options() -> ControllerOptions {
    ControllerOptions {
        record_duration: Duration::from_millis(100),
        poll_interval: Duration::from_millis(5),
        fallback_phrase: FALLBACK.to_string(),
    }
}

/// Build a harness around a microphone script and an assistant
pub fn harness(mic: ScriptedMic, assistant: Arc<dyn Assistant>) -> Harness {
    let transcriber = Arc::new(AmplitudeTranscriber::new(
        Arc::new(NetworkStatus::new(true)),
        100,
    ));
    harness_with(mic, transcriber, assistant)
}

pub fn harness_with(
    mic: ScriptedMic,
    transcriber: Arc<dyn Transcriber>,
    assistant: Arc<dyn Assistant>,
) -> Harness {
    let engine = FakeSpeechEngine::new(Duration::from_millis(50));
    let playback = Arc::new(AudioPlayback::new(
        Arc::clone(&engine) as Arc<dyn SpeechEngine>,
        Duration::from_millis(200),
        Duration::ZERO,
    ));
    let capture = AudioCapture::new(Box::new(mic), SAMPLE_RATE, SAMPLE_RATE as usize, 256);
    let (sink, log) = transcript::channel(64, 64);

    let controller = InteractionController::new(
        capture,
        Arc::clone(&playback),
        transcriber,
        assistant,
        sink,
        options(),
    );

    Harness {
        controller,
        playback,
        engine,
        log,
    }
}

/// Requests seen by the mock Gemini server: `(method path?query, body)`
pub type SeenRequests = Arc<Mutex<Vec<(String, String)>>>;

/// Serve a fixed response on every path at a random local port
pub async fn spawn_mock_gemini(status: StatusCode, body: &'static str) -> (SocketAddr, SeenRequests) {
    let seen: SeenRequests = Arc::new(Mutex::new(Vec::new()));
    let record = Arc::clone(&seen);

    let app = Router::new().fallback(move |method: axum::http::Method, uri: Uri, payload: Bytes| {
        let record = Arc::clone(&record);
        async move {
            record.lock().unwrap().push((
                format!("{method} {uri}"),
                String::from_utf8_lossy(&payload).into_owned(),
            ));
            (status, [("content-type", "application/json")], body)
        }
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, seen)
}
