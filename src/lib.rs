//! Parley - push-to-talk voice assistant device runtime
//!
//! This library provides the pieces of a small voice assistant:
//! - Voice capture, placeholder transcription, and cloud speech output
//! - A Gemini client for short conversational replies
//! - The interaction state machine tying them together
//! - A configuration portal for Wi-Fi and API key setup
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  Device main loop                   │
//! │   Talk trigger  │  Chat screen  │  Status polling   │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │              InteractionController                  │
//! │   Record  →  Transcribe  →  Query  →  Speak         │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                   Peripherals                       │
//! │   Microphone  │  Speech engine  │  Gemini  │  Wi-Fi │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod assistant;
pub mod config;
pub mod controller;
pub mod device;
pub mod error;
pub mod network;
pub mod portal;
pub mod transcript;
pub mod voice;

pub use assistant::{Assistant, GeminiClient};
pub use config::Config;
pub use controller::{
    ControllerOptions, InteractionController, InteractionState, SessionSnapshot, TriggerOutcome,
};
pub use device::Device;
pub use error::{Error, Result};
pub use network::NetworkStatus;
pub use transcript::{ChatLine, TranscriptLog, TranscriptSink};
