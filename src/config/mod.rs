//! Configuration management for Parley
//!
//! Defaults, overlaid by `config.toml`, overlaid by `PARLEY_*` environment
//! variables. Device credentials live separately in [`SettingsStore`].

pub mod file;
pub mod settings;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;

pub use file::ParleyConfigFile;
pub use settings::{DeviceSettings, SettingsStore};

use crate::Result;

/// Default assistant API base URL
pub const DEFAULT_ASSISTANT_URL: &str = "https://generativelanguage.googleapis.com";

/// Default assistant model
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Default speech synthesis endpoint
pub const DEFAULT_TTS_ENDPOINT: &str = "https://translate.google.com/translate_tts";

/// Default connectivity probe
pub const DEFAULT_PROBE_URL: &str = "http://clients3.google.com/generate_204";

/// Phrase spoken when the assistant fails
pub const DEFAULT_FALLBACK_PHRASE: &str = "Sorry, something went wrong. Please try again.";

/// Parley runtime configuration
#[derive(Debug)]
pub struct Config {
    /// Where device settings are persisted
    pub settings_path: PathBuf,

    /// Device credentials (Wi-Fi + API key)
    pub settings: DeviceSettings,

    /// Recording and speech output
    pub voice: VoiceConfig,

    /// Language-model endpoint
    pub assistant: AssistantConfig,

    /// Connectivity probing
    pub network: NetworkConfig,

    /// Configuration portal
    pub portal: PortalConfig,

    /// Chat log
    pub transcript: TranscriptConfig,
}

/// Recording and speech output configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Capture sample rate in Hz
    pub sample_rate: u32,

    /// Length of the time-boxed recording
    pub record_duration: Duration,

    /// Hardware samples drained per capture poll
    pub read_chunk: usize,

    /// Delay between capture polls
    pub poll_interval: Duration,

    /// Placeholder transcriber threshold (mean absolute amplitude)
    pub speech_threshold: u32,

    /// Speech synthesis endpoint
    pub tts_endpoint: String,

    /// Speech synthesis language
    pub tts_language: String,

    /// Upper bound on waiting for the speaker to go idle after a stop
    pub stop_timeout: Duration,

    /// Pause after a forced stop before starting the next utterance
    pub settle_delay: Duration,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            record_duration: Duration::from_secs(5),
            read_chunk: 1024,
            poll_interval: Duration::from_millis(10),
            speech_threshold: 100,
            tts_endpoint: DEFAULT_TTS_ENDPOINT.to_string(),
            tts_language: "en".to_string(),
            stop_timeout: Duration::from_secs(1),
            settle_delay: Duration::from_millis(300),
        }
    }
}

impl VoiceConfig {
    /// Capacity of the recording buffer in samples
    #[must_use]
    pub fn max_samples(&self) -> usize {
        let samples = u128::from(self.sample_rate) * self.record_duration.as_millis() / 1000;
        usize::try_from(samples).unwrap_or(usize::MAX)
    }
}

/// Assistant endpoint configuration
#[derive(Debug, Clone)]
pub struct AssistantConfig {
    /// API base URL
    pub base_url: String,

    /// Model identifier
    pub model: String,

    /// Reply length cap
    pub max_output_tokens: u32,

    /// Sampling temperature
    pub temperature: f32,

    /// Timeout for a query
    pub request_timeout: Duration,

    /// Timeout for the startup key check
    pub key_check_timeout: Duration,

    /// Phrase spoken when a query fails
    pub fallback_phrase: String,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_ASSISTANT_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_output_tokens: 100,
            temperature: 0.7,
            request_timeout: Duration::from_secs(30),
            key_check_timeout: Duration::from_secs(15),
            fallback_phrase: DEFAULT_FALLBACK_PHRASE.to_string(),
        }
    }
}

/// Connectivity probe configuration
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// URL answering 204 when online
    pub probe_url: String,

    /// Interval between probes
    pub probe_interval: Duration,

    /// Timeout for one probe
    pub probe_timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            probe_url: DEFAULT_PROBE_URL.to_string(),
            probe_interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(15),
        }
    }
}

/// Configuration portal
#[derive(Debug, Clone)]
pub struct PortalConfig {
    /// Listen address
    pub bind: SocketAddr,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }
}

/// Chat log configuration
#[derive(Debug, Clone)]
pub struct TranscriptConfig {
    /// Pending line queue capacity
    pub queue_capacity: usize,

    /// Lines kept on screen
    pub retained_lines: usize,
}

impl Default for TranscriptConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            retained_lines: 200,
        }
    }
}

impl Config {
    /// Load configuration from the default or an explicit config file
    ///
    /// # Errors
    ///
    /// Returns error if the settings file exists but is unreadable
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let path = config_path
            .map(Path::to_path_buf)
            .or_else(file::config_file_path);
        let file = path
            .as_deref()
            .map(file::load_config_file)
            .unwrap_or_default();

        Self::from_sources(file, |key| std::env::var(key).ok())
    }

    /// Build configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if the settings file exists but is unreadable
    pub fn from_sources(
        file: ParleyConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let settings_path = env("PARLEY_SETTINGS_PATH")
            .or(file.settings_path)
            .map_or_else(SettingsStore::default_path, PathBuf::from);

        let mut settings = SettingsStore::new(settings_path.clone()).load()?;
        if let Some(key) = env("PARLEY_API_KEY").filter(|k| !k.is_empty()) {
            settings.api_key = SecretString::from(key);
        }

        let mut voice = VoiceConfig::default();
        if let Some(rate) = file.voice.sample_rate {
            voice.sample_rate = rate;
        }
        if let Some(ms) = parse_env(&env, "PARLEY_RECORD_MS").or(file.voice.record_ms) {
            voice.record_duration = Duration::from_millis(ms);
        }
        if let Some(threshold) = file.voice.speech_threshold {
            voice.speech_threshold = threshold;
        }
        if let Some(endpoint) = file.voice.tts_endpoint {
            voice.tts_endpoint = endpoint;
        }
        if let Some(language) = env("PARLEY_TTS_LANGUAGE").or(file.voice.tts_language) {
            voice.tts_language = language;
        }
        if let Some(ms) = file.voice.stop_timeout_ms {
            voice.stop_timeout = Duration::from_millis(ms);
        }

        let mut assistant = AssistantConfig::default();
        if let Some(url) = env("PARLEY_ASSISTANT_URL").or(file.assistant.base_url) {
            assistant.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(model) = env("PARLEY_MODEL").or(file.assistant.model) {
            assistant.model = model;
        }
        if let Some(tokens) = file.assistant.max_output_tokens {
            assistant.max_output_tokens = tokens;
        }
        if let Some(temperature) = file.assistant.temperature {
            assistant.temperature = temperature;
        }
        if let Some(secs) = file.assistant.timeout_secs {
            assistant.request_timeout = Duration::from_secs(secs);
        }
        if let Some(phrase) = file.assistant.fallback_phrase {
            assistant.fallback_phrase = phrase;
        }

        let mut network = NetworkConfig::default();
        if let Some(url) = env("PARLEY_PROBE_URL").or(file.network.probe_url) {
            network.probe_url = url;
        }
        if let Some(secs) = file.network.probe_interval_secs {
            network.probe_interval = Duration::from_secs(secs.max(1));
        }

        let mut portal = PortalConfig::default();
        if let Some(bind) = env("PARLEY_PORTAL_ADDR").or(file.portal.bind) {
            match bind.parse() {
                Ok(addr) => portal.bind = addr,
                Err(e) => tracing::warn!(bind = %bind, error = %e, "invalid portal address, using default"),
            }
        }

        let mut transcript = TranscriptConfig::default();
        if let Some(capacity) = file.transcript.queue_capacity {
            transcript.queue_capacity = capacity.max(1);
        }
        if let Some(lines) = file.transcript.retained_lines {
            transcript.retained_lines = lines;
        }

        Ok(Self {
            settings_path,
            settings,
            voice,
            assistant,
            network,
            portal,
            transcript,
        })
    }

    /// Store handle for the device settings
    #[must_use]
    pub fn settings_store(&self) -> SettingsStore {
        SettingsStore::new(self.settings_path.clone())
    }
}

fn parse_env<T: std::str::FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = env(key)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable environment override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_device_constants() {
        let dir = tempfile::tempdir().unwrap();
        let settings = dir.path().join("settings.toml");
        let config = Config::from_sources(
            ParleyConfigFile::default(),
            env_from(&[("PARLEY_SETTINGS_PATH", settings.to_str().unwrap())]),
        )
        .unwrap();

        assert_eq!(config.voice.sample_rate, 16_000);
        assert_eq!(config.voice.record_duration, Duration::from_secs(5));
        assert_eq!(config.voice.max_samples(), 80_000);
        assert_eq!(config.assistant.max_output_tokens, 100);
        assert!((config.assistant.temperature - 0.7).abs() < f32::EPSILON);
        assert!(!config.settings.has_api_key());
    }

    #[test]
    fn env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let settings = dir.path().join("settings.toml");
        let file: ParleyConfigFile = toml::from_str(
            r#"
            [voice]
            record_ms = 3000

            [assistant]
            model = "from-file"
            base_url = "http://file.invalid/"
            "#,
        )
        .unwrap();

        let config = Config::from_sources(
            file,
            env_from(&[
                ("PARLEY_SETTINGS_PATH", settings.to_str().unwrap()),
                ("PARLEY_MODEL", "from-env"),
                ("PARLEY_API_KEY", "env-key"),
                ("PARLEY_RECORD_MS", "not-a-number"),
            ]),
        )
        .unwrap();

        assert_eq!(config.assistant.model, "from-env");
        assert_eq!(config.assistant.base_url, "http://file.invalid");
        assert_eq!(config.voice.record_duration, Duration::from_millis(3000));
        assert_eq!(config.settings.api_key.expose_secret(), "env-key");
    }

    #[test]
    fn invalid_portal_address_keeps_default() {
        let dir = tempfile::tempdir().unwrap();
        let settings = dir.path().join("settings.toml");
        let config = Config::from_sources(
            ParleyConfigFile::default(),
            env_from(&[
                ("PARLEY_SETTINGS_PATH", settings.to_str().unwrap()),
                ("PARLEY_PORTAL_ADDR", "nowhere"),
            ]),
        )
        .unwrap();

        assert_eq!(config.portal.bind.port(), 8080);
    }
}
