//! TOML configuration file loading
//!
//! Supports `~/.config/parley/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct ParleyConfigFile {
    /// Path of the persisted device settings (Wi-Fi + API key)
    #[serde(default)]
    pub settings_path: Option<String>,

    /// Recording and speech output
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// Language-model endpoint
    #[serde(default)]
    pub assistant: AssistantFileConfig,

    /// Connectivity probing
    #[serde(default)]
    pub network: NetworkFileConfig,

    /// Configuration portal
    #[serde(default)]
    pub portal: PortalFileConfig,

    /// Chat log
    #[serde(default)]
    pub transcript: TranscriptFileConfig,
}

/// Voice configuration overlay
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// Capture sample rate in Hz
    pub sample_rate: Option<u32>,

    /// Length of the time-boxed recording in milliseconds
    pub record_ms: Option<u64>,

    /// Mean absolute amplitude above which the placeholder transcriber reports speech
    pub speech_threshold: Option<u32>,

    /// Speech synthesis endpoint
    pub tts_endpoint: Option<String>,

    /// Speech synthesis language code (e.g. "en", "vi")
    pub tts_language: Option<String>,

    /// Upper bound on waiting for the speaker to go idle, in milliseconds
    pub stop_timeout_ms: Option<u64>,
}

/// Assistant configuration overlay
#[derive(Debug, Default, Deserialize)]
pub struct AssistantFileConfig {
    /// API base URL
    pub base_url: Option<String>,

    /// Model identifier (e.g. "gemini-2.0-flash")
    pub model: Option<String>,

    /// Reply length cap sent with every request
    pub max_output_tokens: Option<u32>,

    /// Sampling temperature sent with every request
    pub temperature: Option<f32>,

    /// Request timeout in seconds
    pub timeout_secs: Option<u64>,

    /// Phrase spoken when the assistant cannot answer
    pub fallback_phrase: Option<String>,
}

/// Network configuration overlay
#[derive(Debug, Default, Deserialize)]
pub struct NetworkFileConfig {
    /// URL answering 204 when the internet is reachable
    pub probe_url: Option<String>,

    /// Seconds between connectivity probes
    pub probe_interval_secs: Option<u64>,
}

/// Portal configuration overlay
#[derive(Debug, Default, Deserialize)]
pub struct PortalFileConfig {
    /// Listen address (e.g. "0.0.0.0:8080")
    pub bind: Option<String>,
}

/// Transcript configuration overlay
#[derive(Debug, Default, Deserialize)]
pub struct TranscriptFileConfig {
    /// Pending line queue capacity
    pub queue_capacity: Option<usize>,

    /// Lines kept on screen
    pub retained_lines: Option<usize>,
}

/// Load a TOML config file
///
/// Returns `ParleyConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file(path: &Path) -> ParleyConfigFile {
    if !path.exists() {
        return ParleyConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                ParleyConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            ParleyConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/parley/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("parley").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_overlay_parses() {
        let file: ParleyConfigFile = toml::from_str(
            r#"
            [voice]
            record_ms = 3000
            tts_language = "vi"

            [assistant]
            temperature = 0.2
            "#,
        )
        .unwrap();

        assert_eq!(file.voice.record_ms, Some(3000));
        assert_eq!(file.voice.tts_language.as_deref(), Some("vi"));
        assert_eq!(file.voice.sample_rate, None);
        assert_eq!(file.assistant.temperature, Some(0.2));
        assert!(file.portal.bind.is_none());
    }

    #[test]
    fn unparseable_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[voice\nrecord_ms = ").unwrap();

        let file = load_config_file(&path);
        assert!(file.voice.record_ms.is_none());
    }

    #[test]
    fn missing_file_is_default() {
        let file = load_config_file(Path::new("/nonexistent/parley/config.toml"));
        assert!(file.settings_path.is_none());
    }
}
