//! Language-model client
//!
//! Sends one prompt to a Gemini `generateContent` endpoint and extracts the
//! first candidate's text. Failures are typed so the pipeline can tell a
//! quota error from a dropped connection.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::config::AssistantConfig;
use crate::error::AssistantError;
use crate::network::NetworkStatus;
use crate::{Error, Result};

/// Answers a prompt with a short reply
#[async_trait]
pub trait Assistant: Send + Sync {
    /// Ask the model
    ///
    /// # Errors
    ///
    /// Returns an [`AssistantError`] describing why no reply is available
    async fn query(&self, prompt: &str) -> std::result::Result<String, AssistantError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize, Default)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    error: Option<ErrorBody>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ReplyPart>,
}

#[derive(Deserialize)]
struct ReplyPart {
    text: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// Client for the Gemini REST API
pub struct GeminiClient {
    client: reqwest::Client,
    api_key: SecretString,
    config: AssistantConfig,
    network: Arc<NetworkStatus>,
}

impl GeminiClient {
    /// Create a client
    ///
    /// # Errors
    ///
    /// Returns error if the API key is empty or the HTTP client cannot be
    /// built
    pub fn new(
        api_key: SecretString,
        config: AssistantConfig,
        network: Arc<NetworkStatus>,
    ) -> Result<Self> {
        if api_key.expose_secret().trim().is_empty() {
            return Err(Error::Config("Gemini API key required".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            api_key,
            config,
            network,
        })
    }

    fn model_url(&self) -> String {
        format!(
            "{}/v1beta/models/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        )
    }

    /// Check that the API key is accepted
    ///
    /// # Errors
    ///
    /// Returns error if offline, the request fails, or the endpoint rejects
    /// the key
    pub async fn validate_key(&self) -> Result<()> {
        if !self.network.is_connected() {
            return Err(AssistantError::NetworkUnavailable.into());
        }

        tracing::info!(model = %self.config.model, "testing API key");

        let response = self
            .client
            .get(self.model_url())
            .query(&[("key", self.api_key.expose_secret())])
            .timeout(self.config.key_check_timeout)
            .send()
            .await
            .map_err(|e| AssistantError::Transport(e.without_url().to_string()))?;

        let status = response.status();
        if status == StatusCode::OK {
            tracing::info!("API key validation successful");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let err = match interpret_response(status, &body) {
            Err(err @ AssistantError::RemoteError(_)) => err,
            _ => AssistantError::Transport(format!("HTTP {}", status.as_u16())),
        };
        tracing::error!(status = %status, error = %err, "API key rejected");
        Err(err.into())
    }
}

#[async_trait]
impl Assistant for GeminiClient {
    async fn query(&self, prompt: &str) -> std::result::Result<String, AssistantError> {
        if prompt.trim().is_empty() {
            return Err(AssistantError::EmptyPrompt);
        }

        if !self.network.is_connected() {
            tracing::warn!("cannot query assistant while offline");
            return Err(AssistantError::NetworkUnavailable);
        }

        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
            generation_config: GenerationConfig {
                max_output_tokens: self.config.max_output_tokens,
                temperature: self.config.temperature,
            },
        };

        tracing::debug!(model = %self.config.model, "sending prompt");

        let response = self
            .client
            .post(format!("{}:generateContent", self.model_url()))
            .query(&[("key", self.api_key.expose_secret())])
            .json(&request)
            .send()
            .await
            .map_err(|e| AssistantError::Transport(e.without_url().to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AssistantError::Transport(e.without_url().to_string()))?;

        let reply = interpret_response(status, &body);
        match &reply {
            Ok(text) => tracing::info!(status = %status, chars = text.len(), "assistant replied"),
            Err(e) => tracing::error!(status = %status, error = %e, "assistant request failed"),
        }
        reply
    }
}

/// Map an HTTP status and body to a reply or a typed error
///
/// Reply text wins over the status code; an error message in the body wins
/// over a bare non-success status.
///
/// # Errors
///
/// Returns [`AssistantError::MalformedResponse`] for non-JSON bodies or
/// missing text, [`AssistantError::RemoteError`] for an error payload, and
/// [`AssistantError::Transport`] for a non-success status with neither
pub fn interpret_response(
    status: StatusCode,
    body: &str,
) -> std::result::Result<String, AssistantError> {
    let parsed: GenerateResponse = match serde_json::from_str(body) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::debug!(error = %e, "unparseable assistant response");
            if status.is_success() {
                return Err(AssistantError::MalformedResponse);
            }
            GenerateResponse::default()
        }
    };

    let text = parsed
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .and_then(|c| c.parts.into_iter().next())
        .and_then(|p| p.text);

    if let Some(text) = text {
        let clean = sanitize_reply(&text);
        if clean.is_empty() {
            return Err(AssistantError::MalformedResponse);
        }
        return Ok(clean);
    }

    if let Some(message) = parsed.error.and_then(|e| e.message) {
        return Err(AssistantError::RemoteError(message));
    }

    if !status.is_success() {
        return Err(AssistantError::Transport(format!("HTTP {}", status.as_u16())));
    }

    Err(AssistantError::MalformedResponse)
}

/// Strip carriage returns and NULs, then trim
#[must_use]
pub fn sanitize_reply(text: &str) -> String {
    text.chars()
        .filter(|&c| c != '\r' && c != '\0')
        .collect::<String>()
        .trim()
        .to_string()
}
