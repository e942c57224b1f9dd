//! Request/response contract with the generation service and the HTTP
//! client that speaks it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Instruments the generation service knows how to voice.
pub const INSTRUMENTS: [&str; 7] = [
    "piano", "strings", "bass", "guitar", "flute", "violin", "cello",
];

pub const DEFAULT_INSTRUMENT: &str = "piano";
pub const DEFAULT_MEASURES: u32 = 16;
pub const MIN_MEASURES: u32 = 2;
pub const MAX_MEASURES: u32 = 64;

/// The message shown to the user for any failed generation.
pub const GENERATION_FAILED: &str = "Generation request failed.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub measures: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instruments: Vec<String>,
}

impl GenerationRequest {
    /// 16 measures for the default instrument, no seed.
    pub fn new(prompt: impl Into<String>) -> Self {
        GenerationRequest {
            prompt: prompt.into(),
            measures: DEFAULT_MEASURES,
            seed: None,
            instruments: vec![DEFAULT_INSTRUMENT.to_string()],
        }
    }

    pub fn with_measures(mut self, measures: u32) -> Self {
        self.measures = measures;
        self
    }

    pub fn with_seed(mut self, seed: i64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_instruments<I, S>(mut self, instruments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.instruments = instruments.into_iter().map(Into::into).collect();
        self
    }

    /// Caller-side bounds. The service stays the source of truth.
    pub fn validate(&self) -> Result<(), RequestError> {
        if self.prompt.trim().is_empty() {
            return Err(RequestError::EmptyPrompt);
        }
        if !(MIN_MEASURES..=MAX_MEASURES).contains(&self.measures) {
            return Err(RequestError::MeasuresOutOfRange(self.measures));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    #[error("prompt must not be empty")]
    EmptyPrompt,
    #[error("measures must be between {MIN_MEASURES} and {MAX_MEASURES}, got {0}")]
    MeasuresOutOfRange(u32),
}

/// What the service returned. Missing fields come back empty rather than
/// failing the whole response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationResponse {
    #[serde(rename = "abc")]
    pub notation_text: String,
    #[serde(rename = "tempo")]
    pub tempo_bpm: u32,
    pub meter: String,
    pub key: String,
    pub mood: String,
    pub highlights: Vec<String>,
    pub parts: Vec<Part>,
}

impl GenerationResponse {
    /// Notation without a single bar separator has nothing to show or play.
    pub fn has_playable_content(&self) -> bool {
        self.notation_text.contains('|')
    }
}

/// One instrument's line of the sketch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Part {
    pub instrument: String,
    #[serde(rename = "abc")]
    pub notation_text: String,
}

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("Generation request failed.")]
    Failed(#[source] FailureCause),
}

impl GenerationError {
    pub fn user_message(&self) -> &'static str {
        GENERATION_FAILED
    }
}

/// Detail behind [`GenerationError::Failed`], for logs only.
#[derive(Debug, thiserror::Error)]
pub enum FailureCause {
    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("service answered {0}")]
    Status(reqwest::StatusCode),
    #[error("response body did not decode: {0}")]
    Decode(#[source] reqwest::Error),
}

#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn generate(&self, request: &GenerationRequest)
        -> Result<GenerationResponse, GenerationError>;
}

/// Single-attempt JSON client for `POST /api/generate`.
#[derive(Debug, Clone)]
pub struct GenerationClient {
    http: reqwest::Client,
    endpoint: String,
}

impl GenerationClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        GenerationClient {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    pub fn with_timeout(endpoint: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        use anyhow::Context;

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building HTTP client for the generation service")?;
        Ok(GenerationClient {
            http,
            endpoint: endpoint.into(),
        })
    }

    pub fn from_config(config: &melodyconf::ClientConfig) -> anyhow::Result<Self> {
        Self::with_timeout(
            config.endpoint.clone(),
            Duration::from_millis(config.timeout_ms),
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl GenerationService for GenerationClient {
    #[tracing::instrument(skip(self, request), fields(endpoint = %self.endpoint, measures = request.measures))]
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationResponse, GenerationError> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "generation request did not complete");
                GenerationError::Failed(FailureCause::Transport(e))
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(%status, "generation service refused the request");
            return Err(GenerationError::Failed(FailureCause::Status(status)));
        }

        let body: GenerationResponse = response.json().await.map_err(|e| {
            warn!(error = %e, "generation response did not decode");
            GenerationError::Failed(FailureCause::Decode(e))
        })?;

        debug!(
            tempo = body.tempo_bpm,
            key = %body.key,
            parts = body.parts.len(),
            "generation succeeded"
        );
        Ok(body)
    }
}
