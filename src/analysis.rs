//! Frame analysis backends.

use std::env;

use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{AnalyzerBackend, AnalyzerConfig};
use crate::error::RelayError;

// -- OpenAI-compatible vision request types ---------------------------------

#[derive(Debug, Serialize)]
pub struct VisionRequest {
    pub model: String,
    pub max_tokens: u32,
    pub messages: Vec<VisionMessage>,
}

#[derive(Debug, Serialize)]
pub struct VisionMessage {
    pub role: String,
    pub content: Vec<ContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct VisionResponse {
    pub choices: Vec<VisionChoice>,
}

#[derive(Debug, Deserialize)]
pub struct VisionChoice {
    pub message: VisionReply,
}

#[derive(Debug, Deserialize)]
pub struct VisionReply {
    pub content: Option<String>,
}

/// Embed a JPEG as a `data:` URL.
pub fn jpeg_data_url(jpeg: &[u8]) -> String {
    format!(
        "data:image/jpeg;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(jpeg)
    )
}

impl VisionRequest {
    pub fn new(model: &str, max_tokens: u32, prompt: &str, jpeg: &[u8]) -> Self {
        Self {
            model: model.to_string(),
            max_tokens,
            messages: vec![VisionMessage {
                role: "user".to_string(),
                content: vec![
                    ContentPart::Text {
                        text: prompt.to_string(),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: jpeg_data_url(jpeg),
                        },
                    },
                ],
            }],
        }
    }
}

/// Connection details for an OpenAI-compatible chat-completions endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiVision {
    client: Client,
    base_url: String,
    model: String,
    max_tokens: u32,
    api_key: String,
}

/// Describes a frame given a prompt.
#[derive(Debug, Clone)]
pub enum Analyzer {
    OpenAi(OpenAiVision),
    /// Always answers with the same text.
    Canned(String),
}

impl Analyzer {
    /// Build the configured backend. The OpenAI backend reads `OPENAI_API_KEY`.
    pub fn from_config(config: &AnalyzerConfig) -> Result<Self, RelayError> {
        match config.backend {
            AnalyzerBackend::Canned => Ok(Analyzer::Canned(config.canned_response.clone())),
            AnalyzerBackend::Openai => {
                let api_key = env::var("OPENAI_API_KEY").map_err(|_| {
                    RelayError::Config(
                        "OPENAI_API_KEY not set. Export it or use --analyzer canned.".to_string(),
                    )
                })?;
                Ok(Analyzer::OpenAi(OpenAiVision {
                    client: Client::new(),
                    base_url: config.base_url.trim_end_matches('/').to_string(),
                    model: config.model.clone(),
                    max_tokens: config.max_tokens,
                    api_key,
                }))
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Analyzer::OpenAi(_) => "openai",
            Analyzer::Canned(_) => "canned",
        }
    }

    /// Run one analysis of `jpeg` with `prompt`.
    pub async fn analyze(&self, jpeg: &[u8], prompt: &str) -> Result<String, RelayError> {
        match self {
            Analyzer::Canned(text) => Ok(text.clone()),
            Analyzer::OpenAi(vision) => vision.analyze(jpeg, prompt).await,
        }
    }
}

impl OpenAiVision {
    async fn analyze(&self, jpeg: &[u8], prompt: &str) -> Result<String, RelayError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = VisionRequest::new(&self.model, self.max_tokens, prompt, jpeg);
        debug!(model = %self.model, bytes = jpeg.len(), "sending frame for analysis");

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(RelayError::Analysis(format!("HTTP {status} from {url}: {detail}")));
        }

        let parsed: VisionResponse = resp.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| RelayError::Analysis("model returned no content".to_string()))
    }
}
