//! Text-generation provider abstraction.
//!
//! A [`Generator`] turns a [`CompletionRequest`] into free text. Two
//! instances are built from config: one for batch scoring and one for
//! proposal drafting, differing only in model and sampling settings.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::GenerationConfig;
use crate::error::PipelineError;

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: Option<String>,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[async_trait]
pub trait Generator: Send + Sync {
    fn model_name(&self) -> &str;
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }
    async fn complete(&self, _request: &CompletionRequest) -> Result<String> {
        Err(PipelineError::Configuration("generation provider is disabled".into()).into())
    }
}

/// OpenAI chat completions.
pub struct OpenAIGenerator {
    model: String,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIGenerator {
    pub fn new(config: &GenerationConfig, model: &str) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            PipelineError::Configuration(format!(
                "{} environment variable not set",
                config.api_key_env
            ))
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model: model.to_string(),
            api_key,
            max_retries: config.max_retries,
            client,
        })
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: u32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl Generator for OpenAIGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.prompt,
        });
        let body = ChatRequest {
            model: &self.model,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            messages,
        };

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tracing::debug!(attempt, ?delay, model = %self.model, "retrying completion request");
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post("https://api.openai.com/v1/chat/completions")
                .bearer_auth(self.api_key.trim())
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let parsed: ChatResponse = response.json().await.map_err(|e| {
                            PipelineError::Upstream(format!("failed to decode completion: {}", e))
                        })?;
                        let text = parsed
                            .choices
                            .into_iter()
                            .find_map(|choice| choice.message.content)
                            .unwrap_or_default();
                        if text.trim().is_empty() {
                            return Err(
                                PipelineError::Upstream("empty completion response".into()).into()
                            );
                        }
                        return Ok(text);
                    }

                    let body_text = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    let err =
                        PipelineError::Upstream(format!("OpenAI returned {}: {}", status, body_text));
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(err);
                        continue;
                    }
                    return Err(err.into());
                }
                Err(e) => {
                    last_err = Some(PipelineError::Upstream(e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| PipelineError::Upstream("completion failed after retries".into()))
            .into())
    }
}

/// The scoring and proposal generators, in that order.
pub fn create_generators(
    config: &GenerationConfig,
) -> Result<(Arc<dyn Generator>, Arc<dyn Generator>)> {
    match config.provider.as_str() {
        "disabled" => Ok((Arc::new(DisabledGenerator), Arc::new(DisabledGenerator))),
        "openai" => Ok((
            Arc::new(OpenAIGenerator::new(config, &config.scoring_model)?),
            Arc::new(OpenAIGenerator::new(config, &config.proposal_model)?),
        )),
        other => Err(PipelineError::Configuration(format!(
            "Unknown generation provider: {}",
            other
        ))
        .into()),
    }
}
