//! The language-model collaborator.
//!
//! The orchestrator only sees [`StoryModel`]; production runs use
//! [`AnthropicModel`], tests use [`ScriptedModel`](crate::testing::ScriptedModel).

use crate::config::{Config, ConfigError};
use crate::retry::Retryable;
use crate::story::{Role, TurnKind};
use async_trait::async_trait;
use claude::{Claude, Message, Request, StopReason, Usage};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors from a single model call.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Claude API error: {0}")]
    Api(#[from] claude::Error),

    #[error("Model returned an empty response")]
    EmptyResponse,
}

impl Retryable for ModelError {
    fn is_retryable(&self) -> bool {
        match self {
            ModelError::Api(e) => e.is_retryable(),
            ModelError::EmptyResponse => true,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            ModelError::Api(e) => e.retry_after(),
            ModelError::EmptyResponse => None,
        }
    }
}

/// Instructions for one turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnRequest {
    pub kind: TurnKind,
    /// Persona and house rules for the role.
    pub system: String,
    /// The task, including the accumulated draft where relevant.
    pub prompt: String,
}

impl TurnRequest {
    pub fn role(&self) -> Role {
        self.kind.role()
    }
}

/// Text produced by a turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub usage: Usage,
}

impl Completion {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: Usage::default(),
        }
    }
}

/// Something that can answer a turn.
#[async_trait]
pub trait StoryModel: Send + Sync {
    async fn complete(&self, request: &TurnRequest) -> Result<Completion, ModelError>;
}

/// [`StoryModel`] backed by the Anthropic Messages API.
#[derive(Clone)]
pub struct AnthropicModel {
    client: Claude,
    max_tokens: usize,
    temperature: Option<f32>,
}

impl AnthropicModel {
    pub fn new(client: Claude) -> Self {
        Self {
            client,
            max_tokens: 1024,
            temperature: None,
        }
    }

    /// Build a client from the credential, model and limits in `config`.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let client = Claude::new(config.api_key()?).map_err(|e| match e {
            claude::Error::NoApiKey => ConfigError::MissingApiKey,
            other => ConfigError::Invalid {
                field: "api_key",
                reason: other.to_string(),
            },
        })?;

        let mut client = client.with_timeout(Duration::from_secs(config.request_timeout_secs));
        if let Some(model) = &config.model {
            client = client.with_model(model);
        }

        Ok(Self {
            client,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

#[async_trait]
impl StoryModel for AnthropicModel {
    async fn complete(&self, request: &TurnRequest) -> Result<Completion, ModelError> {
        let mut api_request = Request::new(vec![Message::user(&request.prompt)])
            .with_system(&request.system)
            .with_max_tokens(self.max_tokens);
        if let Some(temperature) = self.temperature {
            api_request = api_request.with_temperature(temperature);
        }

        let response = self.client.complete(api_request).await?;

        if response.stop_reason == StopReason::MaxTokens {
            warn!(
                turn = %request.kind,
                max_tokens = self.max_tokens,
                "Response hit the token limit and may be cut short"
            );
        }

        let text = response.text();
        if text.trim().is_empty() {
            return Err(ModelError::EmptyResponse);
        }

        debug!(
            turn = %request.kind,
            model = %response.model,
            tokens = response.usage.total(),
            "Model turn complete"
        );

        Ok(Completion {
            text,
            usage: response.usage,
        })
    }
}
