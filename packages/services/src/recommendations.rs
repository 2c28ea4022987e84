//! Movie recommendations from an OpenAI-style chat-completion endpoint.

use std::time::Duration;

use flick_core::{RecommendationRequest, RecommendationResult};
use resilience::{
    Classify, FailureKind, PolicyError, Recommendation, ResiliencePolicy, classify_status,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Completion endpoint settings.
#[derive(Debug, Clone)]
pub struct CompletionConfig {
    /// API root; `/chat/completions` is appended.
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "gpt-3.5-turbo".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl CompletionConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

/// A failed completion call.
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("completion API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid completion response: {0}")]
    Decode(#[source] reqwest::Error),

    #[error("completion response had no choices")]
    Empty,
}

impl Classify for CompletionError {
    fn classify(&self) -> FailureKind {
        match self {
            CompletionError::Request(e) if e.is_builder() => FailureKind::Permanent,
            CompletionError::Request(_) => FailureKind::Transient,
            CompletionError::Status { status, .. } => classify_status(*status),
            CompletionError::Decode(_) | CompletionError::Empty => FailureKind::Permanent,
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// Chat-completion client guarded by its own [`ResiliencePolicy`].
#[derive(Clone)]
pub struct CompletionClient {
    http: reqwest::Client,
    config: CompletionConfig,
    policy: ResiliencePolicy<Recommendation>,
}

impl CompletionClient {
    pub fn new(
        config: CompletionConfig,
        policy: ResiliencePolicy<Recommendation>,
    ) -> Result<Self, CompletionError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(CompletionError::Request)?;
        Ok(Self {
            http,
            config,
            policy,
        })
    }

    pub fn policy(&self) -> &ResiliencePolicy<Recommendation> {
        &self.policy
    }

    /// Send `prompt` as a single user message and return the first choice.
    pub async fn complete(&self, prompt: &str) -> Result<String, PolicyError<CompletionError>> {
        self.policy.execute(|| self.complete_once(prompt)).await
    }

    async fn complete_once(&self, prompt: &str) -> Result<String, CompletionError> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .http
            .post(self.config.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(CompletionError::Request)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: ChatResponse = response.json().await.map_err(CompletionError::Decode)?;
        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(CompletionError::Empty)
    }
}

/// Turns what a user watched and likes into movie suggestions.
#[derive(Clone)]
pub struct RecommendationService {
    client: CompletionClient,
}

impl RecommendationService {
    pub fn new(client: CompletionClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &CompletionClient {
        &self.client
    }

    pub fn build_prompt(request: &RecommendationRequest) -> String {
        format!(
            "You are a helpful movie recommendation assistant. Given the movies a user has \
             already watched: {} and their interests: {} Provide 5 movie recommendations that \
             match their taste. List them separated by commas.",
            request.watched_movies.join(", "),
            request.interests.join(", "),
        )
    }

    pub async fn recommend(
        &self,
        request: &RecommendationRequest,
    ) -> Result<RecommendationResult, PolicyError<CompletionError>> {
        let answer = self.client.complete(&Self::build_prompt(request)).await?;
        Ok(RecommendationResult::from_completion(&answer))
    }

    /// Like [`recommend`](Self::recommend), but any failure is logged and
    /// turned into an empty result.
    pub async fn recommend_or_empty(&self, request: &RecommendationRequest) -> RecommendationResult {
        match self.recommend(request).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(
                    policy = e.policy(),
                    error = %e,
                    "Recommendation failed, returning none"
                );
                RecommendationResult::empty()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_lists_watched_and_interests() {
        let request = RecommendationRequest::new(
            vec!["Heat".to_string(), "Ronin".to_string()],
            vec!["heists".to_string()],
        );
        let prompt = RecommendationService::build_prompt(&request);
        assert!(prompt.contains("already watched: Heat, Ronin and their interests: heists"));
        assert!(prompt.ends_with("List them separated by commas."));
    }

    #[test]
    fn endpoint_tolerates_trailing_slash() {
        let config = CompletionConfig::default().with_base_url("http://localhost:9000/v1/");
        assert_eq!(config.endpoint(), "http://localhost:9000/v1/chat/completions");
    }

    #[test]
    fn empty_answer_is_permanent() {
        assert_eq!(CompletionError::Empty.classify(), FailureKind::Permanent);
        assert!(CompletionError::Status { status: 500, body: String::new() }.is_transient());
    }
}
