pub mod anthropic;
pub mod claude_cli;
pub mod openai;

use crate::config::{LlmBackend, LlmConfig};
use async_trait::async_trait;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Upper bound on a single model call over HTTP
const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl CompletionRequest {
    pub fn new(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            prompt: prompt.into(),
            temperature: 0.3,
            max_tokens: 300,
        }
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("{0}")]
    Process(String),

    #[error("Model call timed out after {0}s")]
    Timeout(u64),

    #[error("Model returned no text")]
    EmptyResponse,

    #[error("Missing credentials: set {0}")]
    MissingApiKey(&'static str),
}

/// A language model backend, built once at startup and shared as
/// `Arc<dyn TextGenerator>`
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Provider name for logs
    fn name(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError>;
}

/// Pick the backend named in the config. API keys come from the environment.
pub fn build_generator(config: &LlmConfig) -> Result<Arc<dyn TextGenerator>, LlmError> {
    let model = config.model().to_string();
    let generator: Arc<dyn TextGenerator> = match config.backend {
        LlmBackend::ClaudeCli => Arc::new(claude_cli::ClaudeCliGenerator::new(model)),
        LlmBackend::Anthropic => {
            let key = api_key("ANTHROPIC_API_KEY")?;
            let mut generator = anthropic::AnthropicGenerator::new(key, model)?;
            if let Some(secs) = config.timeout_secs {
                generator = generator.with_timeout(secs)?;
            }
            Arc::new(generator)
        }
        LlmBackend::Openai => {
            let key = api_key("OPENAI_API_KEY")?;
            let mut generator = openai::OpenAiGenerator::new(key, model)?;
            if let Some(base_url) = config.base_url.as_deref() {
                generator = generator.with_base_url(base_url);
            }
            if let Some(secs) = config.timeout_secs {
                generator = generator.with_timeout(secs)?;
            }
            Arc::new(generator)
        }
    };
    Ok(generator)
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client, LlmError> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

fn request_error(err: reqwest::Error, timeout_secs: u64) -> LlmError {
    if err.is_timeout() {
        LlmError::Timeout(timeout_secs)
    } else {
        LlmError::Http(err)
    }
}

fn api_key(var: &'static str) -> Result<String, LlmError> {
    env::var(var)
        .ok()
        .filter(|k| !k.is_empty())
        .ok_or(LlmError::MissingApiKey(var))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Responder = dyn Fn(&CompletionRequest) -> Result<String, LlmError> + Send + Sync;

    /// Test double that answers every request through a closure and counts
    /// how often it was called.
    pub struct ScriptedGenerator {
        responder: Box<Responder>,
        calls: AtomicUsize,
    }

    impl ScriptedGenerator {
        pub fn new(
            responder: impl Fn(&CompletionRequest) -> Result<String, LlmError> + Send + Sync + 'static,
        ) -> Self {
            Self {
                responder: Box::new(responder),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn replying(reply: &str) -> Self {
            let reply = reply.to_string();
            Self::new(move |_| Ok(reply.clone()))
        }

        pub fn failing() -> Self {
            Self::new(|_| {
                Err(LlmError::Api {
                    status: 503,
                    message: "overloaded".to_string(),
                })
            })
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.responder)(request)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let request = CompletionRequest::new("sys", "user").temperature(0.7).max_tokens(50);
        assert_eq!(request.system, "sys");
        assert_eq!(request.prompt, "user");
        assert_eq!(request.temperature, 0.7);
        assert_eq!(request.max_tokens, 50);
    }

    #[test]
    fn test_claude_cli_needs_no_key() {
        let generator = build_generator(&LlmConfig::default()).unwrap();
        assert_eq!(generator.name(), "claude-cli");
    }
}
