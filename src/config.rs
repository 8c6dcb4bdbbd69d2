use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

pub const DEFAULT_BLEND_AI_WEIGHT: f64 = 0.6;
const DEFAULT_PORT: u16 = 3000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LlmBackend {
    #[default]
    ClaudeCli,
    Anthropic,
    Openai,
}

impl std::fmt::Display for LlmBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            LlmBackend::ClaudeCli => "claude-cli",
            LlmBackend::Anthropic => "anthropic",
            LlmBackend::Openai => "openai",
        })
    }
}

impl std::str::FromStr for LlmBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "claude-cli" => Ok(LlmBackend::ClaudeCli),
            "anthropic" => Ok(LlmBackend::Anthropic),
            "openai" => Ok(LlmBackend::Openai),
            _ => anyhow::bail!(
                "Unknown backend: {}. Use 'claude-cli', 'anthropic' or 'openai'",
                s
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LlmConfig {
    #[serde(default)]
    pub backend: LlmBackend,
    /// Model name; each backend has its own default
    #[serde(default)]
    pub model: Option<String>,
    /// Override for OpenAI-compatible endpoints (OpenRouter, local servers)
    #[serde(default)]
    pub base_url: Option<String>,
    /// Per-call timeout in seconds for the HTTP backends
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl LlmConfig {
    pub fn model(&self) -> &str {
        if let Some(model) = self.model.as_deref() {
            return model;
        }
        match self.backend {
            LlmBackend::ClaudeCli => "haiku",
            LlmBackend::Anthropic => "claude-3-5-haiku-latest",
            LlmBackend::Openai => "gpt-4o-mini",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GmailConfig {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
    #[serde(default)]
    pub token_path: Option<PathBuf>,
}

impl Default for GmailConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            redirect_uri: default_redirect_uri(),
            token_path: None,
        }
    }
}

fn default_redirect_uri() -> String {
    format!("http://localhost:{}/oauth2callback", DEFAULT_PORT)
}

impl GmailConfig {
    pub fn token_path(&self) -> PathBuf {
        self.token_path.clone().unwrap_or_else(token_path)
    }

    /// Client secret is only ever read from the environment
    pub fn client_secret(&self) -> Option<String> {
        env::var("GMAIL_CLIENT_SECRET").ok().filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default = "default_blend_ai_weight")]
    pub blend_ai_weight: f64,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub gmail: GmailConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            blend_ai_weight: DEFAULT_BLEND_AI_WEIGHT,
            port: None,
            gmail: GmailConfig::default(),
        }
    }
}

fn default_blend_ai_weight() -> f64 {
    DEFAULT_BLEND_AI_WEIGHT
}

pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("email-triage")
}

fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

pub fn token_path() -> PathBuf {
    config_dir().join("token.json")
}

pub fn urgency_table_path() -> PathBuf {
    config_dir().join("urgency.json")
}

pub fn analyses_path() -> PathBuf {
    config_dir().join("analyses.json")
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = config_path();
        if path.exists() {
            let content = fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&content)?)
        } else {
            Ok(Config::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let dir = config_dir();
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(config_path(), content)?;
        Ok(())
    }

    /// `PORT` from the environment wins over the config file
    pub fn port(&self) -> u16 {
        env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .or(self.port)
            .unwrap_or(DEFAULT_PORT)
    }

    /// Weight given to the model's score when blending, kept within [0, 1]
    pub fn blend_ai_weight(&self) -> f64 {
        if self.blend_ai_weight.is_finite() {
            self.blend_ai_weight.clamp(0.0, 1.0)
        } else {
            DEFAULT_BLEND_AI_WEIGHT
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let cfg: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.llm.backend, LlmBackend::ClaudeCli);
        assert_eq!(cfg.llm.model(), "haiku");
        assert_eq!(cfg.blend_ai_weight(), 0.6);
        assert!(cfg.gmail.redirect_uri.ends_with("/oauth2callback"));
    }

    #[test]
    fn test_backend_names() {
        let cfg: Config =
            serde_json::from_str(r#"{"llm": {"backend": "openai", "model": "gpt-4o"}}"#).unwrap();
        assert_eq!(cfg.llm.backend, LlmBackend::Openai);
        assert_eq!(cfg.llm.model(), "gpt-4o");
        assert_eq!(cfg.llm.timeout_secs, None);
        assert_eq!("anthropic".parse::<LlmBackend>().unwrap(), LlmBackend::Anthropic);
        assert!("bard".parse::<LlmBackend>().is_err());
        assert_eq!(LlmBackend::ClaudeCli.to_string(), "claude-cli");
    }

    #[test]
    fn test_blend_weight_is_clamped() {
        let cfg = Config {
            blend_ai_weight: 1.7,
            ..Config::default()
        };
        assert_eq!(cfg.blend_ai_weight(), 1.0);
    }
}
