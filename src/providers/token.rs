use super::MailError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
const AUTH_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GMAIL_SCOPE: &str = "https://www.googleapis.com/auth/gmail.readonly";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OAuthToken {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl OAuthToken {
    /// Expired with a one minute margin. Unknown expiry counts as valid; the
    /// API will reject it if it is not.
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .map(|exp| Utc::now() + Duration::seconds(60) >= exp)
            .unwrap_or(false)
    }
}

/// Token file next to the config. Present and parseable means authenticated.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `None` when the file is missing or cannot be parsed
    pub fn load(&self) -> Option<OAuthToken> {
        let content = fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&content) {
            Ok(token) => {
                debug!("loaded token from {}", self.path.display());
                Some(token)
            }
            Err(e) => {
                debug!("ignoring unparseable token file {}: {}", self.path.display(), e);
                None
            }
        }
    }

    pub fn save(&self, token: &OAuthToken) -> Result<(), MailError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| MailError::Token(e.to_string()))?;
        }
        let content =
            serde_json::to_string_pretty(token).map_err(|e| MailError::Token(e.to_string()))?;
        fs::write(&self.path, content).map_err(|e| MailError::Token(e.to_string()))?;
        debug!("saved token to {}", self.path.display());
        Ok(())
    }
}

/// OAuth client credentials for the consent flow and refreshes
#[derive(Debug, Clone)]
pub struct OAuthClient {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    token_endpoint: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

impl TokenResponse {
    fn into_token(self, previous_refresh: Option<&str>) -> OAuthToken {
        OAuthToken {
            access_token: self.access_token,
            refresh_token: self
                .refresh_token
                .or_else(|| previous_refresh.map(str::to_string)),
            // Out-of-range lifetimes are treated as unknown expiry
            expires_at: self
                .expires_in
                .and_then(Duration::try_seconds)
                .and_then(|d| Utc::now().checked_add_signed(d)),
        }
    }
}

impl OAuthClient {
    pub fn new(client_id: String, client_secret: String, redirect_uri: String) -> Self {
        Self {
            client_id,
            client_secret,
            redirect_uri,
            token_endpoint: TOKEN_ENDPOINT.to_string(),
        }
    }

    pub fn with_token_endpoint(mut self, url: impl Into<String>) -> Self {
        self.token_endpoint = url.into();
        self
    }

    /// Consent page the user has to visit to (re)authorize access
    pub fn authorization_url(&self) -> String {
        let mut url = match reqwest::Url::parse(AUTH_ENDPOINT) {
            Ok(url) => url,
            Err(_) => return AUTH_ENDPOINT.to_string(),
        };
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", GMAIL_SCOPE)
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent");
        url.to_string()
    }

    pub async fn exchange_code(&self, http: &reqwest::Client, code: &str) -> Result<OAuthToken, MailError> {
        let params = [
            ("code", code),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
        ];
        let response = request_token(http, &self.token_endpoint, &params).await?;
        Ok(response.into_token(None))
    }

    pub async fn refresh(&self, http: &reqwest::Client, refresh_token: &str) -> Result<OAuthToken, MailError> {
        let params = [
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("grant_type", "refresh_token"),
        ];
        let response = request_token(http, &self.token_endpoint, &params).await?;
        Ok(response.into_token(Some(refresh_token)))
    }
}

async fn request_token(
    http: &reqwest::Client,
    endpoint: &str,
    params: &[(&str, &str)],
) -> Result<TokenResponse, MailError> {
    let response = http.post(endpoint).form(params).send().await?;
    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(MailError::Api {
            status: status.as_u16(),
            message,
        });
    }
    Ok(response.json().await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token() -> OAuthToken {
        OAuthToken {
            access_token: "ya29.access".to_string(),
            refresh_token: Some("1//refresh".to_string()),
            expires_at: Some(Utc::now() + Duration::hours(1)),
        }
    }

    #[test]
    fn test_missing_file_is_unauthenticated() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("token.json"));
        assert!(store.load().is_none());
    }

    #[test]
    fn test_garbage_file_is_unauthenticated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        fs::write(&path, "not json").unwrap();
        assert!(TokenStore::new(path).load().is_none());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("nested").join("token.json"));
        let token = token();
        store.save(&token).unwrap();
        assert_eq!(store.load(), Some(token));
    }

    #[test]
    fn test_minimal_token_schema() {
        let token: OAuthToken = serde_json::from_str(r#"{"access_token": "abc"}"#).unwrap();
        assert!(token.refresh_token.is_none());
        assert!(!token.is_expired());
    }

    #[test]
    fn test_expiry() {
        let mut t = token();
        assert!(!t.is_expired());
        t.expires_at = Some(Utc::now() + Duration::seconds(30));
        assert!(t.is_expired());
    }

    #[test]
    fn test_authorization_url() {
        let client = OAuthClient::new(
            "my-client".to_string(),
            "secret".to_string(),
            "http://localhost:3000/oauth2callback".to_string(),
        );
        let url = client.authorization_url();
        assert!(url.starts_with(AUTH_ENDPOINT));
        assert!(url.contains("client_id=my-client"));
        assert!(url.contains("access_type=offline"));
        assert!(!url.contains("secret"));
    }

    #[test]
    fn test_huge_expires_in_means_unknown_expiry() {
        let response = TokenResponse {
            access_token: "abc".to_string(),
            refresh_token: None,
            expires_in: Some(i64::MAX),
        };
        let token = response.into_token(Some("1//refresh"));
        assert_eq!(token.expires_at, None);
        assert_eq!(token.refresh_token.as_deref(), Some("1//refresh"));
        assert!(!token.is_expired());

        let response = TokenResponse {
            access_token: "abc".to_string(),
            refresh_token: None,
            expires_in: Some(3600),
        };
        assert!(response.into_token(None).expires_at.is_some());
    }
}
