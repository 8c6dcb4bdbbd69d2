use super::token::{OAuthClient, OAuthToken, TokenStore};
use super::{EmailRecord, MailConnector, MailError, MailProvider};
use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";
const SNIPPET_CHARS: usize = 500;

pub struct GmailProvider {
    http: reqwest::Client,
    access_token: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    messages: Option<Vec<MessageRef>>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GmailMessage {
    id: String,
    #[serde(default)]
    snippet: Option<String>,
    #[serde(default)]
    internal_date: Option<String>,
    #[serde(default)]
    payload: Option<Part>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    headers: Vec<Header>,
    #[serde(default)]
    body: Option<Body>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Header {
    name: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct Body {
    #[serde(default)]
    data: Option<String>,
}

impl GmailProvider {
    /// Build a provider from the stored token, refreshing it first when it
    /// has expired and a refresh is possible.
    pub async fn from_store(store: &TokenStore, oauth: Option<&OAuthClient>) -> Result<Self, MailError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        let token = store.load().ok_or(MailError::NotAuthenticated)?;
        let token = refresh_if_expired(&http, store, oauth, token).await?;

        Ok(Self {
            http,
            access_token: token.access_token,
            base_url: GMAIL_API_BASE.to_string(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, MailError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.access_token)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 401 {
            return Err(MailError::NotAuthenticated);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(MailError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json().await?)
    }
}

async fn refresh_if_expired(
    http: &reqwest::Client,
    store: &TokenStore,
    oauth: Option<&OAuthClient>,
    token: OAuthToken,
) -> Result<OAuthToken, MailError> {
    if !token.is_expired() {
        return Ok(token);
    }
    let (Some(oauth), Some(refresh_token)) = (oauth, token.refresh_token.as_deref()) else {
        return Err(MailError::NotAuthenticated);
    };

    debug!("access token expired, refreshing");
    let refreshed = match oauth.refresh(http, refresh_token).await {
        Ok(token) => token,
        // Revoked or expired refresh token: the user has to consent again
        Err(MailError::Api {
            status: 400 | 401,
            message,
        }) => {
            warn!("token refresh rejected: {}", message);
            return Err(MailError::NotAuthenticated);
        }
        Err(e) => return Err(e),
    };
    store.save(&refreshed)?;
    Ok(refreshed)
}

/// Connects to Gmail with whatever token the store holds
pub struct GmailConnector;

#[async_trait]
impl MailConnector for GmailConnector {
    async fn connect(
        &self,
        store: &TokenStore,
        oauth: Option<&OAuthClient>,
    ) -> Result<Box<dyn MailProvider>, MailError> {
        let provider = GmailProvider::from_store(store, oauth).await?;
        Ok(Box::new(provider))
    }
}

#[async_trait]
impl MailProvider for GmailProvider {
    async fn list_message_ids(&self, max_results: u32, query: Option<&str>) -> Result<Vec<String>, MailError> {
        let url = format!("{}/messages", self.base_url);
        let mut params = vec![("maxResults", max_results.to_string())];
        if let Some(q) = query.filter(|q| !q.is_empty()) {
            params.push(("q", q.to_string()));
        }

        let list: ListResponse = self.get_json(&url, &params).await?;
        Ok(list
            .messages
            .unwrap_or_default()
            .into_iter()
            .map(|m| m.id)
            .collect())
    }

    async fn get_message(&self, id: &str) -> Result<EmailRecord, MailError> {
        if id.is_empty() || id.contains('/') || id.contains("..") {
            return Err(MailError::Api {
                status: 400,
                message: format!("invalid message id: {:?}", id),
            });
        }
        let url = format!("{}/messages/{}", self.base_url, id);
        let msg: GmailMessage = self.get_json(&url, &[("format", "full".to_string())]).await?;
        Ok(message_to_email(msg))
    }
}

pub(crate) fn message_to_email(msg: GmailMessage) -> EmailRecord {
    let payload = msg.payload.unwrap_or_default();
    let header = |name: &str| {
        payload
            .headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.clone())
    };

    let full_body = find_text_part(&payload).filter(|b| !b.trim().is_empty());
    // Use the provider snippet if present, fall back to the start of the body
    let body_snippet = msg
        .snippet
        .filter(|s| !s.is_empty())
        .or_else(|| full_body.as_ref().map(|b| b.chars().take(SNIPPET_CHARS).collect()))
        .unwrap_or_default();

    let received_at = msg
        .internal_date
        .as_deref()
        .and_then(|d| d.parse::<i64>().ok())
        .and_then(DateTime::<Utc>::from_timestamp_millis);

    EmailRecord {
        id: msg.id,
        subject: header("Subject"),
        sender: header("From").unwrap_or_default(),
        recipient: header("To"),
        body_snippet,
        full_body,
        received_at,
    }
}

fn find_text_part(part: &Part) -> Option<String> {
    if part.mime_type == "text/plain" || (part.parts.is_empty() && part.mime_type.is_empty()) {
        if let Some(data) = part.body.as_ref().and_then(|b| b.data.as_deref()) {
            return decode_base64url(data);
        }
    }
    part.parts.iter().find_map(find_text_part)
}

fn decode_base64url(encoded: &str) -> Option<String> {
    let trimmed = encoded.trim_end_matches('=');
    base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(trimmed)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(text: &str) -> String {
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(text)
    }

    #[test]
    fn test_message_to_email() {
        let raw = serde_json::json!({
            "id": "18c2f",
            "snippet": "Can we meet today?",
            "internalDate": "1700000000000",
            "payload": {
                "mimeType": "multipart/alternative",
                "headers": [
                    {"name": "From", "value": "Jane <jane@corp.com>"},
                    {"name": "to", "value": "me@corp.com"},
                    {"name": "Subject", "value": "Sync"}
                ],
                "parts": [
                    {"mimeType": "text/html", "body": {"data": encode("<p>html</p>")}},
                    {"mimeType": "text/plain", "body": {"data": encode("Can we meet today? Thanks")}}
                ]
            }
        });
        let msg: GmailMessage = serde_json::from_value(raw).unwrap();
        let email = message_to_email(msg);

        assert_eq!(email.id, "18c2f");
        assert_eq!(email.subject(), "Sync");
        assert_eq!(email.sender, "Jane <jane@corp.com>");
        assert_eq!(email.recipient(), "me@corp.com");
        assert_eq!(email.body_snippet, "Can we meet today?");
        assert_eq!(email.full_body.as_deref(), Some("Can we meet today? Thanks"));
        assert_eq!(email.received_at.unwrap().timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_snippet_falls_back_to_body() {
        let raw = serde_json::json!({
            "id": "1",
            "payload": {"body": {"data": encode("plain body")}}
        });
        let msg: GmailMessage = serde_json::from_value(raw).unwrap();
        let email = message_to_email(msg);
        assert_eq!(email.body_snippet, "plain body");
        assert!(email.subject.is_none());
    }

    #[test]
    fn test_decode_tolerates_padding() {
        assert_eq!(decode_base64url("aGk="), Some("hi".to_string()));
        assert_eq!(decode_base64url("!!!"), None);
    }
}
