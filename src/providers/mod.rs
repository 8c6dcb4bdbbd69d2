pub mod gmail;
pub mod token;

use async_trait::async_trait;
use token::{OAuthClient, TokenStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An email as the analysis pipeline sees it. Never mutated after
/// construction; analysis results travel alongside it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EmailRecord {
    pub id: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default, alias = "from")]
    pub sender: String,
    #[serde(default, alias = "to")]
    pub recipient: Option<String>,
    #[serde(default, alias = "snippet")]
    pub body_snippet: String,
    #[serde(default, alias = "body")]
    pub full_body: Option<String>,
    #[serde(default)]
    pub received_at: Option<DateTime<Utc>>,
}

impl EmailRecord {
    pub fn subject(&self) -> &str {
        self.subject.as_deref().unwrap_or("")
    }

    pub fn recipient(&self) -> &str {
        self.recipient.as_deref().unwrap_or("")
    }

    /// Subject and snippet both blank means there is nothing to analyze
    pub fn has_content(&self) -> bool {
        !self.subject().trim().is_empty() || !self.body_snippet.trim().is_empty()
    }
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("Not authenticated with the mail provider")]
    NotAuthenticated,

    #[error("Mail API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Mail API request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Token file error: {0}")]
    Token(String),
}

#[async_trait]
pub trait MailProvider: Send + Sync {
    async fn list_message_ids(&self, max_results: u32, query: Option<&str>) -> Result<Vec<String>, MailError>;
    async fn get_message(&self, id: &str) -> Result<EmailRecord, MailError>;

    /// Fetch up to `max_results` messages. A message that fails to load is
    /// skipped rather than failing the whole listing.
    async fn list_messages(&self, max_results: u32, query: Option<&str>) -> Result<Vec<EmailRecord>, MailError> {
        let ids = self.list_message_ids(max_results, query).await?;
        let mut emails = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get_message(&id).await {
                Ok(email) => emails.push(email),
                Err(e) => tracing::warn!(message_id = %id, "failed to fetch message: {}", e),
            }
        }
        Ok(emails)
    }
}

/// Opens a provider session from the stored credentials. The HTTP server
/// holds one of these so each request gets a fresh session.
#[async_trait]
pub trait MailConnector: Send + Sync {
    async fn connect(
        &self,
        store: &TokenStore,
        oauth: Option<&OAuthClient>,
    ) -> Result<Box<dyn MailProvider>, MailError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_record_accepts_short_field_names() {
        let email: EmailRecord = serde_json::from_str(
            r#"{"id": "1", "subject": "Hi", "from": "a@b.com", "to": "c@d.com", "snippet": "hello"}"#,
        )
        .unwrap();
        assert_eq!(email.sender, "a@b.com");
        assert_eq!(email.recipient(), "c@d.com");
        assert_eq!(email.body_snippet, "hello");
        assert!(email.has_content());
    }

    #[test]
    fn test_blank_email_has_no_content() {
        let email: EmailRecord =
            serde_json::from_str(r#"{"id": "1", "subject": "  ", "bodySnippet": ""}"#).unwrap();
        assert!(!email.has_content());
    }
}
