use super::error::ApiError;
use super::AppState;
use crate::batch::{self, BatchOptions, BatchResult, MAX_BATCH_SIZE};
use crate::classifier::Category;
use crate::providers::{EmailRecord, MailError};
use crate::relationship::{self, SenderRelationship};
use crate::responder::{self, GeneratedResponse, ResponseRequest, ResponseType, Template};
use crate::urgency::UrgencyAnalysis;
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    response::Redirect,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

const DEFAULT_FETCH_COUNT: u32 = 10;

/// One email as posted by a client. Every field is optional on the wire; the
/// analysis endpoints require a subject or a snippet.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailPayload {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub snippet: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
}

impl EmailPayload {
    fn into_record(self, fallback_id: String) -> EmailRecord {
        EmailRecord {
            id: self.id.filter(|id| !id.is_empty()).unwrap_or(fallback_id),
            subject: self.subject,
            sender: self.from.unwrap_or_default(),
            recipient: self.to,
            body_snippet: self.snippet.unwrap_or_default(),
            full_body: self.body,
            received_at: None,
        }
    }

    /// Rejects emails with neither a subject nor a snippet
    fn validated(self) -> Result<EmailRecord, ApiError> {
        let email = self.into_record("request".to_string());
        if !email.has_content() {
            return Err(ApiError::Validation(
                "Email subject or snippet is required".to_string(),
            ));
        }
        Ok(email)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RespondPayload {
    #[serde(flatten)]
    email: EmailPayload,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    response_type: Option<String>,
    #[serde(default)]
    custom_instructions: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchPayload {
    emails: Vec<EmailPayload>,
    #[serde(default)]
    generate_responses: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailsQuery {
    #[serde(default)]
    max: Option<u32>,
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    generate_responses: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategorizeResponse {
    success: bool,
    category: Category,
    confidence: f32,
    reasoning: String,
    overridden: bool,
    relationship: SenderRelationship,
    urgency: UrgencyAnalysis,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RespondResponse {
    success: bool,
    category: Category,
    #[serde(flatten)]
    response: GeneratedResponse,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponse {
    success: bool,
    #[serde(flatten)]
    result: BatchResult,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleResult {
    subject: &'static str,
    from: &'static str,
    relationship: SenderRelationship,
    urgency: UrgencyAnalysis,
}

pub async fn categorize(
    State(state): State<AppState>,
    payload: Result<Json<EmailPayload>, JsonRejection>,
) -> Result<Json<CategorizeResponse>, ApiError> {
    let Json(payload) = payload?;
    let email = payload.validated()?;

    let (result, urgency) = state
        .analyzer
        .categorize(&email)
        .await
        .map_err(ApiError::external)?;
    info!(category = %result.category, score = urgency.score(), "categorized email");

    Ok(Json(CategorizeResponse {
        success: true,
        category: result.category,
        confidence: result.confidence,
        reasoning: result.reasoning,
        overridden: result.overridden,
        relationship: relationship::classify_sender(&email.sender),
        urgency,
    }))
}

pub async fn urgency(
    State(state): State<AppState>,
    payload: Result<Json<EmailPayload>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(payload) = payload?;
    let email = payload.validated()?;
    let analysis = state.analyzer.score(&email);
    Ok(Json(json!({ "success": true, "urgency": analysis })))
}

pub async fn urgency_ai(
    State(state): State<AppState>,
    payload: Result<Json<EmailPayload>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(payload) = payload?;
    let email = payload.validated()?;
    let blended = state.analyzer.estimate(&email).await;
    info!(
        score = blended.score(),
        level = %blended.level(),
        urgent = blended.is_urgent(),
        "estimated urgency"
    );
    Ok(Json(json!({ "success": true, "urgency": blended })))
}

pub async fn respond(
    State(state): State<AppState>,
    payload: Result<Json<RespondPayload>, JsonRejection>,
) -> Result<Json<RespondResponse>, ApiError> {
    let Json(payload) = payload?;

    let category = match payload.category.as_deref().filter(|c| !c.trim().is_empty()) {
        Some(c) => Category::parse(c)
            .ok_or_else(|| ApiError::Validation(format!("Unknown category: {}", c)))?,
        None => Category::Work,
    };
    let response_type = match payload.response_type.as_deref().filter(|t| !t.trim().is_empty()) {
        Some(t) => Some(
            ResponseType::parse(t)
                .ok_or_else(|| ApiError::Validation(format!("Unknown response type: {}", t)))?,
        ),
        None => None,
    };
    let email = payload.email.validated()?;

    let request = ResponseRequest {
        email: &email,
        category,
        response_type,
        relationship: relationship::classify_sender(&email.sender),
        urgency: state.analyzer.score(&email).level(),
        custom_instructions: payload.custom_instructions.as_deref(),
    };
    let response = state.analyzer.respond(&request).await;

    Ok(Json(RespondResponse {
        success: true,
        category,
        response,
    }))
}

pub async fn batch(
    State(state): State<AppState>,
    payload: Result<Json<BatchPayload>, JsonRejection>,
) -> Result<Json<BatchResponse>, ApiError> {
    let Json(payload) = payload?;
    let emails: Vec<EmailRecord> = payload
        .emails
        .into_iter()
        .enumerate()
        .map(|(i, e)| e.into_record(format!("email-{}", i + 1)))
        .collect();

    let options = BatchOptions {
        generate_responses: payload.generate_responses,
    };
    let result = batch::process_batch(&state.analyzer, emails, options).await;
    Ok(Json(BatchResponse {
        success: true,
        result,
    }))
}

pub async fn templates() -> Json<Value> {
    let templates: &[Template] = responder::TEMPLATES;
    Json(json!({ "success": true, "templates": templates }))
}

const SAMPLE_EMAILS: &[(&str, &str, &str)] = &[
    (
        "URGENT: Production system down",
        "CEO Jane <ceo@company.com>",
        "The payment system is down and customers are waiting. Fix immediately.",
    ),
    (
        "Team meeting today at 3pm",
        "Project Manager <manager@company.com>",
        "Please review the agenda before the meeting today.",
    ),
    (
        "Client waiting on the proposal",
        "Acme Client <client@acme.com>",
        "Our client is waiting and getting upset about the delay.",
    ),
    (
        "Weekly newsletter",
        "news@newsletter.com",
        "Here are this week's top stories. Unsubscribe at any time.",
    ),
    (
        "Dinner this weekend?",
        "Mom <mom@gmail.com>",
        "No rush, let me know when you are free.",
    ),
];

/// Runs the built-in sample emails through the keyword scorer and the sender
/// classifier. No model calls.
pub async fn test_samples(State(state): State<AppState>) -> Json<Value> {
    let results: Vec<SampleResult> = SAMPLE_EMAILS
        .iter()
        .map(|&(subject, from, snippet)| SampleResult {
            subject,
            from,
            relationship: relationship::classify_sender(from),
            urgency: state.table.score(subject, from, snippet),
        })
        .collect();
    Json(json!({ "success": true, "results": results }))
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let timestamp: DateTime<Utc> = Utc::now();
    Json(json!({
        "status": "ok",
        "backend": state.backend,
        "authenticated": state.token_store.load().is_some(),
        "timestamp": timestamp,
    }))
}

pub async fn emails(
    State(state): State<AppState>,
    query: Result<Query<EmailsQuery>, QueryRejection>,
) -> Result<Json<BatchResponse>, ApiError> {
    let Query(query) = query?;
    let max = query
        .max
        .unwrap_or(DEFAULT_FETCH_COUNT)
        .clamp(1, MAX_BATCH_SIZE as u32);

    let provider = state
        .mail
        .connect(&state.token_store, state.oauth.as_ref())
        .await
        .map_err(|e| mail_error(&state, e))?;
    let emails = provider
        .list_messages(max, query.query.as_deref())
        .await
        .map_err(|e| mail_error(&state, e))?;
    info!(count = emails.len(), "fetched emails");

    let options = BatchOptions {
        generate_responses: query.generate_responses.unwrap_or(false),
    };
    let result = batch::process_batch(&state.analyzer, emails, options).await;
    Ok(Json(BatchResponse {
        success: true,
        result,
    }))
}

fn mail_error(state: &AppState, err: MailError) -> ApiError {
    match err {
        MailError::NotAuthenticated => ApiError::AuthenticationRequired {
            auth_url: state.auth_url(),
        },
        other => ApiError::ExternalService(other.to_string()),
    }
}

pub async fn auth(State(state): State<AppState>) -> Result<Redirect, ApiError> {
    let url = state
        .auth_url()
        .ok_or_else(|| ApiError::Internal("Gmail OAuth client is not configured".to_string()))?;
    Ok(Redirect::temporary(&url))
}

pub async fn oauth_callback(
    State(state): State<AppState>,
    query: Result<Query<CallbackQuery>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let Query(query) = query?;
    if let Some(err) = query.error {
        return Err(ApiError::Validation(format!("Authorization was denied: {}", err)));
    }
    let code = query
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ApiError::Validation("Missing authorization code".to_string()))?;
    let oauth = state
        .oauth
        .as_ref()
        .ok_or_else(|| ApiError::Internal("Gmail OAuth client is not configured".to_string()))?;

    let token = oauth
        .exchange_code(&state.http, &code)
        .await
        .map_err(|e| ApiError::ExternalService(e.to_string()))?;
    state
        .token_store
        .save(&token)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    info!("Gmail authorization complete");

    Ok(Json(json!({ "success": true, "message": "Authenticated with Gmail" })))
}
