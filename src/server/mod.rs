mod error;
mod handlers;

use crate::analysis::Analyzer;
use crate::providers::token::{OAuthClient, TokenStore};
use crate::providers::MailConnector;
use crate::urgency::UrgencyFactorTable;
use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared per-process state. Everything in here is read-only; `mail` opens a
/// new provider session from the token file on every request.
#[derive(Clone)]
pub struct AppState {
    pub analyzer: Arc<Analyzer>,
    pub table: Arc<UrgencyFactorTable>,
    /// Name of the text-generation backend, reported by the health check
    pub backend: String,
    pub mail: Arc<dyn MailConnector>,
    pub token_store: TokenStore,
    pub oauth: Option<OAuthClient>,
    pub http: reqwest::Client,
}

impl AppState {
    pub fn auth_url(&self) -> Option<String> {
        self.oauth.as_ref().map(OAuthClient::authorization_url)
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/categorize", post(handlers::categorize))
        .route("/api/urgency", post(handlers::urgency))
        .route("/api/urgency/ai", post(handlers::urgency_ai))
        .route("/api/respond", post(handlers::respond))
        .route("/api/batch", post(handlers::batch))
        .route("/api/templates", get(handlers::templates))
        .route("/api/test", get(handlers::test_samples))
        .route("/api/health", get(handlers::health))
        .route("/api/emails", get(handlers::emails))
        .route("/auth", get(handlers::auth))
        .route("/oauth2callback", get(handlers::oauth_callback))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(state: AppState, port: u16) -> Result<()> {
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("HTTP server listening on {}", addr);

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
