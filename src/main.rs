mod analysis;
mod batch;
mod blend;
mod classifier;
mod config;
mod llm;
mod providers;
mod relationship;
mod responder;
mod server;
mod store;
mod urgency;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "email-triage")]
#[command(about = "Email triage: urgency scoring, categorization and reply drafting")]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API
    Serve {
        /// Port to listen on (defaults to PORT, then the config file, then 3000)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Authorize Gmail access
    Login,
    /// Fetch emails from Gmail and analyze them
    Scan {
        /// Maximum number of emails to scan
        #[arg(short = 'n', long, default_value = "10")]
        max: u32,
        /// Gmail search query, e.g. "is:unread"
        #[arg(short, long)]
        query: Option<String>,
        /// Draft a reply for each email
        #[arg(long)]
        responses: bool,
    },
    /// Show scanned emails that need a reply
    NeedsReply,
    /// Keyword urgency score for a single email, no model involved
    Score {
        #[arg(long, default_value = "")]
        subject: String,
        #[arg(long, default_value = "")]
        from: String,
        #[arg(long, default_value = "")]
        snippet: String,
    },
    /// Configure settings
    Config {
        /// Text-generation backend (claude-cli, anthropic or openai)
        #[arg(long)]
        backend: Option<String>,
        /// Model name for the backend
        #[arg(long)]
        model: Option<String>,
    },
}

fn init_tracing(json: bool, default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let default_level = match cli.command {
        Commands::Serve { .. } => "info",
        _ => "warn",
    };
    init_tracing(cli.log_json, default_level);

    match cli.command {
        Commands::Serve { port } => {
            commands::serve(port).await?;
        }
        Commands::Login => {
            commands::login().await?;
        }
        Commands::Scan {
            max,
            query,
            responses,
        } => {
            commands::scan(max, query.as_deref(), responses).await?;
        }
        Commands::NeedsReply => {
            commands::needs_reply()?;
        }
        Commands::Score {
            subject,
            from,
            snippet,
        } => {
            commands::score(&subject, &from, &snippet)?;
        }
        Commands::Config { backend, model } => {
            commands::config(backend, model)?;
        }
    }

    Ok(())
}

mod commands {
    use crate::analysis::Analyzer;
    use crate::batch::{self, BatchAnalytics, BatchOptions, MAX_BATCH_SIZE};
    use crate::config::{Config, LlmBackend};
    use crate::llm;
    use crate::providers::gmail::{GmailConnector, GmailProvider};
    use crate::providers::token::{OAuthClient, TokenStore};
    use crate::providers::{MailError, MailProvider};
    use crate::relationship;
    use crate::server::{self, AppState};
    use crate::store::AnalysisStore;
    use crate::urgency::UrgencyFactorTable;
    use anyhow::{Context, Result};
    use std::io::{self, BufRead, Write};
    use std::sync::Arc;
    use std::time::Duration;

    fn oauth_client(cfg: &Config) -> Option<OAuthClient> {
        Some(OAuthClient::new(
            cfg.gmail.client_id.clone().filter(|id| !id.is_empty())?,
            cfg.gmail.client_secret()?,
            cfg.gmail.redirect_uri.clone(),
        ))
    }

    fn build_analyzer(cfg: &Config, table: Arc<UrgencyFactorTable>) -> Result<Analyzer> {
        let generator = llm::build_generator(&cfg.llm)?;
        Ok(Analyzer::new(generator, table, cfg.blend_ai_weight()))
    }

    async fn connect_gmail(cfg: &Config) -> Result<GmailProvider> {
        let store = TokenStore::new(cfg.gmail.token_path());
        match GmailProvider::from_store(&store, oauth_client(cfg).as_ref()).await {
            Ok(provider) => Ok(provider),
            Err(MailError::NotAuthenticated) => {
                anyhow::bail!("Not logged in to Gmail. Run `email-triage login` first.")
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn serve(port: Option<u16>) -> Result<()> {
        let cfg = Config::load()?;
        let table = Arc::new(UrgencyFactorTable::load()?);
        let analyzer = build_analyzer(&cfg, table.clone())?;

        let oauth = oauth_client(&cfg);
        if oauth.is_none() {
            tracing::warn!("Gmail client id or GMAIL_CLIENT_SECRET missing, /api/emails is unavailable");
        }

        let state = AppState {
            analyzer: Arc::new(analyzer),
            table,
            backend: cfg.llm.backend.to_string(),
            mail: Arc::new(GmailConnector),
            token_store: TokenStore::new(cfg.gmail.token_path()),
            oauth,
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()?,
        };
        server::serve(state, port.unwrap_or_else(|| cfg.port())).await
    }

    pub async fn login() -> Result<()> {
        let cfg = Config::load()?;
        let oauth = oauth_client(&cfg).context(
            "Gmail is not configured. Set gmail.client_id in the config file and GMAIL_CLIENT_SECRET in the environment.",
        )?;

        println!("Open this URL in your browser and authorize access:\n");
        println!("{}\n", oauth.authorization_url());
        print!("Paste the authorization code: ");
        io::stdout().flush()?;

        let mut code = String::new();
        io::stdin().lock().read_line(&mut code)?;
        let code = code.trim();
        if code.is_empty() {
            anyhow::bail!("No authorization code entered");
        }

        let http = reqwest::Client::new();
        let token = oauth.exchange_code(&http, code).await?;
        let store = TokenStore::new(cfg.gmail.token_path());
        store.save(&token)?;
        println!("Gmail login successful! Token saved to {}", store.path().display());
        Ok(())
    }

    pub async fn scan(max: u32, query: Option<&str>, responses: bool) -> Result<()> {
        let cfg = Config::load()?;
        let table = Arc::new(UrgencyFactorTable::load()?);
        let analyzer = build_analyzer(&cfg, table)?;
        let provider = connect_gmail(&cfg).await?;
        let mut store = AnalysisStore::load()?;

        let emails = provider.list_messages(max, query).await?;
        if emails.is_empty() {
            println!("No emails found.");
            return Ok(());
        }
        println!("Analyzing {} emails...\n", emails.len());

        let options = BatchOptions {
            generate_responses: responses,
        };
        let mut totals = BatchAnalytics::default();

        // The orchestrator caps each batch, so larger scans go in chunks
        for chunk in emails.chunks(MAX_BATCH_SIZE) {
            let result = batch::process_batch(&analyzer, chunk.to_vec(), options).await;
            totals.total += result.analytics.total;
            totals.failed += result.analytics.failed;
            totals.needs_response_count += result.analytics.needs_response_count;
            for (category, count) in result.analytics.categories {
                *totals.categories.entry(category).or_default() += count;
            }

            for item in &result.processed {
                let subject: String = item.email.subject().chars().take(50).collect();
                let Some(analysis) = item.ai_analysis.analysis() else {
                    println!("  ! {} | failed | {}", item.email.id, subject);
                    continue;
                };

                let marker = if analysis.is_urgent() { "!" } else { " " };
                println!(
                    "{} {} | {:<10} | {:>2}/10 {:<8} | {}",
                    marker,
                    item.email.id,
                    analysis.category,
                    analysis.urgency_score(),
                    analysis.urgency_level().as_str(),
                    subject
                );
                if let Some(reply) = &analysis.suggested_response {
                    println!("      Reply ({}): {}", reply.response_type, reply.text.replace('\n', " "));
                }
                store.store(&item.email, analysis);
            }
        }

        store.save()?;
        tracing::debug!(stored = store.len(), "saved analyses");

        println!("\nAnalyzed {} emails ({} failed)", totals.total, totals.failed);
        for (category, count) in &totals.categories {
            println!("  {:<10} {}", category, count);
        }
        println!("Needs a reply: {}", totals.needs_response_count);
        Ok(())
    }

    pub fn needs_reply() -> Result<()> {
        let store = AnalysisStore::load()?;
        if store.is_empty() {
            println!("No scanned emails yet. Run `email-triage scan` first.");
            return Ok(());
        }
        let pending = store.needs_response();

        if pending.is_empty() {
            println!("No emails need a reply.");
            return Ok(());
        }

        println!("Emails that need a reply:\n");
        for entry in pending {
            println!(
                "{:>2}/10 {:<8} | {} | {} | {}",
                entry.urgency_score,
                entry.urgency_level.as_str(),
                entry.category,
                entry.from.chars().take(30).collect::<String>(),
                entry.subject.chars().take(50).collect::<String>()
            );
        }
        Ok(())
    }

    pub fn score(subject: &str, from: &str, snippet: &str) -> Result<()> {
        let table = UrgencyFactorTable::load()?;
        let analysis = table.score(subject, from, snippet);

        println!("Score:        {}/10 ({})", analysis.score(), analysis.level().as_str());
        println!("Urgent:       {}", analysis.is_urgent());
        println!("Relationship: {}", relationship::classify_sender(from));
        println!("Reasoning:    {}", analysis.reasoning);
        for factor in &analysis.factors {
            println!("  - {}", factor);
        }
        Ok(())
    }

    pub fn config(backend: Option<String>, model: Option<String>) -> Result<()> {
        let mut cfg = Config::load()?;

        if backend.is_none() && model.is_none() {
            println!("Current settings:");
            println!("  backend: {}", cfg.llm.backend);
            println!("  model: {}", cfg.llm.model());
            println!("  blend_ai_weight: {}", cfg.blend_ai_weight());
            println!("  port: {}", cfg.port());
            println!(
                "  gmail: {}",
                if oauth_client(&cfg).is_some() {
                    "configured"
                } else {
                    "not configured"
                }
            );
            return Ok(());
        }

        if let Some(b) = backend {
            let parsed: LlmBackend = b.parse()?;
            if parsed != cfg.llm.backend {
                // A model name rarely carries over between backends
                cfg.llm.model = None;
            }
            cfg.llm.backend = parsed;
        }
        if let Some(m) = model {
            cfg.llm.model = Some(m).filter(|m| !m.is_empty());
        }
        cfg.save()?;
        println!("Backend set to: {} (model {})", cfg.llm.backend, cfg.llm.model());
        Ok(())
    }
}
