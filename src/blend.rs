use crate::classifier::parse_json_reply;
use crate::config::DEFAULT_BLEND_AI_WEIGHT;
use crate::llm::{CompletionRequest, TextGenerator};
use crate::providers::EmailRecord;
use crate::urgency::{UrgencyAnalysis, UrgencyFactorTable, UrgencyLevel, UrgencyScore, MAX_SCORE};
use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScoreProvider {
    Hybrid,
    RuleBased,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlendedUrgency {
    #[serde(flatten)]
    pub urgency: UrgencyScore,
    pub provider: ScoreProvider,
    pub rule: UrgencyAnalysis,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_score: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_reasoning: Option<String>,
}

impl BlendedUrgency {
    pub fn score(&self) -> u8 {
        self.urgency.score()
    }

    pub fn level(&self) -> UrgencyLevel {
        self.urgency.level()
    }

    pub fn is_urgent(&self) -> bool {
        self.urgency.is_urgent()
    }

    fn rule_only(rule: UrgencyAnalysis) -> Self {
        Self {
            urgency: rule.urgency,
            provider: ScoreProvider::RuleBased,
            rule,
            ai_score: None,
            ai_reasoning: None,
        }
    }
}

/// Combined score: `round(ai * w + rule * (1 - w))`
pub fn blend_scores(ai_score: u8, rule_score: u8, ai_weight: f64) -> UrgencyScore {
    let blended = ai_score as f64 * ai_weight + rule_score as f64 * (1.0 - ai_weight);
    UrgencyScore::new(blended.round() as i64)
}

const SYSTEM_PROMPT: &str =
    "You rate how urgently an email needs attention. Reply with JSON only.";

pub struct UrgencyEstimator {
    generator: Arc<dyn TextGenerator>,
    table: Arc<UrgencyFactorTable>,
    ai_weight: f64,
}

impl UrgencyEstimator {
    pub fn new(generator: Arc<dyn TextGenerator>, table: Arc<UrgencyFactorTable>) -> Self {
        Self {
            generator,
            table,
            ai_weight: DEFAULT_BLEND_AI_WEIGHT,
        }
    }

    pub fn with_ai_weight(mut self, ai_weight: f64) -> Self {
        self.ai_weight = ai_weight.clamp(0.0, 1.0);
        self
    }

    /// Rule score blended with the model's own estimate. Never fails: when the
    /// model call or its reply is unusable the rule result comes back as is.
    pub async fn estimate(&self, email: &EmailRecord) -> BlendedUrgency {
        let rule = self
            .table
            .score(email.subject(), &email.sender, &email.body_snippet);
        self.estimate_with_rule(email, rule).await
    }

    /// Same as `estimate` for callers that already scored the email
    pub async fn estimate_with_rule(&self, email: &EmailRecord, rule: UrgencyAnalysis) -> BlendedUrgency {
        match self.ai_score(email).await {
            Ok((ai_score, ai_reasoning)) => BlendedUrgency {
                urgency: blend_scores(ai_score, rule.score(), self.ai_weight),
                provider: ScoreProvider::Hybrid,
                rule,
                ai_score: Some(ai_score),
                ai_reasoning,
            },
            Err(e) => {
                warn!(email_id = %email.id, "model urgency unavailable, using rule score: {:#}", e);
                BlendedUrgency::rule_only(rule)
            }
        }
    }

    async fn ai_score(&self, email: &EmailRecord) -> Result<(u8, Option<String>)> {
        let request = CompletionRequest::new(SYSTEM_PROMPT, build_prompt(email))
            .temperature(0.1)
            .max_tokens(150);
        let reply = self
            .generator
            .complete(&request)
            .await
            .context("Urgency request failed")?;
        parse_score_reply(&reply)
    }
}

fn build_prompt(email: &EmailRecord) -> String {
    format!(
        r#"Rate the urgency of this email on a 0-10 scale.

<email>
Subject: {}
From: {}
Preview: {}
</email>

Scale:
- 0-2 low: no action needed, informational
- 3-5 medium: needs attention this week
- 6-8 high: needs attention today
- 9-10 critical: needs immediate action

Respond with JSON only:
{{"score": 5, "reasoning": "one short sentence"}}"#,
        email.subject(),
        email.sender,
        email.body_snippet,
    )
}

/// Accepts `{"score": n, ...}` (possibly wrapped in prose) or a bare number
fn parse_score_reply(reply: &str) -> Result<(u8, Option<String>)> {
    if let Ok(n) = reply.trim().parse::<f64>() {
        return Ok((to_score(n)?, None));
    }

    let value = parse_json_reply(reply)?;
    let score = match value.get("score").or_else(|| value.get("urgency_score")) {
        Some(Value::Number(n)) => n.as_f64().context("score is not a finite number")?,
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .with_context(|| format!("score is not numeric: {}", s))?,
        _ => anyhow::bail!("Urgency reply has no numeric score"),
    };
    let reasoning = value
        .get("reasoning")
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    Ok((to_score(score)?, reasoning))
}

fn to_score(n: f64) -> Result<u8> {
    if !n.is_finite() {
        anyhow::bail!("score is not a finite number");
    }
    Ok(n.round().clamp(0.0, MAX_SCORE as f64) as u8)
}
