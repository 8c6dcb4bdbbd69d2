use crate::llm::{CompletionRequest, TextGenerator};
use crate::providers::EmailRecord;
use crate::urgency::{UrgencyAnalysis, URGENT_THRESHOLD};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Used when the model leaves confidence out
const DEFAULT_CONFIDENCE: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Urgent,
    Work,
    Personal,
    Newsletter,
    Promotion,
    Spam,
    Meeting,
    Invoice,
}

impl Category {
    pub const ALL: [Category; 8] = [
        Category::Urgent,
        Category::Work,
        Category::Personal,
        Category::Newsletter,
        Category::Promotion,
        Category::Spam,
        Category::Meeting,
        Category::Invoice,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Urgent => "urgent",
            Category::Work => "work",
            Category::Personal => "personal",
            Category::Newsletter => "newsletter",
            Category::Promotion => "promotion",
            Category::Spam => "spam",
            Category::Meeting => "meeting",
            Category::Invoice => "invoice",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        Self::ALL.into_iter().find(|c| c.as_str().eq_ignore_ascii_case(s))
    }

    /// Categories where a human is usually waiting on an answer
    pub fn expects_reply(&self) -> bool {
        matches!(
            self,
            Category::Urgent | Category::Work | Category::Meeting | Category::Personal
        )
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryResult {
    pub category: Category,
    pub confidence: f32,
    pub reasoning: String,
    /// True when the keyword score forced the category to urgent
    pub overridden: bool,
}

pub struct Classifier {
    generator: Arc<dyn TextGenerator>,
}

const SYSTEM_PROMPT: &str =
    "You are an email triage assistant. You categorize emails and reply with JSON only.";

impl Classifier {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    /// Ask the model for a category, then let the keyword score overrule it
    /// when the score says the email is urgent.
    pub async fn classify(&self, email: &EmailRecord, urgency: &UrgencyAnalysis) -> Result<CategoryResult> {
        let request = CompletionRequest::new(SYSTEM_PROMPT, build_prompt(email, urgency))
            .temperature(0.1)
            .max_tokens(200);

        debug!(email_id = %email.id, "requesting category from {}", self.generator.name());
        let reply = self
            .generator
            .complete(&request)
            .await
            .context("Category request failed")?;

        let value = parse_json_reply(&reply)?;
        let result = validate_reply(&value)?;
        let result = apply_urgency_override(result, urgency);
        if result.overridden {
            info!(email_id = %email.id, score = urgency.score(), "category overridden to urgent");
        }
        Ok(result)
    }
}

fn build_prompt(email: &EmailRecord, urgency: &UrgencyAnalysis) -> String {
    let categories: Vec<&str> = Category::ALL.iter().map(|c| c.as_str()).collect();
    format!(
        r#"Categorize this email.

<email>
Subject: {}
From: {}
To: {}
Preview: {}
</email>

Categories: {}

Rules, apply the first one that fits:
1. urgent - time pressure, emergencies, or a request from someone with authority that needs action soon
2. meeting - meeting invitations, calls, scheduling
3. newsletter - newsletters, digests, mailing lists, marketing senders
4. invoice - bills, invoices, payments, receipts
5. promotion - sales, discounts, offers
6. spam - unsolicited, suspicious or unwanted mail
7. personal - family and friends
8. work - anything else

Keyword urgency score: {}/10 ({})

Respond with JSON only:
{{"category": "work", "confidence": 0.8, "reasoning": "one short sentence"}}"#,
        email.subject(),
        email.sender,
        email.recipient(),
        email.body_snippet,
        categories.join(", "),
        urgency.score(),
        urgency.reasoning,
    )
}

/// Parse a model reply as JSON. Models like to wrap the object in prose or a
/// code fence, so when a strict parse fails the first balanced `{...}` span
/// is tried instead.
pub(crate) fn parse_json_reply(text: &str) -> Result<Value> {
    let text = text.trim();
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return Ok(value);
    }
    let span = first_balanced_object(text)
        .with_context(|| format!("Could not find JSON in response: {}", text))?;
    serde_json::from_str(span).with_context(|| format!("Failed to parse JSON in response: {}", span))
}

fn first_balanced_object(text: &str) -> Option<&str> {
    text.char_indices()
        .filter(|(_, c)| *c == '{')
        .find_map(|(start, _)| balanced_end(&text[start..]).map(|end| &text[start..start + end]))
}

/// Byte length of the object starting at `text[0] == '{'`, skipping braces
/// inside string literals.
fn balanced_end(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

fn validate_reply(value: &Value) -> Result<CategoryResult> {
    let obj = value
        .as_object()
        .context("Classification reply is not a JSON object")?;

    let category = match obj.get("category") {
        Some(Value::String(s)) => {
            Category::parse(s).with_context(|| format!("Unknown category: {}", s))?
        }
        Some(other) => anyhow::bail!("category must be a string, got {}", other),
        None => anyhow::bail!("Classification reply has no category"),
    };

    let confidence = match obj.get("confidence") {
        None | Some(Value::Null) => DEFAULT_CONFIDENCE,
        Some(Value::Number(n)) => n
            .as_f64()
            .map(|c| c.clamp(0.0, 1.0) as f32)
            .unwrap_or(DEFAULT_CONFIDENCE),
        Some(other) => anyhow::bail!("confidence must be a number, got {}", other),
    };

    let reasoning = match obj.get("reasoning") {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.trim().to_string(),
        Some(other) => anyhow::bail!("reasoning must be a string, got {}", other),
    };

    Ok(CategoryResult {
        category,
        confidence,
        reasoning,
        overridden: false,
    })
}

/// A keyword score of 7 or more always means urgent, whatever the model said.
pub fn apply_urgency_override(mut result: CategoryResult, urgency: &UrgencyAnalysis) -> CategoryResult {
    if urgency.score() >= URGENT_THRESHOLD && result.category != Category::Urgent {
        result.category = Category::Urgent;
        let note = format!("[Override: keyword urgency score {}/10]", urgency.score());
        result.reasoning = if result.reasoning.is_empty() {
            note
        } else {
            format!("{} {}", result.reasoning, note)
        };
        result.overridden = true;
    }
    result
}
