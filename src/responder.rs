use crate::classifier::Category;
use crate::llm::{CompletionRequest, TextGenerator};
use crate::providers::EmailRecord;
use crate::relationship::SenderRelationship;
use crate::urgency::UrgencyLevel;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

const WORD_BUDGET: usize = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    Accept,
    Decline,
    Schedule,
    Question,
    UpdateRequest,
    Acknowledgment,
}

impl ResponseType {
    pub const ALL: [ResponseType; 6] = [
        ResponseType::Accept,
        ResponseType::Decline,
        ResponseType::Schedule,
        ResponseType::Question,
        ResponseType::UpdateRequest,
        ResponseType::Acknowledgment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseType::Accept => "accept",
            ResponseType::Decline => "decline",
            ResponseType::Schedule => "schedule",
            ResponseType::Question => "question",
            ResponseType::UpdateRequest => "update_request",
            ResponseType::Acknowledgment => "acknowledgment",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        Self::ALL.into_iter().find(|t| t.as_str().eq_ignore_ascii_case(s))
    }

    fn instruction(&self) -> &'static str {
        match self {
            ResponseType::Accept => "Accept the invitation or request.",
            ResponseType::Decline => "Politely decline.",
            ResponseType::Schedule => "Propose finding a time that works and ask for availability.",
            ResponseType::Question => "Answer or acknowledge the question and say when a full answer will follow.",
            ResponseType::UpdateRequest => "Give or promise a status update.",
            ResponseType::Acknowledgment => "Acknowledge receipt and say it will be handled.",
        }
    }
}

impl fmt::Display for ResponseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Guess what kind of reply an email calls for from its text
pub fn infer_response_type(subject: &str, snippet: &str) -> ResponseType {
    let text = format!("{} {}", subject, snippet).to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| text.contains(w));

    if has(&["meeting", "call", "appointment", "invite"]) {
        if has(&["cancel", "conflict", "unable", "can't"]) {
            ResponseType::Decline
        } else if has(&["reschedule", "availability", "available", "when"]) {
            ResponseType::Schedule
        } else {
            ResponseType::Accept
        }
    } else if text.contains('?') || has(&["question", "clarify"]) {
        ResponseType::Question
    } else if has(&["update", "status", "progress"]) {
        ResponseType::UpdateRequest
    } else {
        ResponseType::Acknowledgment
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseSource {
    Ai,
    Template,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedResponse {
    pub text: String,
    pub response_type: ResponseType,
    pub relationship: SenderRelationship,
    pub source: ResponseSource,
}

#[derive(Debug, Clone)]
pub struct ResponseRequest<'a> {
    pub email: &'a EmailRecord,
    pub category: Category,
    pub response_type: Option<ResponseType>,
    pub relationship: SenderRelationship,
    pub urgency: UrgencyLevel,
    pub custom_instructions: Option<&'a str>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub category: Option<Category>,
    pub response_type: ResponseType,
    pub text: &'static str,
}

const fn template(category: Option<Category>, response_type: ResponseType, text: &'static str) -> Template {
    Template {
        category,
        response_type,
        text,
    }
}

/// Canned replies. Rows with no category are the generic fallback.
pub const TEMPLATES: &[Template] = &[
    template(Some(Category::Meeting), ResponseType::Accept,
        "Hi,\n\nThanks for the invite. I'll be there.\n\nBest regards"),
    template(Some(Category::Meeting), ResponseType::Decline,
        "Hi,\n\nThanks for the invite. Unfortunately I can't make it at that time. Could we find another slot?\n\nBest regards"),
    template(Some(Category::Meeting), ResponseType::Schedule,
        "Hi,\n\nThanks for reaching out. I'm happy to meet. Could you share a few times that work for you?\n\nBest regards"),
    template(Some(Category::Urgent), ResponseType::Acknowledgment,
        "Hi,\n\nThanks for flagging this. I'm on it and will get back to you as soon as possible.\n\nBest regards"),
    template(Some(Category::Work), ResponseType::Acknowledgment,
        "Hi,\n\nThanks for your email. I'll review it and get back to you shortly.\n\nBest regards"),
    template(Some(Category::Work), ResponseType::UpdateRequest,
        "Hi,\n\nThanks for checking in. I'll send you a status update by end of day.\n\nBest regards"),
    template(Some(Category::Invoice), ResponseType::Acknowledgment,
        "Hi,\n\nThanks for sending this over. I'll make sure it's processed and let you know if there are any questions.\n\nBest regards"),
    template(Some(Category::Personal), ResponseType::Acknowledgment,
        "Hi,\n\nThanks for your message! I'll get back to you soon.\n\nCheers"),
    template(None, ResponseType::Accept,
        "Hi,\n\nThanks, that works for me.\n\nBest regards"),
    template(None, ResponseType::Decline,
        "Hi,\n\nThanks for thinking of me. Unfortunately I won't be able to take this on right now.\n\nBest regards"),
    template(None, ResponseType::Schedule,
        "Hi,\n\nThanks for your email. Could you let me know what times work for you?\n\nBest regards"),
    template(None, ResponseType::Question,
        "Hi,\n\nThanks for your question. I'm looking into it and will get back to you shortly.\n\nBest regards"),
    template(None, ResponseType::UpdateRequest,
        "Hi,\n\nThanks for following up. I'll send an update shortly.\n\nBest regards"),
    template(None, ResponseType::Acknowledgment,
        "Hi,\n\nThanks for your email. I've received it and will respond shortly.\n\nBest regards"),
];

/// Template for `(category, response_type)`, then the generic row for the
/// response type, then the generic acknowledgment.
pub fn select_template(category: Category, response_type: ResponseType) -> &'static str {
    let find = |category: Option<Category>, response_type: ResponseType| {
        TEMPLATES
            .iter()
            .find(|t| t.category == category && t.response_type == response_type)
            .map(|t| t.text)
    };
    find(Some(category), response_type)
        .or_else(|| find(None, response_type))
        .or_else(|| find(None, ResponseType::Acknowledgment))
        .unwrap_or("Thanks for your email. I'll get back to you shortly.")
}

const FORMAL_SUBSTITUTIONS: &[(&str, &str)] = &[
    ("Thanks", "Thank you"),
    ("Hi,", "Hello,"),
    ("I'll", "I will"),
    ("I'm", "I am"),
    ("I've", "I have"),
    ("can't", "cannot"),
    ("won't", "will not"),
    ("it's", "it is"),
    ("Cheers", "Kind regards"),
];

fn substitute(text: &str, pairs: &[(&str, &str)], reverse: bool) -> String {
    if reverse {
        // Back to front so "will not" is handled before "I will"
        pairs
            .iter()
            .rev()
            .fold(text.to_string(), |acc, (plain, formal)| acc.replace(formal, plain))
    } else {
        pairs
            .iter()
            .fold(text.to_string(), |acc, (plain, formal)| acc.replace(plain, formal))
    }
}

pub fn make_formal(text: &str) -> String {
    substitute(text, FORMAL_SUBSTITUTIONS, false)
}

pub fn make_casual(text: &str) -> String {
    substitute(text, FORMAL_SUBSTITUTIONS, true)
}

/// Canned reply adjusted for the sender
pub fn template_response(category: Category, response_type: ResponseType, relationship: SenderRelationship) -> String {
    let text = select_template(category, response_type);
    match relationship {
        SenderRelationship::Boss => make_formal(text),
        SenderRelationship::Personal => make_casual(text),
        _ => text.to_string(),
    }
}

pub fn tone_guide(relationship: SenderRelationship, urgency: UrgencyLevel) -> String {
    let mut guide = relationship.tone_guide().to_string();
    if urgency.is_pressing() {
        guide.push_str(" Acknowledge the urgency and commit to a quick turnaround.");
    }
    guide
}

const SYSTEM_PROMPT: &str = "You write short, natural email replies on behalf of the user. \
Output only the reply body, no subject line and no commentary.";

/// Drafts replies through the model, falling back to a canned template
pub struct ResponseGenerator {
    generator: Arc<dyn TextGenerator>,
}

impl ResponseGenerator {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    /// Draft a reply. Falls back to a template on any model failure, so this
    /// always produces something.
    pub async fn generate(&self, request: &ResponseRequest<'_>) -> GeneratedResponse {
        let response_type = request.response_type.unwrap_or_else(|| {
            infer_response_type(request.email.subject(), &request.email.body_snippet)
        });

        let completion = match request.custom_instructions.filter(|i| !i.trim().is_empty()) {
            Some(instructions) => CompletionRequest::new(
                SYSTEM_PROMPT,
                build_custom_prompt(request.email, instructions),
            ),
            None => CompletionRequest::new(SYSTEM_PROMPT, build_prompt(request, response_type)),
        }
        .temperature(0.7)
        .max_tokens(250);

        let text = match self.generator.complete(&completion).await {
            Ok(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
            Ok(_) => {
                warn!(email_id = %request.email.id, "model returned an empty reply, using template");
                None
            }
            Err(e) => {
                warn!(email_id = %request.email.id, "reply generation failed, using template: {}", e);
                None
            }
        };

        match text {
            Some(text) => GeneratedResponse {
                text,
                response_type,
                relationship: request.relationship,
                source: ResponseSource::Ai,
            },
            None => GeneratedResponse {
                text: template_response(request.category, response_type, request.relationship),
                response_type,
                relationship: request.relationship,
                source: ResponseSource::Template,
            },
        }
    }
}

fn build_custom_prompt(email: &EmailRecord, instructions: &str) -> String {
    format!(
        "Reply to this email.\n\nSubject: {}\nFrom: {}\nPreview: {}\n\nInstructions: {}",
        email.subject(),
        email.sender,
        email.body_snippet,
        instructions.trim(),
    )
}

fn build_prompt(request: &ResponseRequest<'_>, response_type: ResponseType) -> String {
    format!(
        r#"Write a reply to this email.

<email>
Subject: {}
From: {}
Preview: {}
</email>

Category: {}
Sender relationship: {}
Goal: {}
Tone: {}
Keep it under {} words."#,
        request.email.subject(),
        request.email.sender,
        request.email.body_snippet,
        request.category,
        request.relationship,
        response_type.instruction(),
        tone_guide(request.relationship, request.urgency),
        WORD_BUDGET,
    )
}
